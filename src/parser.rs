//! Recursive-descent parser: turns the token stream into arena nodes and
//! returns the root `Document` handle.
//!
//! The grammar is small: a document is a sequence of statements, a statement
//! is a `let` definition, a `drop`, or an expression, and expressions are
//! left-associative `..` concatenations of terms (string literals, blocks,
//! `match` and `prefix` forms, codeify `!`, invocations and parenthesised
//! groups). `;` is an optional statement separator.
//!
//! Intrinsic names are resolved here: a call whose callee names a built-in
//! operation becomes an `Intrinsic` node, so the names are reserved words.
//!
//! The parser is re-entered during evaluation (by `eval`, codeify and
//! `source`) and always appends to the same shared arena.

use crate::ParseError;
use crate::ast::{Arena, Node, NodeId, Position};
use crate::intrinsics;
use crate::lexer::{self, Token, TokenKind};

/// Parse `source` as a document, appending its nodes to `arena`. Positions
/// in diagnostics are reported against `source_name`.
pub fn parse_into(
    source_name: &str,
    source: &str,
    arena: &mut Arena,
) -> Result<NodeId, ParseError> {
    let tokens = lexer::lex(source_name, source)?;
    Parser {
        tokens: &tokens,
        index: 0,
        arena,
    }
    .document()
}

struct Parser<'a> {
    tokens: &'a [Token],
    index: usize,
    arena: &'a mut Arena,
}

impl Parser<'_> {
    fn peek(&self) -> &Token {
        &self.tokens[self.index]
    }

    /// Consume the current token. Never advances past the trailing Eof.
    fn advance(&mut self) -> Token {
        let token = self.tokens[self.index].clone();
        if self.index + 1 < self.tokens.len() {
            self.index += 1;
        }
        token
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if &self.peek().kind == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<Token, ParseError> {
        if &self.peek().kind == kind {
            Ok(self.advance())
        } else {
            Err(self.unexpected(what))
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<(String, Position), ParseError> {
        if let TokenKind::Ident(name) = &self.peek().kind {
            let name = name.clone();
            let pos = self.peek().pos.clone();
            self.advance();
            Ok((name, pos))
        } else {
            Err(self.unexpected(what))
        }
    }

    fn unexpected(&self, what: &str) -> ParseError {
        let token = self.peek();
        ParseError::with_found(
            token.pos.clone(),
            format!("expected {what}"),
            token.kind.describe(),
        )
    }

    fn skip_semicolons(&mut self) {
        while self.eat(&TokenKind::Semicolon) {}
    }

    fn document(mut self) -> Result<NodeId, ParseError> {
        let pos = self.peek().pos.clone();
        let mut stmts = Vec::new();
        loop {
            self.skip_semicolons();
            if self.at_eof() {
                break;
            }
            stmts.push(self.statement()?);
        }
        Ok(self.arena.add(Node::Document { stmts, pos }))
    }

    fn statement(&mut self) -> Result<NodeId, ParseError> {
        match self.peek().kind {
            TokenKind::KwLet => self.definition(),
            TokenKind::KwDrop => self.drop_statement(),
            _ => self.expression(),
        }
    }

    /// `let name(params...) => body` defines a function; `let name => body`
    /// defines a memoised variable.
    fn definition(&mut self) -> Result<NodeId, ParseError> {
        let let_tok = self.advance();
        let (name, name_pos) = self.expect_ident("a name after 'let'")?;

        if intrinsics::lookup(&name).is_some() {
            return Err(ParseError::new(
                name_pos,
                format!("'{name}' is an intrinsic and cannot be redefined"),
            ));
        }

        if self.eat(&TokenKind::LParen) {
            let mut params = Vec::new();
            if !self.eat(&TokenKind::RParen) {
                loop {
                    let (param, _) = self.expect_ident("a parameter name")?;
                    params.push(param);
                    if self.eat(&TokenKind::Comma) {
                        continue;
                    }
                    self.expect(&TokenKind::RParen, "')' after the parameter list")?;
                    break;
                }
            }
            self.expect(&TokenKind::FatArrow, "'=>' after the parameter list")?;
            let body = self.expression()?;
            Ok(self.arena.add(Node::Fn {
                name,
                params,
                body,
                pos: let_tok.pos,
            }))
        } else {
            self.expect(&TokenKind::FatArrow, "'=>' after the variable name")?;
            let body = self.expression()?;
            Ok(self.arena.add(Node::Var {
                name,
                body,
                pos: let_tok.pos,
            }))
        }
    }

    /// `drop name(args...)` - the target is recorded as an invocation so the
    /// evaluator can read off the name and arity to un-define.
    fn drop_statement(&mut self) -> Result<NodeId, ParseError> {
        let drop_tok = self.advance();
        let (name, name_pos) = self.expect_ident("a function name after 'drop'")?;
        let args = if matches!(self.peek().kind, TokenKind::LParen) {
            self.argument_list()?
        } else {
            Vec::new()
        };
        let target = self.arena.add(Node::FnInvoke {
            name,
            args,
            pos: name_pos,
        });
        Ok(self.arena.add(Node::Drop {
            target,
            pos: drop_tok.pos,
        }))
    }

    fn expression(&mut self) -> Result<NodeId, ParseError> {
        let mut lhs = self.term()?;
        while matches!(self.peek().kind, TokenKind::DotDot) {
            let op = self.advance();
            let rhs = self.term()?;
            lhs = self.arena.add(Node::Concat {
                lhs,
                rhs,
                pos: op.pos,
            });
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<NodeId, ParseError> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Str(value) => {
                self.advance();
                Ok(self.arena.add(Node::String {
                    value,
                    pos: token.pos,
                }))
            }
            TokenKind::Bang => {
                self.advance();
                let expr = self.term()?;
                Ok(self.arena.add(Node::Codeify {
                    expr,
                    pos: token.pos,
                }))
            }
            TokenKind::LBrace => self.block(),
            TokenKind::KwMatch => self.match_expression(),
            TokenKind::KwPrefix => self.prefix_scope(),
            TokenKind::LParen => {
                self.advance();
                let expr = self.expression()?;
                self.expect(&TokenKind::RParen, "')'")?;
                Ok(expr)
            }
            TokenKind::Ident(name) => {
                self.advance();
                self.invocation(name, token.pos)
            }
            _ => Err(self.unexpected("an expression")),
        }
    }

    /// A call `name(args...)` or a bare `name` (a zero-argument call).
    /// Intrinsic names resolve here.
    fn invocation(&mut self, name: String, pos: Position) -> Result<NodeId, ParseError> {
        let args = if matches!(self.peek().kind, TokenKind::LParen) {
            self.argument_list()?
        } else {
            Vec::new()
        };

        match intrinsics::lookup(&name) {
            Some(kind) => Ok(self.arena.add(Node::Intrinsic {
                kind,
                name,
                exprs: args,
                pos,
            })),
            None => Ok(self.arena.add(Node::FnInvoke { name, args, pos })),
        }
    }

    fn argument_list(&mut self) -> Result<Vec<NodeId>, ParseError> {
        self.expect(&TokenKind::LParen, "'('")?;
        let mut args = Vec::new();
        if self.eat(&TokenKind::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            if self.eat(&TokenKind::Comma) {
                continue;
            }
            self.expect(&TokenKind::RParen, "')' after the arguments")?;
            break;
        }
        Ok(args)
    }

    /// `{ stmts... expr }` - the last item must be an expression; its value
    /// is the block's value.
    fn block(&mut self) -> Result<NodeId, ParseError> {
        let brace = self.advance();
        let mut stmts = Vec::new();
        loop {
            self.skip_semicolons();
            if matches!(self.peek().kind, TokenKind::RBrace) {
                self.advance();
                break;
            }
            if self.at_eof() {
                return Err(self.unexpected("'}' to close the block"));
            }
            stmts.push(self.statement()?);
        }

        let trailing = stmts.pop();
        let expr = match trailing {
            Some(expr) if !self.is_definition(expr) => expr,
            _ => {
                return Err(ParseError::new(
                    brace.pos,
                    "a block must end with an expression",
                ));
            }
        };

        Ok(self.arena.add(Node::Block {
            stmts,
            expr,
            pos: brace.pos,
        }))
    }

    fn is_definition(&self, id: NodeId) -> bool {
        matches!(
            self.arena.get(id),
            Node::Fn { .. } | Node::Var { .. } | Node::Drop { .. }
        )
    }

    /// `match test { pattern -> body, ..., * -> default }`
    fn match_expression(&mut self) -> Result<NodeId, ParseError> {
        let kw = self.advance();
        let test = self.expression()?;
        self.expect(&TokenKind::LBrace, "'{' after the match test")?;

        let mut arms = Vec::new();
        let mut default = NodeId::EMPTY;
        loop {
            if self.eat(&TokenKind::RBrace) {
                break;
            }
            if matches!(self.peek().kind, TokenKind::Star) {
                let star = self.advance();
                self.expect(&TokenKind::Arrow, "'->' after '*'")?;
                let body = self.expression()?;
                if !default.is_empty() {
                    return Err(ParseError::new(star.pos, "duplicate default arm in match"));
                }
                default = body;
            } else {
                let pattern = self.expression()?;
                self.expect(&TokenKind::Arrow, "'->' after the arm pattern")?;
                let body = self.expression()?;
                arms.push((pattern, body));
            }

            if !matches!(self.peek().kind, TokenKind::RBrace) {
                self.expect(&TokenKind::Comma, "',' between match arms")?;
            }
        }

        Ok(self.arena.add(Node::Map {
            test,
            arms,
            default,
            pos: kw.pos,
        }))
    }

    /// `prefix expr { stmts... }` - no trailing-expression requirement;
    /// nested scopes grow the expression list during evaluation.
    fn prefix_scope(&mut self) -> Result<NodeId, ParseError> {
        let kw = self.advance();
        let prefix_expr = self.expression()?;
        self.expect(&TokenKind::LBrace, "'{' after the prefix expression")?;

        let mut stmts = Vec::new();
        loop {
            self.skip_semicolons();
            if matches!(self.peek().kind, TokenKind::RBrace) {
                self.advance();
                break;
            }
            if self.at_eof() {
                return Err(self.unexpected("'}' to close the prefix scope"));
            }
            stmts.push(self.statement()?);
        }

        Ok(self.arena.add(Node::Pre {
            exprs: vec![prefix_expr],
            stmts,
            pos: kw.pos,
        }))
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::sexpr::to_sexpr;

    /// Expected outcome of parsing one test document
    #[derive(Debug)]
    enum ParseExpect {
        /// Parses successfully and renders to this S-expression
        Sexpr(&'static str),
        /// Fails with an error containing this fragment
        SpecificError(&'static str),
    }
    use ParseExpect::*;

    fn run_parse_tests(cases: Vec<(&str, ParseExpect)>) {
        for (i, (input, expected)) in cases.iter().enumerate() {
            let test_id = format!("parse case #{}", i + 1);
            let mut arena = Arena::new();
            match (parse_into("<test>", input, &mut arena), expected) {
                (Ok(root), Sexpr(expected_sexpr)) => {
                    let rendered = to_sexpr(&arena, root);
                    assert_eq!(&rendered, expected_sexpr, "{test_id}: input {input:?}");
                }
                (Err(err), SpecificError(fragment)) => {
                    let message = err.to_string();
                    assert!(
                        message.contains(fragment),
                        "{test_id}: input {input:?}: expected {fragment:?} in {message:?}"
                    );
                }
                (Ok(root), SpecificError(fragment)) => {
                    panic!(
                        "{test_id}: input {input:?}: expected error containing {fragment:?}, parsed {}",
                        to_sexpr(&arena, root)
                    );
                }
                (Err(err), Sexpr(_)) => {
                    panic!("{test_id}: input {input:?}: unexpected parse error {err}");
                }
            }
        }
    }

    #[test]
    fn test_parser_comprehensive() {
        let cases = vec![
            // ===== LITERALS AND CONCAT =====
            (r#""hi""#, Sexpr(r#"(document (str "hi"))"#)),
            ("", Sexpr("(document)")),
            (
                r#""a" .. "b" .. "c""#,
                Sexpr(r#"(document (cat (cat (str "a") (str "b")) (str "c")))"#),
            ),
            (
                r#"("a" .. "b")"#,
                Sexpr(r#"(document (cat (str "a") (str "b")))"#),
            ),
            // ===== DEFINITIONS =====
            (
                r#"let greet(x) => "hello " .. x"#,
                Sexpr(r#"(document (let (greet x) (cat (str "hello ") (call x))))"#),
            ),
            (
                r#"let pair(a, b) => a .. b"#,
                Sexpr(r#"(document (let (pair a b) (cat (call a) (call b))))"#),
            ),
            (r#"let z() => "v""#, Sexpr(r#"(document (let (z) (str "v")))"#)),
            (r#"let v => "x""#, Sexpr(r#"(document (var v (str "x")))"#)),
            // ===== INVOCATIONS =====
            (
                r#"greet("world")"#,
                Sexpr(r#"(document (call greet (str "world")))"#),
            ),
            ("bare", Sexpr("(document (call bare))")),
            (
                r#"outer(inner("x"), "y")"#,
                Sexpr(r#"(document (call outer (call inner (str "x")) (str "y")))"#),
            ),
            // ===== STATEMENT SEPARATORS =====
            (
                r#"let x => "A"; x"#,
                Sexpr(r#"(document (var x (str "A")) (call x))"#),
            ),
            (
                ";;; \"a\" ;; \"b\" ;",
                Sexpr(r#"(document (str "a") (str "b"))"#),
            ),
            // ===== BLOCKS =====
            (
                r#"{ "side"; "result" }"#,
                Sexpr(r#"(document (block (str "side") (str "result")))"#),
            ),
            (
                r#"{ let f() => "F"; f() }"#,
                Sexpr(r#"(document (block (let (f) (str "F")) (call f)))"#),
            ),
            ("{ }", SpecificError("a block must end with an expression")),
            (
                r#"{ let f() => "F"; }"#,
                SpecificError("a block must end with an expression"),
            ),
            ("{ \"x\"", SpecificError("expected '}' to close the block")),
            // ===== MATCH =====
            (
                r#"match "b" { "a" -> "1", "b" -> "2", * -> "3" }"#,
                Sexpr(
                    r#"(document (match (str "b") (arm (str "a") (str "1")) (arm (str "b") (str "2")) (default (str "3"))))"#,
                ),
            ),
            (
                r#"match t() { "a" -> "1" }"#,
                Sexpr(r#"(document (match (call t) (arm (str "a") (str "1"))))"#),
            ),
            // trailing comma is allowed
            (
                r#"match "x" { "a" -> "1", }"#,
                Sexpr(r#"(document (match (str "x") (arm (str "a") (str "1"))))"#),
            ),
            (
                r#"match "x" { * -> "1", * -> "2" }"#,
                SpecificError("duplicate default arm in match"),
            ),
            (
                r#"match "x" { "a" "1" }"#,
                SpecificError("expected '->' after the arm pattern"),
            ),
            // ===== PREFIX =====
            (
                r#"prefix "ns_" { let g() => "hi"; }"#,
                Sexpr(r#"(document (prefix (exprs (str "ns_")) (let (g) (str "hi"))))"#),
            ),
            (
                r#"prefix "a_" { prefix "b_" { let f() => "x"; } }"#,
                Sexpr(
                    r#"(document (prefix (exprs (str "a_")) (prefix (exprs (str "b_")) (let (f) (str "x")))))"#,
                ),
            ),
            // ===== DROP =====
            (
                "drop f()",
                Sexpr("(document (drop (call f)))"),
            ),
            (
                r#"drop f("a", "b")"#,
                Sexpr(r#"(document (drop (call f (str "a") (str "b"))))"#),
            ),
            ("drop", SpecificError("expected a function name after 'drop'")),
            // ===== CODEIFY =====
            (
                "!code",
                Sexpr("(document (codeify (call code)))"),
            ),
            (
                r#"!"let x => \"1\"""#,
                Sexpr(r#"(document (codeify (str "let x => \"1\"")))"#),
            ),
            // ===== INTRINSICS =====
            (
                r#"slice("abcdef", "1", "-2")"#,
                Sexpr(r#"(document (intrinsic slice (str "abcdef") (str "1") (str "-2")))"#),
            ),
            (
                r#"run("echo hi")"#,
                Sexpr(r#"(document (intrinsic run (str "echo hi")))"#),
            ),
            // intrinsic arity is an evaluation failure, not a parse failure
            (
                r#"length()"#,
                Sexpr("(document (intrinsic length))"),
            ),
            (
                r#"let length(x) => x"#,
                SpecificError("'length' is an intrinsic and cannot be redefined"),
            ),
            // ===== GENERAL ERRORS =====
            ("let", SpecificError("expected a name after 'let'")),
            ("let f", SpecificError("expected '=>' after the variable name")),
            ("let f(", SpecificError("expected a parameter name")),
            (
                r#"let f(a "b") => a"#,
                SpecificError("expected ')' after the parameter list"),
            ),
            (r#""a" .."#, SpecificError("expected an expression")),
            (r#"f("x""#, SpecificError("expected ')' after the arguments")),
            ("=>", SpecificError("expected an expression")),
            (r#"("a""#, SpecificError("expected ')'")),
        ];

        run_parse_tests(cases);
    }

    #[test]
    fn test_parse_errors_carry_positions() {
        let mut arena = Arena::new();
        let err = parse_into("<test>", "let ok => \"1\"\nlet", &mut arena).unwrap_err();
        assert_eq!(err.pos.to_string(), "<test>:2:4");

        let mut arena = Arena::new();
        let err = parse_into("<test>", r#""a" ,, "b""#, &mut arena).unwrap_err();
        assert_eq!(err.pos.line, 1);
        assert_eq!(err.pos.column, 5);
    }

    #[test]
    fn test_reentrant_parses_share_the_arena() {
        let mut arena = Arena::new();
        let first = parse_into("<test>", r#""one""#, &mut arena).unwrap();
        let before = arena.len();
        let second = parse_into("<eval>", r#""two""#, &mut arena).unwrap();
        assert_ne!(first, second);
        assert!(arena.len() > before);
        // the first document's nodes are untouched
        assert!(matches!(arena.get(first), Node::Document { .. }));
    }
}
