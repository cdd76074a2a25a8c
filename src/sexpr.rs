//! Renders an arena subtree as a parenthesised S-expression. Used by the
//! `--sexpr` flag to inspect what the parser built without evaluating it.

use std::fmt::Write;

use crate::ast::{Arena, Node, NodeId};

/// Render the subtree rooted at `id` as an S-expression.
pub fn to_sexpr(arena: &Arena, id: NodeId) -> String {
    let mut out = String::new();
    write_node(arena, id, &mut out);
    out
}

fn write_node(arena: &Arena, id: NodeId, out: &mut String) {
    match arena.get(id) {
        Node::String { value, .. } => {
            let _ = write!(out, "(str \"{}\")", escape(value));
        }
        Node::Concat { lhs, rhs, .. } => {
            out.push_str("(cat ");
            write_node(arena, *lhs, out);
            out.push(' ');
            write_node(arena, *rhs, out);
            out.push(')');
        }
        Node::Block { stmts, expr, .. } => {
            out.push_str("(block");
            for stmt in stmts {
                out.push(' ');
                write_node(arena, *stmt, out);
            }
            out.push(' ');
            write_node(arena, *expr, out);
            out.push(')');
        }
        Node::FnInvoke { name, args, .. } => {
            let _ = write!(out, "(call {name}");
            for arg in args {
                out.push(' ');
                write_node(arena, *arg, out);
            }
            out.push(')');
        }
        Node::Fn {
            name, params, body, ..
        } => {
            let _ = write!(out, "(let ({name}");
            for param in params {
                let _ = write!(out, " {param}");
            }
            out.push_str(") ");
            write_node(arena, *body, out);
            out.push(')');
        }
        Node::Var { name, body, .. } => {
            let _ = write!(out, "(var {name} ");
            write_node(arena, *body, out);
            out.push(')');
        }
        Node::Drop { target, .. } => {
            out.push_str("(drop ");
            write_node(arena, *target, out);
            out.push(')');
        }
        Node::Codeify { expr, .. } => {
            out.push_str("(codeify ");
            write_node(arena, *expr, out);
            out.push(')');
        }
        Node::Map {
            test,
            arms,
            default,
            ..
        } => {
            out.push_str("(match ");
            write_node(arena, *test, out);
            for (pattern, body) in arms {
                out.push_str(" (arm ");
                write_node(arena, *pattern, out);
                out.push(' ');
                write_node(arena, *body, out);
                out.push(')');
            }
            if !default.is_empty() {
                out.push_str(" (default ");
                write_node(arena, *default, out);
                out.push(')');
            }
            out.push(')');
        }
        Node::Pre { exprs, stmts, .. } => {
            out.push_str("(prefix (exprs");
            for expr in exprs {
                out.push(' ');
                write_node(arena, *expr, out);
            }
            out.push(')');
            for stmt in stmts {
                out.push(' ');
                write_node(arena, *stmt, out);
            }
            out.push(')');
        }
        Node::Intrinsic { name, exprs, .. } => {
            let _ = write!(out, "(intrinsic {name}");
            for expr in exprs {
                out.push(' ');
                write_node(arena, *expr, out);
            }
            out.push(')');
        }
        Node::Document { stmts, .. } => {
            out.push_str("(document");
            for stmt in stmts {
                out.push(' ');
                write_node(arena, *stmt, out);
            }
            out.push(')');
        }
    }
}

/// Escape a string literal for the dump: backslashes, quotes and the
/// whitespace escapes the lexer understands.
fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    out
}
