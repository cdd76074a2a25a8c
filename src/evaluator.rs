//! The tree-walking evaluator: reduces an arena node to a string, mutating
//! the environment as it goes.
//!
//! Evaluation is single-threaded, synchronous and recursive. The environment
//! carries everything one run shares: the node arena, the function table, the
//! warning mask, the working directory used by filesystem intrinsics, and the
//! buffered diagnostic stream. Function definitions push onto per-name/arity
//! stacks so a redefinition shadows the previous binding and `drop` reveals
//! it again; argument scopes are copied on call entry so a callee's bindings
//! never leak back into its caller.
//!
//! Two node kinds rewrite the arena during evaluation: a variable definition
//! replaces itself with a zero-parameter function over its memoised result,
//! and a `prefix` scope renames the function definitions inside it.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use crate::MAX_EVAL_DEPTH;
use crate::ast::{Arena, Node, NodeId, Position};
use crate::intrinsics;
use crate::{EvalError, EvalErrorCause};

/// Warn when a function is redefined at the same arity.
pub const WARN_FUNC_REDEFINED: u8 = 1 << 0;
/// Warn when reading a parameter that hides a zero-arity function.
pub const WARN_PARAM_SHADOW_FUNC: u8 = 1 << 1;
/// Warn when a callee's parameter overwrites one inherited from its caller.
pub const WARN_PARAM_SHADOW_PARAM: u8 = 1 << 2;
/// Warn when a variable rebinds an existing zero-arity name.
pub const WARN_VARFUNC_REDEFINED: u8 = 1 << 3;

pub const WARN_ALL: u8 =
    WARN_FUNC_REDEFINED | WARN_PARAM_SHADOW_FUNC | WARN_PARAM_SHADOW_PARAM | WARN_VARFUNC_REDEFINED;
pub const WARN_NONE: u8 = 0;

/// One entry of the diagnostic stream: warnings and `log` output. Kept apart
/// from the evaluated output, which only ever goes to the output stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    Warning { pos: Position, message: String },
    Log(String),
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::Warning { pos, message } => write!(f, "warning: {pos}: {message}"),
            Diagnostic::Log(text) => write!(f, "{text}"),
        }
    }
}

/// Per-invocation mapping from parameter name to its already-evaluated
/// value. Copied (never aliased) on call entry.
pub type Scope = HashMap<String, String>;

/// Function definitions keyed by name and arity, so overloads with different
/// parameter counts coexist. Each key owns a stack of definition handles: the
/// top is the current binding, and popping the last entry removes the key.
#[derive(Debug, Default)]
pub struct FunctionTable {
    entries: HashMap<(String, usize), Vec<NodeId>>,
}

impl FunctionTable {
    pub fn new() -> Self {
        FunctionTable {
            entries: HashMap::new(),
        }
    }

    /// Push a definition. Returns true when the key already existed, i.e.
    /// the new definition shadows an earlier one.
    pub fn define(&mut self, name: &str, arity: usize, def: NodeId) -> bool {
        match self.entries.get_mut(&(name.to_owned(), arity)) {
            Some(stack) => {
                stack.push(def);
                true
            }
            None => {
                self.entries.insert((name.to_owned(), arity), vec![def]);
                false
            }
        }
    }

    /// The current (most recent) definition for `name`/`arity`.
    pub fn lookup(&self, name: &str, arity: usize) -> Option<NodeId> {
        self.entries
            .get(&(name.to_owned(), arity))
            .and_then(|stack| stack.last())
            .copied()
    }

    /// Pop the current definition, revealing the shadowed one if any. The
    /// key is removed entirely once its stack empties. Returns false when
    /// the key does not exist.
    pub fn pop(&mut self, name: &str, arity: usize) -> bool {
        let key = (name.to_owned(), arity);
        let Some(stack) = self.entries.get_mut(&key) else {
            return false;
        };
        stack.pop();
        if stack.is_empty() {
            self.entries.remove(&key);
        }
        true
    }

    pub fn exists(&self, name: &str, arity: usize) -> bool {
        self.entries.contains_key(&(name.to_owned(), arity))
    }

    /// Stack height for `name`/`arity`; zero when the key is absent.
    pub fn depth(&self, name: &str, arity: usize) -> usize {
        self.entries
            .get(&(name.to_owned(), arity))
            .map_or(0, Vec::len)
    }
}

/// Everything one run shares: arena, function table, path state, warning
/// mask and the buffered diagnostic stream.
#[derive(Debug)]
pub struct Environment {
    /// Directory diagnostics report include paths against
    pub base: PathBuf,
    /// Directory `file`, `source`, `run` and `pipe` resolve against.
    /// `source` swaps this for the included file's directory and restores it.
    pub cwd: PathBuf,
    pub arena: Arena,
    pub functions: FunctionTable,
    /// Bitset of `WARN_*` flags
    pub warnings: u8,
    /// Evaluation depth limit, surfaced as a regular failure when exceeded
    pub max_depth: usize,
    /// Buffered warnings and `log` output, flushed to stderr by the driver
    pub diagnostics: Vec<Diagnostic>,
}

impl Environment {
    pub fn new(base: impl Into<PathBuf>, warnings: u8) -> Self {
        let base = base.into();
        Environment {
            cwd: base.clone(),
            base,
            arena: Arena::new(),
            functions: FunctionTable::new(),
            warnings,
            max_depth: MAX_EVAL_DEPTH,
            diagnostics: Vec::new(),
        }
    }

    pub fn warning_enabled(&self, flag: u8) -> bool {
        self.warnings & flag != 0
    }

    pub(crate) fn warn(&mut self, pos: Position, message: String) {
        self.diagnostics.push(Diagnostic::Warning { pos, message });
    }

    pub(crate) fn log(&mut self, text: String) {
        self.diagnostics.push(Diagnostic::Log(text));
    }

    /// Drain the buffered diagnostic stream for flushing.
    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }
}

/// Evaluate a document (or any node) to its string value.
pub fn eval(root: NodeId, env: &mut Environment) -> Result<String, EvalError> {
    eval_node(root, env, None, 0)
}

/// How a statement inside a `prefix` scope is treated.
enum PreStmt {
    /// A function definition: rename it, then evaluate it
    Definition,
    /// A nested `prefix`: pass this scope's expressions down, then evaluate
    Nested,
    /// Anything else: evaluate unchanged
    Other,
}

/// The core reduction. `scope` is the current argument scope, absent at the
/// top level; `depth` guards against runaway recursion.
pub(crate) fn eval_node(
    id: NodeId,
    env: &mut Environment,
    scope: Option<&Scope>,
    depth: usize,
) -> Result<String, EvalError> {
    // Nodes are cheap to clone (children are handles), and an owned copy
    // lets the arms mutate the arena freely.
    let node = env.arena.get(id).clone();

    if depth >= env.max_depth {
        return Err(EvalError::new(
            node.pos().clone(),
            EvalErrorCause::Limit,
            format!("evaluation depth limit exceeded (max: {})", env.max_depth),
        ));
    }

    match node {
        Node::String { value, .. } => Ok(value),

        Node::Concat { lhs, rhs, .. } => {
            // Left first: side effects in the left operand are visible to
            // the right operand.
            let mut value = eval_node(lhs, env, scope, depth + 1)?;
            value.push_str(&eval_node(rhs, env, scope, depth + 1)?);
            Ok(value)
        }

        Node::Block { stmts, expr, .. } => {
            let mut value = String::new();
            for stmt in stmts {
                value.push_str(&eval_node(stmt, env, scope, depth + 1)?);
            }
            // Statement output is computed (side effects included) but a
            // block yields only its trailing expression.
            value = eval_node(expr, env, scope, depth + 1)?;
            Ok(value)
        }

        Node::Document { stmts, .. } => {
            let mut output = String::new();
            for stmt in stmts {
                output.push_str(&eval_node(stmt, env, scope, depth + 1)?);
            }
            Ok(output)
        }

        Node::FnInvoke { name, args, pos } => {
            // Arguments hide functions: resolve against the current argument
            // scope first, and only on a miss fall back to the function
            // table.
            if let Some(current) = scope {
                if let Some(value) = current.get(&name) {
                    if !args.is_empty() {
                        return Err(EvalError::new(
                            pos,
                            EvalErrorCause::Resolution,
                            format!("calling argument '{name}' as if it were a function."),
                        ));
                    }
                    let value = value.clone();
                    if env.warning_enabled(WARN_PARAM_SHADOW_FUNC)
                        && env.functions.exists(&name, 0)
                    {
                        env.warn(pos, format!("parameter '{name}' is shadowing a function."));
                    }
                    return Ok(value);
                }
            }

            let Some(def_id) = env.functions.lookup(&name, args.len()) else {
                return Err(EvalError::new(
                    pos,
                    EvalErrorCause::Resolution,
                    format!("func not found: {name}."),
                ));
            };
            let (params, body, def_pos) = match env.arena.get(def_id) {
                Node::Fn {
                    params, body, pos, ..
                } => (params.clone(), *body, pos.clone()),
                _ => {
                    return Err(EvalError::new(
                        pos,
                        EvalErrorCause::Resolution,
                        format!("func not found: {name}."),
                    ));
                }
            };

            // The callee inherits a copy of the caller's scope, then its own
            // evaluated arguments overwrite any inherited entries. Arguments
            // are evaluated left to right against the *caller's* scope, each
            // exactly once.
            let mut call_scope: Scope = match scope {
                Some(current) => current.clone(),
                None => Scope::new(),
            };
            for (param, arg) in params.iter().zip(args.iter()) {
                let value = eval_node(*arg, env, scope, depth + 1)?;
                let shadowed = call_scope.insert(param.clone(), value).is_some();
                if shadowed && env.warning_enabled(WARN_PARAM_SHADOW_PARAM) {
                    env.warn(
                        def_pos.clone(),
                        format!(
                            "parameter '{param}' inside function '{name}' shadows parameter from parent scope."
                        ),
                    );
                }
            }

            eval_node(body, env, Some(&call_scope), depth + 1)
        }

        Node::Fn {
            name, params, pos, ..
        } => {
            let redefined = env.functions.define(&name, params.len(), id);
            if redefined && env.warning_enabled(WARN_FUNC_REDEFINED) {
                env.warn(pos, format!("function '{name}' redefined."));
            }
            Ok(String::new())
        }

        Node::Var { name, body, pos } => {
            let value = eval_node(body, env, scope, depth + 1)?;

            // Memoise: the body becomes its evaluated result, and this node
            // becomes a zero-parameter function over it. Later invocations
            // read the cached string without re-running side effects.
            env.arena.replace(
                body,
                Node::String {
                    value,
                    pos: pos.clone(),
                },
            );
            env.arena.replace(
                id,
                Node::Fn {
                    name: name.clone(),
                    params: Vec::new(),
                    body,
                    pos: pos.clone(),
                },
            );

            let redefined = env.functions.define(&name, 0, id);
            if redefined && env.warning_enabled(WARN_VARFUNC_REDEFINED) {
                env.warn(pos, format!("function/variable '{name}' redefined."));
            }
            Ok(String::new())
        }

        Node::Drop { target, pos } => {
            let (name, arity) = match env.arena.get(target) {
                Node::FnInvoke { name, args, .. } => (name.clone(), args.len()),
                _ => {
                    return Err(EvalError::new(
                        pos,
                        EvalErrorCause::Resolution,
                        "invalid function passed to drop.",
                    ));
                }
            };

            if env.functions.pop(&name, arity) {
                Ok(String::new())
            } else {
                Err(EvalError::new(
                    pos,
                    EvalErrorCause::Resolution,
                    format!("cannot drop undefined function '{name}' ({arity} parameters)."),
                ))
            }
        }

        Node::Codeify { expr, pos } => {
            let code = eval_node(expr, env, scope, depth + 1)?;
            intrinsics::eval_code(&code, &pos, env, scope, depth)
        }

        Node::Map {
            test,
            arms,
            default,
            pos,
        } => {
            let test_value = eval_node(test, env, scope, depth + 1)?;

            // Arms are tried in declared order; patterns after the first
            // match are never evaluated.
            for (pattern, body) in arms {
                if eval_node(pattern, env, scope, depth + 1)? == test_value {
                    return eval_node(body, env, scope, depth + 1);
                }
            }

            if default.is_empty() {
                Err(EvalError::new(
                    pos,
                    EvalErrorCause::Domain,
                    "no matches found.",
                ))
            } else {
                eval_node(default, env, scope, depth + 1)
            }
        }

        Node::Pre { exprs, stmts, .. } => {
            let mut output = String::new();

            for stmt in stmts {
                let treatment = match env.arena.get(stmt) {
                    Node::Fn { .. } => PreStmt::Definition,
                    Node::Pre { .. } => PreStmt::Nested,
                    _ => PreStmt::Other,
                };

                match treatment {
                    PreStmt::Definition => {
                        // The prefix expressions are evaluated in reverse
                        // declaration order: nested scopes append their outer
                        // scope's expressions, so reversal puts the outermost
                        // prefix first in the final name.
                        let mut prefix = String::new();
                        for expr in exprs.iter().rev() {
                            prefix.push_str(&eval_node(*expr, env, scope, depth + 1)?);
                        }
                        if let Node::Fn { name, .. } = env.arena.get_mut(stmt) {
                            name.insert_str(0, &prefix);
                        }
                        output.push_str(&eval_node(stmt, env, scope, depth + 1)?);
                    }
                    PreStmt::Nested => {
                        if let Node::Pre { exprs: inner, .. } = env.arena.get_mut(stmt) {
                            inner.extend(exprs.iter().copied());
                        }
                        output.push_str(&eval_node(stmt, env, scope, depth + 1)?);
                    }
                    PreStmt::Other => {
                        output.push_str(&eval_node(stmt, env, scope, depth + 1)?);
                    }
                }
            }

            Ok(output)
        }

        Node::Intrinsic {
            kind,
            name,
            exprs,
            pos,
        } => intrinsics::call(kind, &name, &exprs, &pos, env, scope, depth),
    }
}
