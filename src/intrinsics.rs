//! Built-in operations registry.
//!
//! Intrinsics are the operations the evaluator provides that user code cannot
//! define: string inspection (`slice`, `find`, `length`, `escape`), assertion
//! and error raising, filesystem access (`file`, `source`), re-entrant
//! evaluation of generated source (`eval`), and shell execution (`run`,
//! `pipe`).
//!
//! They are kept in a single auditable table of (kind, name, arity). The
//! parser resolves intrinsic names while building the AST, so the names are
//! reserved; the evaluator validates the exact argument count before
//! dispatching and fails with `<name> takes exactly N arguments.` on a
//! mismatch.
//!
//! ## Error handling
//!
//! Every failure carries the call-site position. Failures inside the
//! re-entrant forms are wrapped so the outer document sees where the nested
//! evaluation was triggered (`inside eval: ...`, `inside source: ...`).
//!
//! ## Shell execution
//!
//! `run` and `pipe` hand the command string to the host shell verbatim and
//! capture standard output, trimming a single trailing newline. They are
//! compiled in under the `run` cargo feature; without it they fail with
//! `run not available.` / `pipe not available.` without evaluating their
//! arguments.

use std::fs;

use crate::ast::{NodeId, Position};
use crate::evaluator::{Environment, Scope, eval_node};
use crate::{EvalError, EvalErrorCause, parser};

/// Identifies one built-in operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntrinsicKind {
    Assert,
    Error,
    File,
    Source,
    Log,
    Escape,
    Slice,
    Find,
    Length,
    Eval,
    Run,
    Pipe,
}

impl IntrinsicKind {
    /// Exact number of arguments this operation takes.
    pub fn arity(self) -> usize {
        match self {
            IntrinsicKind::Slice => 3,
            IntrinsicKind::Assert | IntrinsicKind::Find | IntrinsicKind::Pipe => 2,
            IntrinsicKind::Error
            | IntrinsicKind::File
            | IntrinsicKind::Source
            | IntrinsicKind::Log
            | IntrinsicKind::Escape
            | IntrinsicKind::Length
            | IntrinsicKind::Eval
            | IntrinsicKind::Run => 1,
        }
    }
}

/// One row of the intrinsic registry.
#[derive(Debug, Clone, Copy)]
pub struct IntrinsicDef {
    pub kind: IntrinsicKind,
    pub name: &'static str,
    pub arity: usize,
}

/// The fixed registry. Names listed here are reserved words of the language.
pub const INTRINSICS: &[IntrinsicDef] = &[
    IntrinsicDef { kind: IntrinsicKind::Assert, name: "assert", arity: 2 },
    IntrinsicDef { kind: IntrinsicKind::Error, name: "error", arity: 1 },
    IntrinsicDef { kind: IntrinsicKind::File, name: "file", arity: 1 },
    IntrinsicDef { kind: IntrinsicKind::Source, name: "source", arity: 1 },
    IntrinsicDef { kind: IntrinsicKind::Log, name: "log", arity: 1 },
    IntrinsicDef { kind: IntrinsicKind::Escape, name: "escape", arity: 1 },
    IntrinsicDef { kind: IntrinsicKind::Slice, name: "slice", arity: 3 },
    IntrinsicDef { kind: IntrinsicKind::Find, name: "find", arity: 2 },
    IntrinsicDef { kind: IntrinsicKind::Length, name: "length", arity: 1 },
    IntrinsicDef { kind: IntrinsicKind::Eval, name: "eval", arity: 1 },
    IntrinsicDef { kind: IntrinsicKind::Run, name: "run", arity: 1 },
    IntrinsicDef { kind: IntrinsicKind::Pipe, name: "pipe", arity: 2 },
];

/// Look up an intrinsic by its source name.
pub fn lookup(name: &str) -> Option<IntrinsicKind> {
    INTRINSICS.iter().find(|def| def.name == name).map(|def| def.kind)
}

/// Validate arity and dispatch an intrinsic call.
pub(crate) fn call(
    kind: IntrinsicKind,
    name: &str,
    exprs: &[NodeId],
    pos: &Position,
    env: &mut Environment,
    scope: Option<&Scope>,
    depth: usize,
) -> Result<String, EvalError> {
    let expected = kind.arity();
    if exprs.len() != expected {
        return Err(EvalError::new(
            pos.clone(),
            EvalErrorCause::Arity,
            format!("{name} takes exactly {expected} arguments."),
        ));
    }

    match kind {
        IntrinsicKind::Assert => intrinsic_assert(exprs[0], exprs[1], pos, env, scope, depth),
        IntrinsicKind::Error => intrinsic_error(exprs[0], pos, env, scope, depth),
        IntrinsicKind::File => intrinsic_file(exprs[0], pos, env, scope, depth),
        IntrinsicKind::Source => intrinsic_source(exprs[0], pos, env, scope, depth),
        IntrinsicKind::Log => intrinsic_log(exprs[0], env, scope, depth),
        IntrinsicKind::Escape => intrinsic_escape(exprs[0], env, scope, depth),
        IntrinsicKind::Slice => {
            intrinsic_slice(exprs[0], exprs[1], exprs[2], pos, env, scope, depth)
        }
        IntrinsicKind::Find => intrinsic_find(exprs[0], exprs[1], env, scope, depth),
        IntrinsicKind::Length => intrinsic_length(exprs[0], env, scope, depth),
        IntrinsicKind::Eval => intrinsic_eval(exprs[0], pos, env, scope, depth),
        IntrinsicKind::Run => intrinsic_run(exprs[0], pos, env, scope, depth),
        IntrinsicKind::Pipe => intrinsic_pipe(exprs[0], exprs[1], pos, env, scope, depth),
    }
}

fn intrinsic_assert(
    a: NodeId,
    b: NodeId,
    pos: &Position,
    env: &mut Environment,
    scope: Option<&Scope>,
    depth: usize,
) -> Result<String, EvalError> {
    let str_a = eval_node(a, env, scope, depth + 1)?;
    let str_b = eval_node(b, env, scope, depth + 1)?;

    if str_a != str_b {
        return Err(EvalError::new(
            pos.clone(),
            EvalErrorCause::User,
            "assertion failed",
        ));
    }
    Ok(String::new())
}

fn intrinsic_error(
    expr: NodeId,
    pos: &Position,
    env: &mut Environment,
    scope: Option<&Scope>,
    depth: usize,
) -> Result<String, EvalError> {
    let message = eval_node(expr, env, scope, depth + 1)?;
    Err(EvalError::new(pos.clone(), EvalErrorCause::User, message))
}

fn intrinsic_file(
    expr: NodeId,
    pos: &Position,
    env: &mut Environment,
    scope: Option<&Scope>,
    depth: usize,
) -> Result<String, EvalError> {
    let fname = eval_node(expr, env, scope, depth + 1)?;
    let path = env.cwd.join(&fname);
    fs::read_to_string(&path).map_err(|_| {
        EvalError::new(
            pos.clone(),
            EvalErrorCause::Io,
            format!("failed reading file '{fname}'"),
        )
    })
}

/// Read, parse and evaluate another document in place. Relative paths inside
/// the included document resolve against the included file's directory: the
/// working directory is swapped for the nested evaluation and restored on
/// every exit path.
fn intrinsic_source(
    expr: NodeId,
    pos: &Position,
    env: &mut Environment,
    scope: Option<&Scope>,
    depth: usize,
) -> Result<String, EvalError> {
    let fname = eval_node(expr, env, scope, depth + 1)?;
    let path = env.cwd.join(&fname);

    let text = fs::read_to_string(&path).map_err(|_| {
        EvalError::new(
            pos.clone(),
            EvalErrorCause::Io,
            format!("file '{fname}' not found."),
        )
    })?;

    // Diagnostics for the included file are reported relative to the
    // environment base, like the top-level document's own path.
    let report_name = match path.strip_prefix(&env.base) {
        Ok(relative) => relative.display().to_string(),
        Err(_) => path.display().to_string(),
    };

    let root = parser::parse_into(&report_name, &text, &mut env.arena).map_err(|e| {
        EvalError::new(
            pos.clone(),
            EvalErrorCause::Nested,
            format!("inside source: {e}"),
        )
    })?;

    let included_dir = match path.parent() {
        Some(parent) => parent.to_path_buf(),
        None => env.cwd.clone(),
    };
    let saved = std::mem::replace(&mut env.cwd, included_dir);
    let result = eval_node(root, env, scope, depth + 1);
    env.cwd = saved;

    result.map_err(|e| {
        EvalError::new(
            pos.clone(),
            EvalErrorCause::Nested,
            format!("inside source: {e}"),
        )
    })
}

fn intrinsic_log(
    expr: NodeId,
    env: &mut Environment,
    scope: Option<&Scope>,
    depth: usize,
) -> Result<String, EvalError> {
    let text = eval_node(expr, env, scope, depth + 1)?;
    env.log(text);
    Ok(String::new())
}

fn intrinsic_escape(
    expr: NodeId,
    env: &mut Environment,
    scope: Option<&Scope>,
    depth: usize,
) -> Result<String, EvalError> {
    let input = eval_node(expr, env, scope, depth + 1)?;
    let mut out = String::with_capacity(input.len());

    for c in input.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    Ok(out)
}

fn intrinsic_slice(
    string_expr: NodeId,
    start_expr: NodeId,
    end_expr: NodeId,
    pos: &Position,
    env: &mut Environment,
    scope: Option<&Scope>,
    depth: usize,
) -> Result<String, EvalError> {
    let string = eval_node(string_expr, env, scope, depth + 1)?;
    let start_raw = eval_node(start_expr, env, scope, depth + 1)?;
    let end_raw = eval_node(end_expr, env, scope, depth + 1)?;

    let domain = |message: &str| {
        EvalError::new(pos.clone(), EvalErrorCause::Domain, message.to_owned())
    };

    let (start, end) = match (start_raw.parse::<i64>(), end_raw.parse::<i64>()) {
        (Ok(start), Ok(end)) => (start, end),
        _ => return Err(domain("slice range must be numerical.")),
    };

    // The window is described by a begin index and an inclusive length, both
    // of which may be computed from the end of the string.
    let len = string.len() as i64;
    let begin = if start < 0 { len + start } else { start };
    let count = if end < 0 {
        (len + end) - begin + 1
    } else {
        end - begin + 1
    };

    if count <= 0 {
        Err(domain("end of slice cannot be before the start."))
    } else if begin < 0 || begin + count > len {
        Err(domain("slice extends outside of string bounds."))
    } else if start < 0 && end >= 0 {
        Err(domain("start cannot be negative where end is positive."))
    } else {
        let window = &string.as_bytes()[begin as usize..(begin + count) as usize];
        Ok(String::from_utf8_lossy(window).into_owned())
    }
}

fn intrinsic_find(
    string_expr: NodeId,
    pattern_expr: NodeId,
    env: &mut Environment,
    scope: Option<&Scope>,
    depth: usize,
) -> Result<String, EvalError> {
    let string = eval_node(string_expr, env, scope, depth + 1)?;
    let pattern = eval_node(pattern_expr, env, scope, depth + 1)?;

    match string.find(&pattern) {
        Some(index) => Ok(index.to_string()),
        None => Ok(String::new()),
    }
}

fn intrinsic_length(
    expr: NodeId,
    env: &mut Environment,
    scope: Option<&Scope>,
    depth: usize,
) -> Result<String, EvalError> {
    let string = eval_node(expr, env, scope, depth + 1)?;
    Ok(string.len().to_string())
}

fn intrinsic_eval(
    expr: NodeId,
    pos: &Position,
    env: &mut Environment,
    scope: Option<&Scope>,
    depth: usize,
) -> Result<String, EvalError> {
    let code = eval_node(expr, env, scope, depth + 1)?;
    eval_code(&code, pos, env, scope, depth)
}

/// Parse `code` as a document into the shared arena and evaluate it. Used by
/// the `eval` intrinsic and by codeify expressions, which share semantics.
pub(crate) fn eval_code(
    code: &str,
    pos: &Position,
    env: &mut Environment,
    scope: Option<&Scope>,
    depth: usize,
) -> Result<String, EvalError> {
    let root = parser::parse_into("<eval>", code, &mut env.arena).map_err(|e| {
        EvalError::new(
            pos.clone(),
            EvalErrorCause::Nested,
            format!("inside eval: {e}"),
        )
    })?;

    eval_node(root, env, scope, depth + 1).map_err(|e| {
        EvalError::new(
            pos.clone(),
            EvalErrorCause::Nested,
            format!("inside eval: {e}"),
        )
    })
}

#[cfg(feature = "run")]
fn intrinsic_run(
    expr: NodeId,
    pos: &Position,
    env: &mut Environment,
    scope: Option<&Scope>,
    depth: usize,
) -> Result<String, EvalError> {
    let command = eval_node(expr, env, scope, depth + 1)?;

    let (stdout, success) = shell::exec(&env.cwd, &command, None).map_err(|e| {
        EvalError::new(
            pos.clone(),
            EvalErrorCause::Subprocess,
            format!("failed running subprocess: {e}"),
        )
    })?;

    if !success {
        return Err(EvalError::new(
            pos.clone(),
            EvalErrorCause::Subprocess,
            "subprocess exited with non-zero status.",
        ));
    }
    Ok(stdout)
}

#[cfg(not(feature = "run"))]
fn intrinsic_run(
    _expr: NodeId,
    pos: &Position,
    _env: &mut Environment,
    _scope: Option<&Scope>,
    _depth: usize,
) -> Result<String, EvalError> {
    Err(EvalError::new(
        pos.clone(),
        EvalErrorCause::Subprocess,
        "run not available.",
    ))
}

#[cfg(feature = "run")]
fn intrinsic_pipe(
    cmd_expr: NodeId,
    data_expr: NodeId,
    pos: &Position,
    env: &mut Environment,
    scope: Option<&Scope>,
    depth: usize,
) -> Result<String, EvalError> {
    let command = eval_node(cmd_expr, env, scope, depth + 1)?;
    let data = eval_node(data_expr, env, scope, depth + 1)?;

    let (stdout, success) = shell::exec(&env.cwd, &command, Some(&data)).map_err(|e| {
        EvalError::new(
            pos.clone(),
            EvalErrorCause::Subprocess,
            format!("failed running subprocess: {e}"),
        )
    })?;

    if !success {
        return Err(EvalError::new(
            pos.clone(),
            EvalErrorCause::Subprocess,
            "subprocess exited with non-zero status.",
        ));
    }
    Ok(stdout)
}

#[cfg(not(feature = "run"))]
fn intrinsic_pipe(
    _cmd_expr: NodeId,
    _data_expr: NodeId,
    pos: &Position,
    _env: &mut Environment,
    _scope: Option<&Scope>,
    _depth: usize,
) -> Result<String, EvalError> {
    Err(EvalError::new(
        pos.clone(),
        EvalErrorCause::Subprocess,
        "pipe not available.",
    ))
}

#[cfg(feature = "run")]
mod shell {
    use std::io::Write;
    use std::path::Path;
    use std::process::{Command, Stdio};

    /// Run `command` through the host shell in `cwd`, optionally piping
    /// `input` to its standard input. Returns captured stdout (with a single
    /// trailing newline trimmed) and whether the exit status was zero.
    pub(super) fn exec(
        cwd: &Path,
        command: &str,
        input: Option<&str>,
    ) -> std::io::Result<(String, bool)> {
        let mut cmd = host_shell(command);
        cmd.current_dir(cwd).stdout(Stdio::piped());
        cmd.stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = cmd.spawn()?;
        if let Some(data) = input {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(data.as_bytes())?;
            }
        }

        let output = child.wait_with_output()?;
        let mut stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if stdout.ends_with('\n') {
            stdout.pop();
        }
        Ok((stdout, output.status.success()))
    }

    #[cfg(windows)]
    fn host_shell(command: &str) -> Command {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    }

    #[cfg(not(windows))]
    fn host_shell(command: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    }
}
