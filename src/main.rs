//! Command-line driver: evaluate a document to stdout or a file, dump the
//! parsed AST, or run an interactive prompt.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::Parser;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use weft::evaluator::{self, Diagnostic, Environment, WARN_ALL};
use weft::parser::parse_into;
use weft::sexpr::to_sexpr;

#[derive(Parser, Debug)]
#[command(
    name = "weft",
    about = "A small macro language for producing and manipulating strings",
    version
)]
struct Args {
    /// File to read input from
    #[arg(short = 'i', long = "input")]
    input: Option<PathBuf>,

    /// File to output to (stdout by default)
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Print the parsed AST as an S-expression instead of evaluating
    #[arg(short = 's', long = "sexpr")]
    sexpr: bool,

    /// Start an interactive prompt
    #[arg(short = 'r', long = "repl")]
    repl: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    if args.repl {
        return repl();
    }
    let Some(input) = args.input else {
        bail!("no input file given (try --input <path> or --repl)");
    };
    run_file(&input, args.output.as_deref(), args.sexpr)
}

fn run_file(input: &Path, output: Option<&Path>, sexpr_only: bool) -> Result<()> {
    let source = fs::read_to_string(input)
        .with_context(|| format!("failed to read {}", input.display()))?;

    // Relative paths in the document resolve against the document's own
    // directory, and diagnostics for includes are reported against it.
    let absolute = input
        .canonicalize()
        .with_context(|| format!("failed to resolve {}", input.display()))?;
    let base = absolute
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let source_name = input.display().to_string();

    let mut env = Environment::new(base, WARN_ALL);
    let root = parse_into(&source_name, &source, &mut env.arena)?;

    if sexpr_only {
        return write_output(output, &to_sexpr(&env.arena, root));
    }

    // The output is buffered until evaluation completes: a failing document
    // writes nothing to the output stream.
    let result = evaluator::eval(root, &mut env);
    flush_diagnostics(&mut env);
    let rendered = result?;
    write_output(output, &rendered)
}

fn write_output(output: Option<&Path>, rendered: &str) -> Result<()> {
    match output {
        Some(path) => fs::write(path, rendered)
            .with_context(|| format!("failed to write {}", path.display())),
        None => {
            let mut stdout = std::io::stdout();
            stdout.write_all(rendered.as_bytes())?;
            stdout.flush()?;
            Ok(())
        }
    }
}

/// Warnings and `log` output go to stderr, success or not.
fn flush_diagnostics(env: &mut Environment) {
    for diagnostic in env.take_diagnostics() {
        match diagnostic {
            Diagnostic::Warning { .. } => eprintln!("{diagnostic}"),
            Diagnostic::Log(_) => eprint!("{diagnostic}"),
        }
    }
}

fn repl() -> Result<()> {
    println!("weft - a small macro language for producing and manipulating strings");
    println!("Enter statements like: let greet(x) => \"hello \" .. x; greet(\"you\")");
    println!("Press Ctrl-D to exit.");
    println!();

    let mut rl = DefaultEditor::new()?;
    let cwd = std::env::current_dir().context("failed to read the current directory")?;
    let mut env = Environment::new(cwd, WARN_ALL);

    loop {
        match rl.readline("weft> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);

                // Each line is a document evaluated against the persistent
                // environment, so definitions survive between lines.
                match parse_into("<repl>", line, &mut env.arena) {
                    Ok(root) => {
                        let result = evaluator::eval(root, &mut env);
                        flush_diagnostics(&mut env);
                        match result {
                            Ok(out) => {
                                if !out.is_empty() {
                                    println!("{out}");
                                }
                            }
                            Err(e) => eprintln!("error: {e}"),
                        }
                    }
                    Err(e) => eprintln!("error: {e}"),
                }
            }
            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => break,
            Err(err) => {
                eprintln!("error: {err}");
                break;
            }
        }
    }
    Ok(())
}
