use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::Context;
use clap::Parser as ClapParser;
use tracing_subscriber::{prelude::*, EnvFilter, Registry};

use vesper::runtime::serializer;
use vesper::{diagnostics, lexer, parser, Interpreter};

#[derive(ClapParser, Debug)]
#[command(name = "vesper", version, about = "The Vesper scripting language")]
struct Cli {
    /// Path to a .vsp script. Starts a REPL when omitted.
    #[arg(value_name = "FILE")]
    input: Option<PathBuf>,
    /// Print the token stream produced by the lexer.
    #[arg(long)]
    tokens: bool,
    /// Print the parsed AST instead of evaluating it.
    #[arg(long)]
    ast: bool,
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let Some(path) = cli.input.as_deref() else {
        return repl();
    };

    let source = read_source(path)?;
    if cli.tokens {
        let tokens = match lexer::lex(&source) {
            Ok(tokens) => tokens,
            Err(err) => {
                diagnostics::print_error(&source, &err.into());
                std::process::exit(1);
            }
        };
        println!("-- tokens --");
        for token in &tokens {
            println!("{token:?}");
        }
        return Ok(());
    }

    let program = match parser::parse(&source) {
        Ok(program) => program,
        Err(err) => {
            diagnostics::print_error(&source, &err);
            std::process::exit(1);
        }
    };
    if cli.ast {
        println!("-- ast --");
        println!("{program:#?}");
        return Ok(());
    }

    let mut interpreter = Interpreter::new();
    if let Err(err) = interpreter.interpret(&program) {
        let message = format!("{}: {}", err.error_type(), err.message());
        eprintln!(
            "{}",
            diagnostics::format_diagnostic(&source, Some(err.span()), &message)
        );
        std::process::exit(1);
    }
    Ok(())
}

/// Line-based interpreter session; the call stack and registries persist
/// across inputs.
fn repl() -> anyhow::Result<()> {
    let mut interpreter = Interpreter::new();
    let stdin = io::stdin();
    let mut first_line = true;
    loop {
        print!("> ");
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Ok(());
        }
        let line = line.trim();
        if line == "exit" {
            return Ok(());
        }
        if line.is_empty() {
            continue;
        }
        // The first input pushes the root frame; later ones run in it.
        let parsed = if first_line {
            parser::parse(line)
        } else {
            parser::parse_script(line)
        };
        match parsed {
            Ok(program) => match interpreter.interpret(&program) {
                Ok(value) => {
                    println!("{}", serializer::serialize_quoted(&value));
                    first_line = false;
                }
                Err(err) => diagnostics::print_error(line, &err.into()),
            },
            Err(err) => diagnostics::print_error(line, &err),
        }
    }
}

fn read_source(path: &Path) -> anyhow::Result<String> {
    fs::read_to_string(path)
        .with_context(|| format!("failed to read source file {}", path.display()))
}

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Filtered by `VESPER_LOG` (falling back to `RUST_LOG`), default `warn`.
fn init_tracing() {
    TRACING_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_env("VESPER_LOG")
            .or_else(|_| EnvFilter::try_from_env("RUST_LOG"))
            .unwrap_or_else(|_| EnvFilter::new("warn"));
        Registry::default()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_writer(io::stderr)
                    .compact(),
            )
            .with(filter)
            .init();
    });
}
