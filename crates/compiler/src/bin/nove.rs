//! Novus front-end CLI.
//!
//! Reads a source file (or inline source text), lexes and parses it, and
//! reports diagnostics for every error node with its source span. The
//! analysis and bytecode stages sit behind this front end; `--tokens` and
//! `--tree` expose the intermediate forms.

use clap::Parser as ClapParser;
use novc::node::Node;
use std::path::Path;
use std::process::ExitCode;

#[derive(ClapParser)]
#[command(name = "nove")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Novus evaluator - parse Novus source and report diagnostics", long_about = None)]
struct Cli {
    /// Source file path, or inline Novus source text
    input: String,

    /// Dump the token stream
    #[arg(long)]
    tokens: bool,

    /// Dump the parse tree
    #[arg(long)]
    tree: bool,

    /// Arguments passed through to the program's environment
    #[arg(trailing_var_arg = true)]
    env_args: Vec<String>,
}

fn print_tree(node: &Node, depth: usize) {
    println!("{}{node}", "  ".repeat(depth));
    node.for_each_child(|child| print_tree(child, depth + 1));
}

fn report_errors(node: &Node, source_name: &str, count: &mut usize) {
    if let Node::Error { msg, .. } = node {
        let span = node.span();
        eprintln!("{source_name}:{}-{}: {msg}", span.start, span.end);
        *count += 1;
    }
    node.for_each_child(|child| report_errors(child, source_name, count));
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("NOV_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let path = Path::new(&cli.input);
    let (source_name, source) = if path.is_file() {
        match std::fs::read_to_string(path) {
            Ok(source) => (cli.input.clone(), source),
            Err(err) => {
                eprintln!("nove: failed to read '{}': {err}", cli.input);
                return ExitCode::from(1);
            }
        }
    } else {
        ("inline".to_string(), cli.input.clone())
    };

    if cli.tokens {
        for token in novc::lex(&source) {
            println!("{token}");
        }
    }

    let stmts = novc::parse(&source);
    if cli.tree {
        for stmt in &stmts {
            print_tree(stmt, 0);
        }
    }

    let mut errors = 0;
    for stmt in &stmts {
        report_errors(stmt, &source_name, &mut errors);
    }
    if errors > 0 {
        eprintln!("{errors} parse error(s)");
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}
