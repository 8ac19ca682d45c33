//! Interactive Tails interpreter
//!
//! Reads a line, compiles it through the selected front end against the
//! current data stack, runs it, and echoes the stack right-justified in
//! the prompt gutter. An empty line clears the stack; end of input exits.
//! Compile errors underline the offending source position with a caret
//! and the loop continues.

use clap::Parser as ClapParser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tails_compiler::{forth, smol, CompileError, Compiler};
use tails_core::{vm, Value};
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Width of the stack gutter shown left of the prompt.
const PROMPT_INDENT: usize = 40;

#[derive(ClapParser)]
#[command(name = "tails")]
#[command(version)]
#[command(about = "Tails interpreter: a Forth-like stack language", long_about = None)]
struct Cli {
    /// Use the Smol (infix) front end instead of Forth syntax
    #[arg(long)]
    smol: bool,

    /// Echo the disassembly of each compiled line
    #[arg(long)]
    disasm: bool,
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut editor = match DefaultEditor::new() {
        Ok(e) => e,
        Err(e) => {
            eprintln!("cannot initialize line editor: {}", e);
            std::process::exit(1);
        }
    };

    println!("Tails interpreter!!  Empty line clears stack.  Ctrl-D to exit.");
    let mut stack: Vec<Value> = Vec::new();

    loop {
        let prompt = format!("{} \u{27a4} ", right_justified(&render_stack(&stack)));
        let line = match editor.readline(&prompt) {
            Ok(line) => line,
            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => break,
            Err(e) => {
                eprintln!("input error: {}", e);
                break;
            }
        };

        if line.trim().is_empty() {
            if stack.is_empty() {
                println!("{}", right_justified("Cleared stack."));
            }
            stack.clear();
            continue;
        }

        let _ = editor.add_history_entry(&line);
        if let Err(err) = eval(&line, &mut stack, &cli) {
            report(&err);
        }
    }
}

fn eval(line: &str, stack: &mut Vec<Value>, cli: &Cli) -> Result<(), CompileError> {
    let mut compiler = Compiler::new();
    compiler.set_input_stack(stack);

    let word = if cli.smol {
        smol::parse_with(compiler, line)?
    } else {
        forth::parse_into(&mut compiler, line)?;
        compiler.finish()?
    };

    if word.effect().input_count() > stack.len() {
        return Err(CompileError::new(
            tails_compiler::ErrorKind::StackUnderflow,
            "stack would underflow",
        ));
    }

    debug!(effect = %word.effect(), "compiled line");
    if cli.disasm {
        println!(
            "{}",
            right_justified(&tails_compiler::disasm::disassemble(word.instructions()))
        );
    }

    vm::run(&word, stack);
    Ok(())
}

/// Underlines the error position (the caret sits past the prompt gutter,
/// under the offending token of the line just typed).
fn report(err: &CompileError) {
    if let Some(pos) = err.position {
        println!("{}\u{2b06}", " ".repeat(PROMPT_INDENT + 3 + pos));
    }
    println!("{}Error: {}", " ".repeat(PROMPT_INDENT + 3), err);
}

fn render_stack(stack: &[Value]) -> String {
    let mut out = String::new();
    for v in stack {
        out.push_str(&v.to_string());
        out.push(' ');
    }
    out
}

/// Right-justifies (and left-truncates) into the prompt gutter.
fn right_justified(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let keep = chars.len().min(PROMPT_INDENT);
    let tail: String = chars[chars.len() - keep..].iter().collect();
    format!("{}{}", " ".repeat(PROMPT_INDENT - keep), tail)
}
