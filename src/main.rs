use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::Colorize;
use miette::{IntoDiagnostic, Result};

use braid::{AsmParser, Machine, Program};

/// Braid is an assembler and interpreter for a reduced ARM instruction set.
#[derive(Parser)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Quickly provide a `.s` file to run
    path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Assemble and run a `.s` file, then dump final register values
    Run {
        /// `.s` file to run
        name: PathBuf,
        /// Block on a line of input before each instruction
        #[arg(short, long)]
        step: bool,
        /// Produce minimal output, suited for blackbox tests
        #[arg(short, long)]
        minimal: bool,
    },
    /// Assemble a `.s` file without running or dumping anything
    Check {
        /// File to check
        name: PathBuf,
    },
}

fn main() -> miette::Result<()> {
    use MsgColor::*;
    let args = Args::parse();

    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new() //
                .context_lines(braid::DIAGNOSTIC_CONTEXT_LINES)
                .build(),
        )
    }))?;

    if let Some(command) = args.command {
        match command {
            Command::Run {
                name,
                step,
                minimal,
            } => run(&name, step, minimal),
            Command::Check { name } => {
                file_message(Green, "Checking", &name);
                let contents = fs::read_to_string(&name).into_diagnostic()?;
                let _ = assemble(&contents)?;
                message(Green, "Success", "no errors found!");
                Ok(())
            }
        }
    } else if let Some(path) = args.path {
        run(&path, false, false)
    } else {
        println!("\n~ braid v{VERSION} ~");
        println!("{}", LOGO.cyan().bold());
        println!("{SHORT_INFO}");
        Ok(())
    }
}

#[allow(unused)]
enum MsgColor {
    Green,
    Cyan,
    Red,
}

fn file_message(color: MsgColor, left: &str, right: &PathBuf) {
    let right = format!("target {}", right.display());
    message(color, left, &right);
}

fn message<S>(color: MsgColor, left: S, right: S)
where
    S: Colorize + std::fmt::Display,
{
    let left = match color {
        MsgColor::Green => left.green(),
        MsgColor::Cyan => left.cyan(),
        MsgColor::Red => left.red(),
    };
    println!("{left:>12} {right}");
}

fn run(name: &PathBuf, step: bool, minimal: bool) -> Result<()> {
    if !minimal {
        file_message(MsgColor::Green, "Assembling", name);
    }
    let contents = fs::read_to_string(name).into_diagnostic()?;
    let program = assemble(&contents)?;
    let mut machine = Machine::try_from(program, step)?;

    if !minimal {
        message(MsgColor::Green, "Running", "assembled program");
    }
    machine.run()?;

    if !minimal {
        file_message(MsgColor::Green, "Completed", name);
        println!("Final register values:");
        for (reg, val) in machine.registers() {
            println!("{reg} = {val}");
        }
    }
    Ok(())
}

/// Return the assembled and backpatched program for further processing
fn assemble(contents: &str) -> Result<Program> {
    let program = AsmParser::new(contents).parse()?;
    program
        .backpatch()
        .map_err(|e| e.with_source_code(contents.to_string()))?;
    Ok(program)
}

const LOGO: &str = r"
  |\ /| /
  | X |<
  |/ \| \";

const SHORT_INFO: &str = r"
Welcome to braid, an assembler and interpreter for a reduced ARM
instruction set. Please use `-h` or `--help` to access the usage
instructions and documentation.
";

const VERSION: &str = env!("CARGO_PKG_VERSION");
