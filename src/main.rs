use std::path::PathBuf;

use clap::{CommandFactory, Parser as ClapParser, error::ErrorKind};
use colored::Colorize;
use sbc::{
    CompileOptions, compile,
    frontend::{SourceFile, SourceFileOrigin},
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, ClapParser)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Source file to compile
    input: PathBuf,
    /// Where to write the generated NASM assembly
    output: PathBuf,
    /// Skip the MIR and LIR optimization passes
    #[arg(long)]
    no_optimize: bool,
    /// Annotate the assembly with the LIR it was generated from
    #[arg(long)]
    debug_comments: bool,
    /// Print the MIR of every function
    #[arg(long)]
    dump_mir: bool,
    /// Print the LIR of the whole program
    #[arg(long)]
    dump_lir: bool,
    /// Log more, repeat for even more
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn report_fatal_error(origin: &SourceFileOrigin, message: &str) -> ! {
    eprintln!("{} {origin}", "Fatal error reported in".red().bold());
    eprintln!("{}", message.red());
    std::process::exit(1);
}

fn main() {
    let args = Args::parse();

    let level = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if !args.input.is_file() {
        Args::command()
            .error(
                ErrorKind::InvalidValue,
                format!("Input path '{}' is not a file!", args.input.display()),
            )
            .exit()
    }

    let origin = SourceFileOrigin::File(args.input.clone());

    let contents = match std::fs::read_to_string(&args.input) {
        Ok(contents) => contents,
        Err(error) => report_fatal_error(&origin, &format!("could not read input: {error}")),
    };

    let source_file = SourceFile { contents, origin };

    let options = CompileOptions {
        optimize: !args.no_optimize,
        emit_debug_comments: args.debug_comments,
        dump_mir: args.dump_mir,
        dump_lir: args.dump_lir,
    };

    let asm = match compile(&source_file, &options) {
        Ok(asm) => asm,
        Err(error) => report_fatal_error(&source_file.origin, &error.to_string()),
    };

    if let Err(error) = std::fs::write(&args.output, asm) {
        report_fatal_error(
            &source_file.origin,
            &format!("could not write {}: {error}", args.output.display()),
        );
    }

    tracing::info!(output = %args.output.display(), "wrote assembly");
}
