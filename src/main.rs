use anyhow::{Context, Result};
use clap::{error::ErrorKind, CommandFactory, Parser};

use mips_vet::{
    assemble, print_general_results, run_once, run_vet, AssembleOption, AssemblySettings,
    VetOptions,
};

fn parse_addr(s: &str) -> Result<u32, String> {
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else {
        s.parse()
    };
    parsed.map_err(|e| e.to_string())
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, arg_required_else_help = true)]
struct Args {
    /// Path to the input assembly file
    input: String,

    /// Assignment to vet against (`p1`); omit to run a single emulation
    #[arg(short, long)]
    assignment: Option<String>,

    /// Number of runtime errors to tolerate per emulation
    #[arg(long, default_value_t = 5)]
    etol: usize,

    /// Runtime instruction budget per emulation
    #[arg(long, default_value_t = 100_000)]
    limit: u32,

    /// Number of emulations in a vet batch
    #[arg(long, default_value_t = 100_000)]
    samples: usize,

    /// Fix the randomization seed for reproducible batches
    #[arg(long)]
    seed: Option<u64>,

    /// Start address of the text segment (multiple of 4)
    #[arg(long, value_parser = parse_addr, default_value = "0x1000")]
    text_start: u32,

    /// Start address of the data segment (multiple of 4)
    #[arg(long, value_parser = parse_addr, default_value = "0x8000")]
    data_start: u32,

    /// Print the assembly listing after assembling
    #[arg(long)]
    listing: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    if args.text_start % 4 != 0 || args.data_start % 4 != 0 {
        let mut cmd = Args::command();
        cmd.error(
            ErrorKind::InvalidValue,
            "text and data start addresses must be multiples of 4",
        )
        .exit();
    }

    let source = std::fs::read_to_string(&args.input)
        .with_context(|| format!("could not read file `{}`", &args.input))?;

    let settings = AssemblySettings {
        text_start: args.text_start,
        data_start: args.data_start,
    };
    let assembled = assemble(
        &source,
        settings,
        AssembleOption::default().set_verbose(args.verbose >= 2),
    );

    if !assembled.errors.is_empty() {
        for error in &assembled.errors {
            println!("{error}");
        }
        anyhow::bail!(
            "{} error(s) generated from assembler, not attempting emulation",
            assembled.errors.len()
        );
    }

    if args.listing {
        print!("{assembled}");
    }

    let options = VetOptions {
        samples: args.samples,
        runtime_limit: args.limit,
        error_tolerance: args.etol,
        seed: args.seed,
    };

    match args.assignment.as_deref() {
        Some(assignment) if assignment.eq_ignore_ascii_case("p1") => {
            let report = run_vet(&assembled, "Project 1", &options)?;
            print_general_results(&args.input, &report.stats, None);
            println!("{}", report.session);
        }
        Some(unknown) => {
            let mut cmd = Args::command();
            cmd.error(
                ErrorKind::InvalidValue,
                format!("unknown assignment `{unknown}` (options are: p1)"),
            )
            .exit();
        }
        None => {
            let (stats, last) = run_once(&assembled, &options)?;
            print_general_results(&args.input, &stats, Some(&last.errors));
        }
    }

    Ok(())
}
