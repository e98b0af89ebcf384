//! seqpipe CLI entry point.
//!
//! Usage:
//!   seqpipe run <pipeline-file> [proc-name] [KEY=VALUE ...]
//!   seqpipe parallel <command> [<command> ...]
//!   seqpipe log | history
//!   seqpipe version
//!   seqpipe help

use std::env;
use std::process::ExitCode;

use anyhow::Result;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use seqpipe_core::pipeline::{Pipeline, ProcArgs};
use seqpipe_core::runlog::RunLog;
use seqpipe_core::{system, Launcher};

fn main() -> ExitCode {
    // Respects RUST_LOG; quiet by default.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:?}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode> {
    let args: Vec<String> = env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        None => {
            print_usage();
            Ok(ExitCode::FAILURE)
        }

        Some("run") => cmd_run(&args[2..]),

        Some("parallel") => cmd_parallel(&args[2..]),

        Some("log" | "history") => cmd_history(),

        Some("version" | "--version" | "-V") => {
            println!("seqpipe {}", env!("CARGO_PKG_VERSION"));
            Ok(ExitCode::SUCCESS)
        }

        Some("help" | "--help" | "-h") => {
            print_usage();
            Ok(ExitCode::SUCCESS)
        }

        Some(unknown) => {
            eprintln!("Unknown command: {unknown}");
            eprintln!("Try 'seqpipe help' for usage.");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn print_usage() {
    println!(
        r#"
Usage: seqpipe <cmd> [options ...]

Commands:
   run             Run workflow/commands
   parallel        Run commands in parallel
   log / history   Show history log
   version         Show version
   help            Show help messages

Try 'seqpipe <cmd> -h' to see help messages for specific subcommand.
"#
    );
}

/// `seqpipe run <pipeline-file> [proc-name] [KEY=VALUE ...]`
fn cmd_run(args: &[String]) -> Result<ExitCode> {
    let mut verbose = 0u8;
    let mut positional: Vec<&String> = Vec::new();

    for arg in args {
        match arg.as_str() {
            "-v" => verbose += 1,
            "-h" | "--help" => {
                println!("seqpipe run - Run a pipeline file\n");
                println!("Usage: seqpipe run [-v] <pipeline-file> [proc-name] [KEY=VALUE ...]");
                println!("\nOptions:");
                println!("  -v    Echo steps to the console (repeat for more detail)");
                return Ok(ExitCode::SUCCESS);
            }
            other if other.starts_with('-') => {
                eprintln!("Unknown run option: {other}");
                return Ok(ExitCode::FAILURE);
            }
            _ => positional.push(arg),
        }
    }

    let Some(file) = positional.first() else {
        eprintln!("Usage: seqpipe run [-v] <pipeline-file> [proc-name] [KEY=VALUE ...]");
        return Ok(ExitCode::FAILURE);
    };

    let path = std::path::Path::new(file.as_str());
    if system::dir_exists(path) {
        eprintln!("Error: '{file}' is a directory, not a pipeline file");
        return Ok(ExitCode::FAILURE);
    }
    if system::file_exists(path) && !Pipeline::looks_like_pipe_file(path) {
        eprintln!("Error: '{file}' does not look like a pipeline file");
        return Ok(ExitCode::FAILURE);
    }

    let mut pipeline = match Pipeline::load(file) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: {e}");
            return Ok(ExitCode::FAILURE);
        }
    };
    pipeline.final_check_after_load();

    if let Some(proc_name) = positional.get(1) {
        if !pipeline.has_procedure(proc_name) {
            eprintln!("Error: no such procedure '{proc_name}'");
            if let Ok(names) = pipeline.proc_names_matching(".") {
                if !names.is_empty() {
                    eprintln!("Available procedures: {}", names.join(", "));
                }
            }
            return Ok(ExitCode::FAILURE);
        }

        let mut proc_args = ProcArgs::new();
        for kv in &positional[2..] {
            match ProcArgs::parse_entry(kv) {
                Some((key, value)) => proc_args.add(key, value),
                None => {
                    eprintln!("Error: invalid argument '{kv}' (expected KEY=VALUE)");
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
        pipeline.set_default_proc(proc_name, proc_args);
    } else if !pipeline.has_any_default_command() {
        eprintln!("Error: pipeline has no top-level commands; specify a procedure to run");
        if let Ok(names) = pipeline.proc_names_matching(".") {
            if !names.is_empty() {
                eprintln!("Available procedures: {}", names.join(", "));
            }
        }
        return Ok(ExitCode::FAILURE);
    }

    launch(&pipeline, verbose)
}

/// `seqpipe parallel <command> [<command> ...]`
fn cmd_parallel(args: &[String]) -> Result<ExitCode> {
    let mut verbose = 0u8;
    let mut commands: Vec<String> = Vec::new();

    for arg in args {
        match arg.as_str() {
            "-v" => verbose += 1,
            "-h" | "--help" => {
                println!("seqpipe parallel - Run commands in parallel\n");
                println!("Usage: seqpipe parallel [-v] <command> [<command> ...]");
                return Ok(ExitCode::SUCCESS);
            }
            _ => commands.push(arg.clone()),
        }
    }

    if commands.is_empty() {
        eprintln!("Usage: seqpipe parallel [-v] <command> [<command> ...]");
        return Ok(ExitCode::FAILURE);
    }

    let mut pipeline = Pipeline::new();
    if let Err(e) = pipeline.set_default_block(&commands, true) {
        eprintln!("Error: {e}");
        return Ok(ExitCode::FAILURE);
    }

    launch(&pipeline, verbose)
}

/// `seqpipe log` / `seqpipe history`
fn cmd_history() -> Result<ExitCode> {
    let path = RunLog::history_path(&RunLog::default_root());
    match std::fs::read_to_string(&path) {
        Ok(text) => print!("{text}"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            println!("(no history)");
        }
        Err(e) => {
            eprintln!("Error: cannot read '{}': {e}", path.display());
            return Ok(ExitCode::FAILURE);
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Run a prepared pipeline and map its status to a process exit code.
fn launch(pipeline: &Pipeline, verbose: u8) -> Result<ExitCode> {
    let launcher = Launcher::new().verbose(verbose);

    let rt = tokio::runtime::Runtime::new()?;
    let status = match rt.block_on(launcher.run(pipeline)) {
        Ok(status) => status,
        Err(e) => {
            eprintln!("Error: {e}");
            return Ok(ExitCode::FAILURE);
        }
    };

    if status == 0 {
        Ok(ExitCode::SUCCESS)
    } else {
        // Clamp to the 1-255 range a process can actually report.
        let code = (status & 0xff) as u8;
        Ok(ExitCode::from(if code == 0 { 1 } else { code }))
    }
}
