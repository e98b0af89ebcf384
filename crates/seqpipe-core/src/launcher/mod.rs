//! Executing a loaded pipeline.
//!
//! The launcher walks the block structure: serial blocks run their items in
//! order and stop at the first failure; parallel blocks spawn one task per
//! item, wait for all of them, and report the first failure in item-index
//! order (siblings are never cancelled). Shell items run through
//! `/bin/sh -c` with merged stdout+stderr captured into a per-step log
//! file; procedure calls export their `key=value` arguments as environment
//! variables for every descendant shell item.

mod counter;

pub use counter::StepCounter;

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;

use chrono::Local;
use tokio::process::Command;

use crate::pipeline::{CommandItem, Pipeline, ProcArgs};
use crate::runlog::{RunLog, RunLogError};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Environment overlay accumulated from enclosing procedure calls.
type EnvVars = Vec<(String, String)>;

/// Shared, read-only state for one run.
struct RunContext {
    pipeline: Pipeline,
    log: RunLog,
    verbose: u8,
}

/// Executes pipelines and records their runs.
pub struct Launcher {
    history_root: std::path::PathBuf,
    verbose: u8,
}

impl Launcher {
    /// A launcher recording under the default per-user history root.
    pub fn new() -> Self {
        Self {
            history_root: RunLog::default_root(),
            verbose: 0,
        }
    }

    /// A launcher recording under an explicit history root.
    pub fn with_history_root(root: impl Into<std::path::PathBuf>) -> Self {
        Self {
            history_root: root.into(),
            verbose: 0,
        }
    }

    /// Set the console echo level (0 = quiet, 1+ = echo steps).
    pub fn verbose(mut self, level: u8) -> Self {
        self.verbose = level;
        self
    }

    /// Run the pipeline's default block.
    ///
    /// Returns the run's exit status: 0 on success, otherwise the first
    /// failing step's status in iteration order. Setup failures (run
    /// directory, history log) abort before any step starts.
    pub async fn run(&self, pipeline: &Pipeline) -> Result<i32, RunLogError> {
        let log = RunLog::prepare(self.history_root.clone())?;
        log.append_history()?;
        log.link_last();
        log.record_sysinfo(&pipeline.save_to_string())?;

        tracing::info!(id = log.id(), dir = %log.run_dir().display(), "run started");
        if self.verbose > 0 {
            eprintln!("[{}] logs in {}", log.id(), log.run_dir().display());
        }

        let ctx = Arc::new(RunContext {
            pipeline: pipeline.clone(),
            log,
            verbose: self.verbose,
        });

        let mut counter = StepCounter::new();
        let status = run_block(&ctx, 0, "", &mut counter, &EnvVars::new()).await;

        tracing::info!(status, "run finished");
        Ok(status)
    }

    /// The run directory that `run` will record under.
    pub fn history_root(&self) -> &std::path::Path {
        &self.history_root
    }
}

impl Default for Launcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Execute one block by pool index. Serial blocks stop at the first
/// failure; parallel blocks always run every item.
///
/// Returns a boxed future: blocks recurse through procedure calls, and
/// the async recursion has to pass through a `dyn Future` somewhere.
fn run_block<'a>(
    ctx: &'a Arc<RunContext>,
    block_index: usize,
    indent: &'a str,
    counter: &'a mut StepCounter,
    env: &'a EnvVars,
) -> Pin<Box<dyn Future<Output = i32> + Send + 'a>> {
    Box::pin(async move {
        counter.enter_block();
        let status = if ctx.pipeline.block(block_index).is_parallel() {
            run_parallel_items(ctx, block_index, indent, counter, env).await
        } else {
            run_serial_items(ctx, block_index, indent, counter, env).await
        };
        counter.leave_block();
        status
    })
}

async fn run_serial_items(
    ctx: &Arc<RunContext>,
    block_index: usize,
    indent: &str,
    counter: &mut StepCounter,
    env: &EnvVars,
) -> i32 {
    let item_count = ctx.pipeline.block(block_index).items().len();
    for i in 0..item_count {
        let item = ctx.pipeline.block(block_index).items()[i].clone();
        let step_id = counter.next_step();
        let status = run_item(ctx, &item, &step_id, indent, counter, env).await;
        if status != 0 {
            return status;
        }
    }
    0
}

/// Dispatch all items concurrently and wait for every one of them.
///
/// Step ids are assigned in item-index order before anything is spawned,
/// so labels never depend on completion order.
async fn run_parallel_items(
    ctx: &Arc<RunContext>,
    block_index: usize,
    indent: &str,
    counter: &mut StepCounter,
    env: &EnvVars,
) -> i32 {
    let items: Vec<CommandItem> = ctx.pipeline.block(block_index).items().to_vec();
    let mut handles = Vec::with_capacity(items.len());

    for item in items {
        let step_id = counter.next_step();
        let child_ctx = Arc::clone(ctx);
        let child_counter = counter.clone();
        let child_indent = indent.to_string();
        let child_env = env.clone();
        handles.push(tokio::spawn(async move {
            let mut counter = child_counter;
            run_item(
                &child_ctx,
                &item,
                &step_id,
                &child_indent,
                &mut counter,
                &child_env,
            )
            .await
        }));
    }

    let mut status = 0;
    for handle in handles {
        let child_status = match handle.await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("parallel task failed: {e}");
                1
            }
        };
        if status == 0 && child_status != 0 {
            status = child_status;
        }
    }
    status
}

/// Run a single item: a shell step or a procedure call.
async fn run_item(
    ctx: &Arc<RunContext>,
    item: &CommandItem,
    step_id: &str,
    indent: &str,
    counter: &mut StepCounter,
    env: &EnvVars,
) -> i32 {
    match item {
        CommandItem::Shell { line, .. } => run_shell(ctx, line, step_id, indent, env).await,
        CommandItem::Proc { name, args } => {
            let deeper = format!("{indent}  ");
            run_proc(ctx, name, args, &deeper, counter, env).await
        }
    }
}

/// Resolve a procedure and run its body with the call's arguments
/// exported into the child environment.
async fn run_proc(
    ctx: &Arc<RunContext>,
    name: &str,
    args: &ProcArgs,
    indent: &str,
    counter: &mut StepCounter,
    env: &EnvVars,
) -> i32 {
    let Some(proc) = ctx.pipeline.procedure(name) else {
        // Unreachable for a pipeline that passed its final check.
        tracing::error!(proc = name, "no such procedure");
        return 1;
    };

    let mut child_env = env.clone();
    for (key, value) in args.iter() {
        child_env.push((key.to_string(), value.to_string()));
    }

    if ctx.verbose > 0 {
        eprintln!("{indent}[{name}] begin");
    }
    let status = run_block(ctx, proc.block_index(), indent, counter, &child_env).await;
    if ctx.verbose > 0 {
        eprintln!("{indent}[{name}] end ({status})");
    }
    status
}

/// Spawn `/bin/sh -c <line>` with merged stdout+stderr streamed into the
/// step's log file, and wait for it.
async fn run_shell(
    ctx: &Arc<RunContext>,
    line: &str,
    step_id: &str,
    indent: &str,
    env: &EnvVars,
) -> i32 {
    if ctx.verbose > 0 {
        eprintln!("{indent}({step_id}) {line}");
    }
    tracing::debug!(step = step_id, command = line, "step started");

    let log_path = ctx.log.step_log_path(step_id);
    let mut log = match std::fs::File::create(&log_path) {
        Ok(f) => f,
        Err(e) => {
            tracing::error!("cannot create step log '{}': {e}", log_path.display());
            return 1;
        }
    };

    let header = format!(
        "command: {}\nstart: {}\n",
        line,
        Local::now().format(TIME_FORMAT)
    );
    if let Err(e) = std::io::Write::write_all(&mut log, header.as_bytes()) {
        tracing::error!("cannot write step log '{}': {e}", log_path.display());
        return 1;
    }

    // Both output streams share one file handle, interleaved by the OS.
    let (stdout, stderr) = match (log.try_clone(), log.try_clone()) {
        (Ok(out), Ok(err)) => (Stdio::from(out), Stdio::from(err)),
        _ => {
            tracing::error!("cannot share step log '{}'", log_path.display());
            return 1;
        }
    };

    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c")
        .arg(line)
        .stdin(Stdio::inherit())
        .stdout(stdout)
        .stderr(stderr);
    for (key, value) in env {
        cmd.env(key, value);
    }

    let status = match cmd.spawn() {
        Ok(mut child) => match child.wait().await {
            Ok(status) => exit_code(&mut log, status),
            Err(e) => {
                finish_log(&mut log, &format!("error: wait failed: {e}"), 1);
                1
            }
        },
        Err(e) => {
            finish_log(&mut log, &format!("error: spawn failed: {e}"), 127);
            127
        }
    };

    tracing::debug!(step = step_id, status, "step finished");
    if ctx.verbose > 1 {
        eprintln!("{indent}({step_id}) exit {status}");
    }
    status
}

/// Map a child's wait status to an exit code and write the log footer.
fn exit_code(log: &mut std::fs::File, status: std::process::ExitStatus) -> i32 {
    match status.code() {
        Some(code) => {
            finish_log(log, "", code);
            code
        }
        None => {
            #[cfg(unix)]
            {
                use std::os::unix::process::ExitStatusExt;
                let signal = status.signal().unwrap_or(0);
                finish_log(log, &format!("signal: {signal}"), 128 + signal);
                128 + signal
            }
            #[cfg(not(unix))]
            {
                finish_log(log, "error: no exit code", 1);
                1
            }
        }
    }
}

fn finish_log(log: &mut std::fs::File, note: &str, code: i32) {
    let mut footer = String::new();
    if !note.is_empty() {
        footer.push_str(note);
        footer.push('\n');
    }
    footer.push_str(&format!(
        "end: {}\nexit: {}\n",
        Local::now().format(TIME_FORMAT),
        code
    ));
    if let Err(e) = std::io::Write::write_all(log, footer.as_bytes()) {
        tracing::warn!("cannot finish step log: {e}");
    }
}
