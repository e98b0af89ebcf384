//! Launcher tests: real `/bin/sh` children under a temporary history root.

use std::path::{Path, PathBuf};
use std::time::Instant;

use seqpipe_core::launcher::Launcher;
use seqpipe_core::pipeline::Pipeline;
use seqpipe_core::runlog::RunLog;

fn write_pipe(dir: &Path, content: &str) -> PathBuf {
    let path = dir.join("main.pipe");
    std::fs::write(&path, content).unwrap();
    path
}

fn load(path: &Path) -> Pipeline {
    let mut pipeline = Pipeline::load(path).unwrap();
    pipeline.final_check_after_load();
    pipeline
}

/// The single run directory created under `root` by one `run` call.
fn only_run_dir(root: &Path) -> PathBuf {
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(root)
        .unwrap()
        .map(|e| e.unwrap())
        // file_type() does not follow symlinks, so `last` is excluded.
        .filter(|e| e.file_type().unwrap().is_dir())
        .map(|e| e.path())
        .collect();
    assert_eq!(dirs.len(), 1, "expected exactly one run dir in {root:?}");
    dirs.remove(0)
}

fn step_log(run_dir: &Path, step_id: &str) -> String {
    std::fs::read_to_string(run_dir.join(format!("{step_id}.log"))).unwrap()
}

#[tokio::test]
async fn serial_run_writes_one_log_per_step() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = load(&write_pipe(dir.path(), "echo hello\necho world\n"));

    let root = dir.path().join("history");
    let launcher = Launcher::with_history_root(&root);
    assert_eq!(launcher.history_root(), root);
    let status = launcher.run(&pipeline).await.unwrap();
    assert_eq!(status, 0);

    let run_dir = only_run_dir(&root);
    assert!(step_log(&run_dir, "1").contains("hello"));
    assert!(step_log(&run_dir, "2").contains("world"));
}

#[tokio::test]
async fn run_records_history_sysinfo_and_last_link() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = load(&write_pipe(dir.path(), "echo hi\n"));

    let root = dir.path().join("history");
    Launcher::with_history_root(&root).run(&pipeline).await.unwrap();

    let history = std::fs::read_to_string(RunLog::history_path(&root)).unwrap();
    assert_eq!(history.lines().count(), 1);
    assert_eq!(history.lines().next().unwrap().split('\t').count(), 4);

    let run_dir = only_run_dir(&root);
    assert!(run_dir.join("sysinfo.txt").is_file());
    let saved = std::fs::read_to_string(run_dir.join("pipeline.txt")).unwrap();
    assert!(saved.contains("echo hi"));

    #[cfg(unix)]
    {
        let target = std::fs::read_link(root.join("last")).unwrap();
        assert_eq!(run_dir.file_name().unwrap(), target.as_os_str());
    }
}

#[tokio::test]
async fn failure_in_serial_block_skips_later_steps() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = load(&write_pipe(dir.path(), "echo ok\nfalse\necho unreachable\n"));

    let root = dir.path().join("history");
    let status = Launcher::with_history_root(&root)
        .run(&pipeline)
        .await
        .unwrap();
    assert_eq!(status, 1);

    let run_dir = only_run_dir(&root);
    assert!(run_dir.join("1.log").is_file());
    assert!(run_dir.join("2.log").is_file());
    assert!(!run_dir.join("3.log").exists(), "step 3 must be skipped");
    assert!(step_log(&run_dir, "2").contains("exit: 1"));
}

#[tokio::test(flavor = "multi_thread")]
async fn parallel_block_runs_items_concurrently() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = load(&write_pipe(
        dir.path(),
        "greet() {{\n  sleep 0.4 && echo A\n  sleep 0.4 && echo B\n}}\ngreet\n",
    ));

    let root = dir.path().join("history");
    let started = Instant::now();
    let status = Launcher::with_history_root(&root)
        .run(&pipeline)
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(status, 0);
    assert!(
        elapsed.as_secs_f64() < 0.75,
        "parallel items should overlap, took {elapsed:?}"
    );

    let run_dir = only_run_dir(&root);
    assert!(step_log(&run_dir, "1.1").contains("A"));
    assert!(step_log(&run_dir, "1.2").contains("B"));
}

#[tokio::test(flavor = "multi_thread")]
async fn parallel_failure_does_not_cancel_siblings() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = load(&write_pipe(
        dir.path(),
        "both() {{\n  sh -c 'exit 3'\n  sleep 0.2 && echo survivor\n}}\nboth\n",
    ));

    let root = dir.path().join("history");
    let status = Launcher::with_history_root(&root)
        .run(&pipeline)
        .await
        .unwrap();

    // First failure in index order wins; the sibling still completed.
    assert_eq!(status, 3);
    let run_dir = only_run_dir(&root);
    assert!(step_log(&run_dir, "1.2").contains("survivor"));
}

#[tokio::test]
async fn procedure_arguments_become_environment_variables() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = load(&write_pipe(
        dir.path(),
        "build() {\n  echo \"building $name with $opts\"\n}\nbuild name=pkg opts=-O2\n",
    ));

    let root = dir.path().join("history");
    let status = Launcher::with_history_root(&root)
        .run(&pipeline)
        .await
        .unwrap();
    assert_eq!(status, 0);

    let run_dir = only_run_dir(&root);
    assert!(step_log(&run_dir, "1.1").contains("building pkg with -O2"));
}

#[tokio::test]
async fn nested_procedure_calls_nest_step_ids() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = load(&write_pipe(
        dir.path(),
        "inner() {\n  echo deep\n}\nouter() {\n  echo shallow\n  inner\n}\nouter\n",
    ));

    let root = dir.path().join("history");
    let status = Launcher::with_history_root(&root)
        .run(&pipeline)
        .await
        .unwrap();
    assert_eq!(status, 0);

    let run_dir = only_run_dir(&root);
    assert!(step_log(&run_dir, "1.1").contains("shallow"));
    assert!(step_log(&run_dir, "1.2.1").contains("deep"));
}

#[tokio::test]
async fn step_exit_codes_propagate_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = load(&write_pipe(dir.path(), "sh -c 'exit 42'\n"));

    let root = dir.path().join("history");
    let status = Launcher::with_history_root(&root)
        .run(&pipeline)
        .await
        .unwrap();
    assert_eq!(status, 42);
}

#[cfg(unix)]
#[tokio::test]
async fn signal_death_yields_nonzero_status() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = load(&write_pipe(dir.path(), "kill -TERM $$\n"));

    let root = dir.path().join("history");
    let status = Launcher::with_history_root(&root)
        .run(&pipeline)
        .await
        .unwrap();
    assert_eq!(status, 128 + 15);

    let run_dir = only_run_dir(&root);
    assert!(step_log(&run_dir, "1").contains("signal: 15"));
}

#[tokio::test(flavor = "multi_thread")]
async fn parallel_default_block_from_command_list() {
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = Pipeline::new();
    pipeline
        .set_default_block(
            &["echo first".to_string(), "echo second".to_string()],
            true,
        )
        .unwrap();

    let root = dir.path().join("history");
    let status = Launcher::with_history_root(&root)
        .run(&pipeline)
        .await
        .unwrap();
    assert_eq!(status, 0);

    let run_dir = only_run_dir(&root);
    assert!(step_log(&run_dir, "1").contains("first"));
    assert!(step_log(&run_dir, "2").contains("second"));
}

#[tokio::test]
async fn step_logs_carry_header_and_footer() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = load(&write_pipe(dir.path(), "echo hello\n"));

    let root = dir.path().join("history");
    Launcher::with_history_root(&root).run(&pipeline).await.unwrap();

    let run_dir = only_run_dir(&root);
    let log = step_log(&run_dir, "1");
    assert!(log.contains("command: echo hello"));
    assert!(log.contains("start: "));
    assert!(log.contains("end: "));
    assert!(log.contains("exit: 0"));
}
