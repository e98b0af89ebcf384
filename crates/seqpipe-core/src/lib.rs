//! seqpipe-core: the pipeline model, loader, and launcher behind `seqpipe`.
//!
//! This crate provides:
//!
//! - **Pipe-file reader**: line cursor and classification over pipeline files
//! - **Words**: shell-style command-line splitting and quoting
//! - **Pipeline**: the in-memory program (procedures, the block pool, and
//!   post-load shell-to-procedure resolution)
//! - **Loader**: building a pipeline from a file, with configuration
//!   includes and sidecar `.conf` merging
//! - **Launcher**: serial/parallel execution of shell steps with per-step
//!   logs and hierarchical step ids
//! - **Run log**: per-run directories, the history index, and the `last`
//!   symlink under the per-user history root
//! - **System**: hostname, command-line, and filesystem helpers

pub mod launcher;
pub mod loader;
pub mod pipefile;
pub mod pipeline;
pub mod runlog;
pub mod system;
pub mod words;

pub use launcher::{Launcher, StepCounter};
pub use loader::LoadError;
pub use pipefile::BlockKind;
pub use pipeline::{Block, CommandItem, Pipeline, ProcArgs, Procedure};
pub use runlog::{RunLog, RunLogError};
