//! Loading a [`Pipeline`] from a pipeline file.
//!
//! The loader drives the [`PipeFile`] cursor line by line: procedures open
//! nested scopes delimited by `{`/`}` (serial) or `{{`/`}}` (parallel),
//! `include` pulls in a configuration file, and everything else lands in
//! the default block. Loading stops at the first error; no partial
//! pipeline is exposed.

use std::io;
use std::path::{Path, PathBuf};

use crate::pipefile::{self, BlockKind, PipeFile};
use crate::pipeline::{Block, Pipeline};
use crate::words::WordsError;

/// A failure while loading a pipeline or configuration file.
///
/// Positions render as `"filename(lineno)"`.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("cannot open '{}': {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("error reading '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{pos}: duplicated procedure '{name}' (previous definition at {prev_pos})")]
    DuplicateProc {
        name: String,
        pos: String,
        prev_pos: String,
    },

    #[error("{pos}: unexpected attribute line")]
    UnexpectedAttr { pos: String },

    #[error("{pos}: unexpected line; only '{{' or '{{{{' was expected here")]
    LeftBracketExpected { pos: String },

    #[error("{pos}: nested blocks are not supported")]
    NestedBlock { pos: String },

    #[error("{pos}: unexpected right bracket; '{}' was expected here", .expected.right_bracket())]
    BracketMismatch { pos: String, expected: BlockKind },

    #[error("'{}': missing '{}' at end of file", .path.display(), .expected.right_bracket())]
    UnclosedBlock { path: PathBuf, expected: BlockKind },

    #[error("'{}': procedure '{name}' has no body", .path.display())]
    MissingBody { path: PathBuf, name: String },

    #[error("{pos}: {source}")]
    BadCommand {
        pos: String,
        #[source]
        source: WordsError,
    },

    #[error(
        "{}({line_no}): invalid configuration syntax; \
         only variable definitions may appear in a configuration file",
        .path.display()
    )]
    ConfSyntax { path: PathBuf, line_no: usize },

    #[error("{}({line_no}): nested include is not supported", .path.display())]
    NestedInclude { path: PathBuf, line_no: usize },
}

impl Pipeline {
    /// Load a pipeline file, returning the populated program.
    ///
    /// The caller still runs [`Pipeline::final_check_after_load`] before
    /// executing; loading only builds the structure.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let mut pipeline = Pipeline::new();

        let mut file = PipeFile::open(path).map_err(|source| LoadError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        while read_line(&mut file)? {
            let line = file.current_line().to_string();

            if pipefile::is_empty_line(&line) {
                continue;
            }
            if pipefile::is_comment_line(&line) {
                if pipefile::is_attr_line(&line) && pipefile::parse_attr_line(&line).is_none() {
                    tracing::warn!("{}: invalid attribute format", file.pos());
                }
                continue;
            }

            if let Some(include) = pipefile::parse_include_line(&line) {
                let target = path
                    .parent()
                    .unwrap_or_else(|| Path::new("."))
                    .join(&include);
                tracing::info!(module = include.as_str(), "loading module");
                load_conf(&target, &mut pipeline)?;
                continue;
            }

            if let Some((name, value)) = pipefile::parse_var_line(&line) {
                pipeline.set_config(&name, &value);
                continue;
            }

            if let Some((name, bracket)) = pipefile::parse_proc_header(&line) {
                if let Some(prev_pos) = pipeline.procedure_position(&name) {
                    return Err(LoadError::DuplicateProc {
                        name,
                        pos: file.pos(),
                        prev_pos: prev_pos.to_string(),
                    });
                }
                let header_pos = file.pos();
                load_proc(&mut file, &mut pipeline, &name, bracket, header_pos)?;
                continue;
            }

            let pos = file.pos();
            pipeline
                .default_block_mut()
                .append_line(&line)
                .map_err(|source| LoadError::BadCommand { pos, source })?;
        }

        // A sibling `<file>.conf` merges as configuration when present.
        let mut conf_path = path.as_os_str().to_owned();
        conf_path.push(".conf");
        let conf_path = PathBuf::from(conf_path);
        if conf_path.is_file() {
            load_conf(&conf_path, &mut pipeline)?;
        }

        Ok(pipeline)
    }
}

fn read_line(file: &mut PipeFile) -> Result<bool, LoadError> {
    file.read_line().map_err(|source| LoadError::Read {
        path: file.path().to_path_buf(),
        source,
    })
}

/// Load a procedure body and bind `name` to the new block.
fn load_proc(
    file: &mut PipeFile,
    pipeline: &mut Pipeline,
    name: &str,
    bracket: Option<BlockKind>,
    header_pos: String,
) -> Result<(), LoadError> {
    let kind = match bracket {
        Some(kind) => kind,
        None => read_left_bracket(file, name)?,
    };

    let mut block = Block::new(kind == BlockKind::Parallel);
    load_block(file, &mut block, kind)?;

    let index = pipeline.append_block(block);
    pipeline.define_procedure(name, index, header_pos);
    Ok(())
}

/// Advance past empty lines and plain comments to the opening bracket of a
/// headerless procedure body. Attribute comments in the gap are an error.
fn read_left_bracket(file: &mut PipeFile, name: &str) -> Result<BlockKind, LoadError> {
    while read_line(file)? {
        let line = file.current_line();
        if pipefile::is_empty_line(line) {
            continue;
        }
        if pipefile::is_comment_line(line) {
            if pipefile::is_attr_line(line) {
                return Err(LoadError::UnexpectedAttr { pos: file.pos() });
            }
            continue;
        }
        return match pipefile::parse_left_bracket(line) {
            Some(kind) => Ok(kind),
            None => Err(LoadError::LeftBracketExpected { pos: file.pos() }),
        };
    }
    Err(LoadError::MissingBody {
        path: file.path().to_path_buf(),
        name: name.to_string(),
    })
}

/// Read command lines into `block` until the matching right bracket.
///
/// Every non-bracket line is appended as a command item, blank and
/// comment lines included; they run as no-op shell steps.
fn load_block(file: &mut PipeFile, block: &mut Block, kind: BlockKind) -> Result<(), LoadError> {
    while read_line(file)? {
        let line = file.current_line().to_string();

        if let Some(found) = pipefile::parse_right_bracket(&line) {
            if found != kind {
                return Err(LoadError::BracketMismatch {
                    pos: file.pos(),
                    expected: kind,
                });
            }
            return Ok(());
        }
        if pipefile::parse_left_bracket(&line).is_some() {
            return Err(LoadError::NestedBlock { pos: file.pos() });
        }

        let pos = file.pos();
        block
            .append_line(&line)
            .map_err(|source| LoadError::BadCommand { pos, source })?;
    }
    Err(LoadError::UnclosedBlock {
        path: file.path().to_path_buf(),
        expected: kind,
    })
}

/// Load a configuration file: a restricted grammar of variables, empty
/// lines, and comments. `include` is rejected (no nesting).
fn load_conf(path: &Path, pipeline: &mut Pipeline) -> Result<(), LoadError> {
    let mut file = PipeFile::open(path).map_err(|source| LoadError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    let mut line_no = 0usize;
    while read_line(&mut file)? {
        line_no += 1;
        let line = file.current_line();

        if pipefile::is_empty_line(line) || pipefile::is_comment_line(line) {
            continue;
        }
        if pipefile::parse_include_line(line).is_some() {
            return Err(LoadError::NestedInclude {
                path: path.to_path_buf(),
                line_no,
            });
        }
        match pipefile::parse_var_line(line) {
            Some((name, value)) => pipeline.set_config(&name, &value),
            None => {
                return Err(LoadError::ConfSyntax {
                    path: path.to_path_buf(),
                    line_no,
                });
            }
        }
    }
    Ok(())
}
