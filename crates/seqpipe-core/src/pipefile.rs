//! Streaming reader and line classification for pipeline files.
//!
//! A pipeline file is line-oriented UTF-8 text. The reader exposes a cursor
//! over physical lines plus a `"filename(lineno)"` position string for
//! diagnostics. Classification is a set of pure predicates over a single
//! line; the loader decides what each class means in context.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

static VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)=(.*)$").unwrap());
static INCLUDE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*include\s+(\S+)\s*$").unwrap());
static PROC_HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)\(\)\s*(\{\{|\{)?\s*$").unwrap());
static LEFT_BRACKET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\{\{|\{)\s*$").unwrap());
static RIGHT_BRACKET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\}\}|\})\s*$").unwrap());
static ATTR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*#\[([A-Za-z_][A-Za-z0-9_]*)\s+([^\]]*)\]\s*$").unwrap());

/// Serial (`{` … `}`) or parallel (`{{` … `}}`) block discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Serial,
    Parallel,
}

impl BlockKind {
    fn from_brace(brace: &str) -> Self {
        if brace.len() == 2 {
            BlockKind::Parallel
        } else {
            BlockKind::Serial
        }
    }

    /// The left bracket that opens a block of this kind.
    pub fn left_bracket(self) -> &'static str {
        match self {
            BlockKind::Serial => "{",
            BlockKind::Parallel => "{{",
        }
    }

    /// The right bracket that closes a block of this kind.
    pub fn right_bracket(self) -> &'static str {
        match self {
            BlockKind::Serial => "}",
            BlockKind::Parallel => "}}",
        }
    }
}

/// Cursor over the physical lines of a pipeline file.
pub struct PipeFile {
    path: PathBuf,
    reader: BufReader<File>,
    current: String,
    line_no: usize,
}

impl PipeFile {
    /// Open a pipeline file for reading.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = File::open(&path)?;
        Ok(Self {
            path,
            reader: BufReader::new(file),
            current: String::new(),
            line_no: 0,
        })
    }

    /// Advance to the next line. Returns false at end of file.
    pub fn read_line(&mut self) -> io::Result<bool> {
        self.current.clear();
        let n = self.reader.read_line(&mut self.current)?;
        if n == 0 {
            return Ok(false);
        }
        while self.current.ends_with('\n') || self.current.ends_with('\r') {
            self.current.pop();
        }
        self.line_no += 1;
        Ok(true)
    }

    /// The most recently read line, without its terminator.
    pub fn current_line(&self) -> &str {
        &self.current
    }

    /// `"filename(lineno)"` position of the current line.
    pub fn pos(&self) -> String {
        format!("{}({})", self.path.display(), self.line_no)
    }

    /// Path of the file being read.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// True for a line of only whitespace.
pub fn is_empty_line(line: &str) -> bool {
    line.trim().is_empty()
}

/// True when the first non-whitespace character is `#`.
pub fn is_comment_line(line: &str) -> bool {
    line.trim_start().starts_with('#')
}

/// True for a comment carrying an attribute marker (`#[...]`).
pub fn is_attr_line(line: &str) -> bool {
    line.trim_start().starts_with("#[")
}

/// Parse a well-formed attribute line (`#[key value]`) into its parts.
///
/// Attribute content is opaque to the loader; this only checks shape.
pub fn parse_attr_line(line: &str) -> Option<(String, String)> {
    let caps = ATTR_RE.captures(line)?;
    Some((caps[1].to_string(), caps[2].trim().to_string()))
}

/// Parse an `include <filename>` directive.
pub fn parse_include_line(line: &str) -> Option<String> {
    INCLUDE_RE.captures(line).map(|caps| caps[1].to_string())
}

/// Parse a `NAME=VALUE` configuration variable line.
pub fn parse_var_line(line: &str) -> Option<(String, String)> {
    let caps = VAR_RE.captures(line)?;
    Some((caps[1].to_string(), caps[2].to_string()))
}

/// Parse a procedure header: `NAME()`, `NAME() {`, or `NAME() {{`.
///
/// Returns the procedure name and the opening bracket, if the header
/// carried one.
pub fn parse_proc_header(line: &str) -> Option<(String, Option<BlockKind>)> {
    let caps = PROC_HEADER_RE.captures(line)?;
    let kind = caps.get(2).map(|m| BlockKind::from_brace(m.as_str()));
    Some((caps[1].to_string(), kind))
}

/// Parse a lone left bracket line (`{` or `{{`).
pub fn parse_left_bracket(line: &str) -> Option<BlockKind> {
    let caps = LEFT_BRACKET_RE.captures(line)?;
    Some(BlockKind::from_brace(&caps[1]))
}

/// Parse a lone right bracket line (`}` or `}}`).
pub fn parse_right_bracket(line: &str) -> Option<BlockKind> {
    let caps = RIGHT_BRACKET_RE.captures(line)?;
    Some(BlockKind::from_brace(&caps[1]))
}
