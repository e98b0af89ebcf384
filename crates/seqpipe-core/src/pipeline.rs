//! The in-memory pipeline program.
//!
//! A [`Pipeline`] owns a map of named procedures and a growable pool of
//! [`Block`]s. Blocks are referred to by index, never by pointer, so the
//! pool can grow without invalidating references; block 0 always exists and
//! is the default top-level block. Command items are a tagged variant:
//! shell invocation or procedure call.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::pipefile::BlockKind;
use crate::system;
use crate::words::{self, WordsError};

/// Argument keys follow the identifier pattern.
static KEY_VALUE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)=(.*)$").unwrap());

/// Ordered key/value arguments of a procedure call.
///
/// Values are untyped strings; iteration preserves the insertion order from
/// the source line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcArgs {
    entries: Vec<(String, String)>,
}

impl ProcArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Append a key/value pair. A repeated key overwrites the value but
    /// keeps the key's original position.
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parse a `KEY=VALUE` word. Returns `None` when the word does not
    /// match the argument shape.
    pub fn parse_entry(word: &str) -> Option<(String, String)> {
        let caps = KEY_VALUE_RE.captures(word)?;
        Some((caps[1].to_string(), caps[2].to_string()))
    }
}

impl fmt::Display for ProcArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}={}", key, words::quote(value))?;
        }
        Ok(())
    }
}

/// One command inside a block.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandItem {
    /// A shell command line, kept verbatim alongside its parsed words.
    Shell {
        line: String,
        cmd: String,
        args: Vec<String>,
    },
    /// A call to a named procedure with `key=value` arguments.
    Proc { name: String, args: ProcArgs },
}

impl CommandItem {
    /// Build a shell item from an unparsed command line.
    pub fn from_line(line: &str) -> Result<Self, WordsError> {
        let mut word_list = words::split(line)?;
        let cmd = if word_list.is_empty() {
            String::new()
        } else {
            word_list.remove(0)
        };
        Ok(CommandItem::Shell {
            line: line.trim().to_string(),
            cmd,
            args: word_list,
        })
    }

    /// Build a shell item from already-split words.
    pub fn from_words(cmd: impl Into<String>, args: Vec<String>) -> Self {
        let cmd = cmd.into();
        let line = words::join(&cmd, &args);
        CommandItem::Shell { line, cmd, args }
    }

    /// The name shown for this item in step echo and dumps.
    pub fn display_name(&self) -> &str {
        match self {
            CommandItem::Shell { cmd, .. } => cmd,
            CommandItem::Proc { name, .. } => name,
        }
    }
}

impl fmt::Display for CommandItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandItem::Shell { line, .. } => f.write_str(line),
            CommandItem::Proc { name, args } => {
                f.write_str(name)?;
                if !args.is_empty() {
                    write!(f, " {}", args)?;
                }
                Ok(())
            }
        }
    }
}

/// An ordered sequence of command items with a serial/parallel discipline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Block {
    items: Vec<CommandItem>,
    parallel: bool,
}

impl Block {
    pub fn new(parallel: bool) -> Self {
        Self {
            items: Vec::new(),
            parallel,
        }
    }

    pub fn kind(&self) -> BlockKind {
        if self.parallel {
            BlockKind::Parallel
        } else {
            BlockKind::Serial
        }
    }

    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    pub fn set_parallel(&mut self, parallel: bool) {
        self.parallel = parallel;
    }

    pub fn has_any_command(&self) -> bool {
        !self.items.is_empty()
    }

    pub fn items(&self) -> &[CommandItem] {
        &self.items
    }

    /// Append a raw command line as a shell item.
    pub fn append_line(&mut self, line: &str) -> Result<(), WordsError> {
        self.items.push(CommandItem::from_line(line)?);
        Ok(())
    }

    pub fn append_item(&mut self, item: CommandItem) {
        self.items.push(item);
    }

    fn clear(&mut self) {
        self.items.clear();
        self.parallel = false;
    }
}

/// A name bound to a block index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Procedure {
    name: String,
    block_index: usize,
}

impl Procedure {
    pub fn new(name: impl Into<String>, block_index: usize) -> Self {
        Self {
            name: name.into(),
            block_index,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn block_index(&self) -> usize {
        self.block_index
    }
}

/// The loaded program: procedures, the block pool, and configuration.
#[derive(Debug, Clone)]
pub struct Pipeline {
    // BTreeMap keeps save() and name listings in stable order.
    procs: BTreeMap<String, Procedure>,
    proc_positions: BTreeMap<String, String>,
    blocks: Vec<Block>,
    config: BTreeMap<String, String>,
}

impl Pipeline {
    /// An empty pipeline with only the default block.
    pub fn new() -> Self {
        Self {
            procs: BTreeMap::new(),
            proc_positions: BTreeMap::new(),
            blocks: vec![Block::default()],
            config: BTreeMap::new(),
        }
    }

    /// Heuristic used by the CLI: a pipeline file exists, is not
    /// executable, and looks like text.
    pub fn looks_like_pipe_file(path: &Path) -> bool {
        system::file_exists(path) && !system::is_executable(path) && system::is_text_file(path)
    }

    /// Append a block to the pool and return its index.
    ///
    /// The pool is append-only; indices never shift.
    pub fn append_block(&mut self, block: Block) -> usize {
        self.blocks.push(block);
        self.blocks.len() - 1
    }

    pub fn has_procedure(&self, name: &str) -> bool {
        self.procs.contains_key(name)
    }

    pub fn procedure(&self, name: &str) -> Option<&Procedure> {
        self.procs.get(name)
    }

    /// Procedure names matching a regex pattern, in sorted order.
    pub fn proc_names_matching(&self, pattern: &str) -> Result<Vec<String>, regex::Error> {
        let re = Regex::new(pattern)?;
        Ok(self
            .procs
            .keys()
            .filter(|name| re.is_match(name))
            .cloned()
            .collect())
    }

    pub(crate) fn define_procedure(&mut self, name: &str, block_index: usize, pos: String) {
        self.procs
            .insert(name.to_string(), Procedure::new(name, block_index));
        self.proc_positions.insert(name.to_string(), pos);
    }

    /// Source position of a procedure's first definition.
    pub fn procedure_position(&self, name: &str) -> Option<&str> {
        self.proc_positions.get(name).map(String::as_str)
    }

    pub(crate) fn set_config(&mut self, name: &str, value: &str) {
        self.config.insert(name.to_string(), value.to_string());
    }

    /// Configuration variables collected during load. Stored but not
    /// consulted by the launcher.
    pub fn config(&self) -> &BTreeMap<String, String> {
        &self.config
    }

    pub fn default_block(&self) -> &Block {
        &self.blocks[0]
    }

    pub(crate) fn default_block_mut(&mut self) -> &mut Block {
        &mut self.blocks[0]
    }

    pub fn block(&self, index: usize) -> &Block {
        &self.blocks[index]
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// The body block of a named procedure.
    pub fn proc_block(&self, name: &str) -> Option<&Block> {
        self.procs.get(name).map(|p| &self.blocks[p.block_index()])
    }

    pub fn has_any_default_command(&self) -> bool {
        self.blocks[0].has_any_command()
    }

    /// Replace the default block with a list of command lines.
    pub fn set_default_block(&mut self, lines: &[String], parallel: bool) -> Result<(), WordsError> {
        self.blocks[0].clear();
        for line in lines {
            self.blocks[0].append_line(line)?;
        }
        self.blocks[0].set_parallel(parallel);
        Ok(())
    }

    /// Replace the default block with a single pre-split command.
    pub fn set_default_command(&mut self, cmd: &str, args: Vec<String>) {
        self.blocks[0].clear();
        self.blocks[0].append_item(CommandItem::from_words(cmd, args));
    }

    /// Replace the default block with a single procedure call.
    pub fn set_default_proc(&mut self, name: &str, args: ProcArgs) {
        self.blocks[0].clear();
        self.blocks[0].append_item(CommandItem::Proc {
            name: name.to_string(),
            args,
        });
    }

    /// Post-load resolution: rewrite shell items whose program name matches
    /// a procedure into procedure calls, when every argument parses as
    /// `key=value`. Idempotent: promoted items are no longer shell items.
    pub fn final_check_after_load(&mut self) {
        let proc_names: HashSet<String> = self.procs.keys().cloned().collect();

        for block in &mut self.blocks {
            for item in &mut block.items {
                let CommandItem::Shell { cmd, args, .. } = item else {
                    continue;
                };
                if !proc_names.contains(cmd.as_str()) {
                    continue;
                }

                let mut proc_args = ProcArgs::new();
                let mut ambiguous = None;
                for arg in args.iter() {
                    match ProcArgs::parse_entry(arg) {
                        Some((key, value)) => proc_args.add(key, value),
                        None => {
                            ambiguous = Some(arg.clone());
                            break;
                        }
                    }
                }

                if let Some(arg) = ambiguous {
                    // Left as a shell command; it will fail at exec time
                    // unless a program of the same name exists.
                    tracing::warn!(
                        cmd = cmd.as_str(),
                        arg = arg.as_str(),
                        "command matches a procedure name but argument is not KEY=VALUE; \
                         keeping it as a shell command"
                    );
                    continue;
                }

                *item = CommandItem::Proc {
                    name: cmd.clone(),
                    args: proc_args,
                };
            }
        }
    }

    /// Serialize back to canonical pipeline text.
    ///
    /// Procedures come first in name order, then the default block.
    /// Top-level comments are not preserved; command lines are verbatim.
    pub fn save_to_string(&self) -> String {
        let mut out = String::new();

        for (i, proc) in self.procs.values().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            let block = &self.blocks[proc.block_index()];
            out.push_str(&format!(
                "{}() {}\n",
                proc.name(),
                block.kind().left_bracket()
            ));
            for item in block.items() {
                out.push_str(&format!("\t{}\n", item));
            }
            out.push_str(block.kind().right_bracket());
            out.push('\n');
        }

        if self.blocks[0].has_any_command() {
            if !self.procs.is_empty() {
                out.push('\n');
            }
            for item in self.blocks[0].items() {
                out.push_str(&format!("{}\n", item));
            }
        }
        out
    }

    /// Write canonical pipeline text to a file.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.save_to_string())
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}
