//! Source-text access for declared operations
//!
//! Reflection reports where an operation starts but not where it ends.
//! This module retrieves the literal source text behind a declared
//! location and scans it to determine how many lines the registration
//! statement spans, so callers anywhere inside a multi-line body can be
//! matched. Retrieval is best-effort: anything that cannot be read or
//! scanned yields `None`, never an error.

use crate::types::SourceLocation;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Trait for retrieving an operation's literal source text
///
/// Implementations back the range resolver. [`FsSourceReader`] reads real
/// files; [`MemorySourceReader`] serves a fixed in-memory file map.
pub trait SourceReader: Send + Sync {
    /// Full text of the file holding `location`, or `None` if unavailable
    fn file_text(&self, location: &SourceLocation) -> Option<String>;

    /// Number of lines spanned by the registration statement at `location`
    ///
    /// Default implementation retrieves the file text and delegates to
    /// [`statement_extent`].
    fn statement_lines(&self, location: &SourceLocation) -> Option<u32> {
        let text = self.file_text(location)?;
        statement_extent(&text, location.line)
    }
}

/// Reads operation source from the filesystem
///
/// Compiler-reported locations use paths relative to the package root;
/// they are resolved against `base`, defaulting to the process working
/// directory (the package root under `cargo test`).
#[derive(Debug, Default)]
pub struct FsSourceReader {
    base: Option<PathBuf>,
}

impl FsSourceReader {
    /// Create a reader resolving relative paths against the working directory
    pub fn new() -> Self {
        Self { base: None }
    }

    /// Create a reader resolving relative paths against `base`
    pub fn with_base(base: impl Into<PathBuf>) -> Self {
        Self {
            base: Some(base.into()),
        }
    }

    fn resolve(&self, file: &str) -> PathBuf {
        let path = Path::new(file);
        if path.is_absolute() {
            return path.to_path_buf();
        }
        match &self.base {
            Some(base) => base.join(path),
            None => path.to_path_buf(),
        }
    }
}

impl SourceReader for FsSourceReader {
    fn file_text(&self, location: &SourceLocation) -> Option<String> {
        std::fs::read_to_string(self.resolve(&location.file)).ok()
    }
}

/// In-memory source map
///
/// Serves file text from a `HashMap` protected by `RwLock`. Useful for
/// tests and for hosts that hold source somewhere other than the
/// filesystem.
#[derive(Debug, Default)]
pub struct MemorySourceReader {
    files: RwLock<HashMap<String, String>>,
}

impl MemorySourceReader {
    /// Create an empty reader
    pub fn new() -> Self {
        Self {
            files: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or replace the text served for `file`
    pub fn insert(&self, file: impl Into<String>, text: impl Into<String>) {
        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        files.insert(file.into(), text.into());
    }
}

impl SourceReader for MemorySourceReader {
    fn file_text(&self, location: &SourceLocation) -> Option<String> {
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        files.get(&location.file).cloned()
    }
}

/// Number of lines spanned by the statement starting at `start_line`
/// (1-based), or `None` when the line is out of range or the statement
/// never closes
///
/// Best-effort scan, not a parser: balances `()`, `[]`, and `{}` while
/// skipping string literals, character literals, and `//` comments. Raw
/// strings and block comments are not understood; registration code using
/// them may scan wrong and should fall back to single-line matching.
pub fn statement_extent(text: &str, start_line: u32) -> Option<u32> {
    if start_line == 0 {
        return None;
    }
    let lines: Vec<&str> = text.lines().collect();
    let start = (start_line - 1) as usize;
    if start >= lines.len() {
        return None;
    }

    let mut depth: i64 = 0;
    let mut opened = false;
    for (offset, line) in lines[start..].iter().enumerate() {
        let mut chars = line.chars().peekable();
        let mut in_str = false;
        while let Some(c) = chars.next() {
            if in_str {
                match c {
                    '\\' => {
                        chars.next();
                    }
                    '"' => in_str = false,
                    _ => {}
                }
                continue;
            }
            match c {
                '"' => in_str = true,
                '\'' => {
                    // Distinguish a char literal from a lifetime marker by
                    // looking for its closing quote
                    let mut look = chars.clone();
                    let is_char_literal = match look.next() {
                        Some('\\') => {
                            look.next();
                            matches!(look.next(), Some('\''))
                        }
                        Some(_) => matches!(look.next(), Some('\'')),
                        None => false,
                    };
                    if is_char_literal {
                        if matches!(chars.peek(), Some('\\')) {
                            chars.next();
                        }
                        chars.next();
                        chars.next();
                    }
                }
                '/' if chars.peek() == Some(&'/') => break,
                '(' | '[' | '{' => {
                    depth += 1;
                    opened = true;
                }
                ')' | ']' | '}' => depth -= 1,
                _ => {}
            }
        }
        if opened && depth <= 0 {
            return Some(offset as u32 + 1);
        }
        if !opened && offset == 0 {
            // No delimiters at all: the statement is its first line
            return Some(1);
        }
    }
    None
}
