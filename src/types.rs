//! Core data types for caller verification

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-unique identity of an interface
///
/// Used as a cache key. Equality and hashing are by identity, never by
/// structural content: two interfaces with identical operations are still
/// distinct authorities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InterfaceId(u64);

impl InterfaceId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which dispatch table an operation lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    /// Instance-level operation
    Instance,
    /// Type-level ("static") operation
    Static,
}

/// Operation visibility
///
/// Only public operations are dispatchable from outside and eligible for
/// wrapping. Private entries exist for preserved originals and internal
/// delegation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Externally callable
    Public,
    /// Internal only
    Private,
}

/// The position reflection reports as an operation's declaration start
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    /// Source file path, as the compiler reports it
    pub file: String,
    /// 1-based line number
    pub line: u32,
}

impl SourceLocation {
    /// Create a new source location
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// The full line span of an operation's body
///
/// Invariant: `start <= end`. Computed once per operation and immutable
/// thereafter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRange {
    /// Source file path
    pub file: String,
    /// First line of the operation, 1-based
    pub start: u32,
    /// Last line of the operation, inclusive
    pub end: u32,
}

impl SourceRange {
    /// Create a new range spanning `start..=end`
    pub fn new(file: impl Into<String>, start: u32, end: u32) -> Self {
        debug_assert!(start <= end, "range start must not exceed end");
        Self {
            file: file.into(),
            start,
            end,
        }
    }

    /// Create a range covering a single line
    pub fn single_line(file: impl Into<String>, line: u32) -> Self {
        Self::new(file, line, line)
    }

    /// Check whether a caller position falls inside this range
    pub fn contains(&self, file: &str, line: u32) -> bool {
        self.file == file && self.start <= line && line <= self.end
    }
}

impl fmt::Display for SourceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.file, self.start, self.end)
    }
}

/// One captured caller frame
///
/// A capture is ordered from the immediate caller outward; the label names
/// the operation whose body contains the call site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    /// File the executing code lives in
    pub file: String,
    /// Current line within that file
    pub line: u32,
    /// Human-readable label of the enclosing operation
    pub label: String,
}

impl StackFrame {
    /// Create a new frame
    pub fn new(file: impl Into<String>, line: u32, label: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line,
            label: label.into(),
        }
    }
}
