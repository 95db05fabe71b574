//! Source-range resolution for declared operations
//!
//! Turns an operation's declared start location into the full line span of
//! its registration statement, so a caller anywhere inside a multi-line
//! body can be matched, not just on the first line.

use crate::interface::{Interface, Operation};
use crate::source::{FsSourceReader, SourceReader};
use crate::types::{OpKind, SourceRange};
use std::sync::Arc;

/// How caller frames are matched against an operation's source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MatchStrategy {
    /// Match any line within the operation's body (default)
    #[default]
    FullBody,
    /// Match only the declared start line
    ///
    /// Explicit fallback for hosts that cannot expose source text. Trades
    /// precision for portability: calls from later lines of a multi-line
    /// body are rejected.
    DeclaredLineOnly,
}

/// Resolves declared operations to their full source ranges
#[derive(Clone)]
pub struct RangeResolver {
    reader: Arc<dyn SourceReader>,
    strategy: MatchStrategy,
}

impl Default for RangeResolver {
    fn default() -> Self {
        Self {
            reader: Arc::new(FsSourceReader::new()),
            strategy: MatchStrategy::default(),
        }
    }
}

impl RangeResolver {
    /// Create a resolver with an explicit reader and strategy
    pub fn new(reader: Arc<dyn SourceReader>, strategy: MatchStrategy) -> Self {
        Self { reader, strategy }
    }

    /// The configured matching strategy
    pub fn strategy(&self) -> MatchStrategy {
        self.strategy
    }

    /// Full source range of one operation
    ///
    /// Returns `None` when the operation is not source-backed or its extent
    /// cannot be determined; such operations are excluded from signatures,
    /// never treated as errors.
    pub fn resolve(&self, op: &Operation) -> Option<SourceRange> {
        let location = op.location()?;
        match self.strategy {
            MatchStrategy::DeclaredLineOnly => {
                Some(SourceRange::single_line(&location.file, location.line))
            }
            MatchStrategy::FullBody => {
                let lines = self.reader.statement_lines(location)?;
                Some(SourceRange::new(
                    &location.file,
                    location.line,
                    location.line + lines.saturating_sub(1),
                ))
            }
        }
    }

    /// Ranges of every public operation (type-level and instance-level) on
    /// `interface`, dropping operations without resolvable ranges
    pub fn public_operation_ranges(&self, interface: &Interface) -> Vec<SourceRange> {
        let mut ranges = Vec::new();
        for kind in [OpKind::Static, OpKind::Instance] {
            for op in interface.public_operations(kind) {
                match self.resolve(&op) {
                    Some(range) => ranges.push(range),
                    None => tracing::debug!(
                        interface = %interface.name(),
                        operation = %op.name(),
                        "No resolvable source range, excluded"
                    ),
                }
            }
        }
        ranges
    }
}
