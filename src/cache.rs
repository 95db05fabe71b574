//! Process-wide protector signature cache
//!
//! Enumerating a protector's public operations and resolving their source
//! ranges costs file reads and text scans, so the result is computed at
//! most once per protector per process and memoized. Entries are immutable
//! once set and never invalidated: a protector that gains public
//! operations after first use keeps its original signature.

use crate::error::{GuardError, Result};
use crate::interface::Interface;
use crate::range::RangeResolver;
use crate::types::{InterfaceId, SourceRange, StackFrame};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, RwLock};

/// The allow-list for one protector: source ranges of its public operations
///
/// Invariant: non-empty. A protector with zero resolvable public
/// operations is a configuration error, never an empty (silently
/// permissive) signature.
#[derive(Debug, Clone)]
pub struct Signature {
    protector_name: String,
    ranges: Vec<SourceRange>,
}

impl Signature {
    /// Display name of the protector this signature belongs to
    pub fn protector_name(&self) -> &str {
        &self.protector_name
    }

    /// The covered source ranges
    pub fn ranges(&self) -> &[SourceRange] {
        &self.ranges
    }

    /// First range containing the frame, if any
    pub fn matching_range(&self, frame: &StackFrame) -> Option<&SourceRange> {
        self.ranges.iter().find(|r| r.contains(&frame.file, frame.line))
    }
}

/// Process-wide cache of protector signatures
///
/// Reads take the `RwLock` fast path; computation serializes on a single
/// process-wide mutex with a re-check after acquisition, so concurrent
/// requesters for the same protector observe exactly one computation.
pub struct SignatureCache {
    entries: RwLock<HashMap<InterfaceId, Arc<Signature>>>,
    compute: Mutex<()>,
}

impl SignatureCache {
    /// The process-wide instance
    pub fn global() -> &'static SignatureCache {
        static CACHE: OnceLock<SignatureCache> = OnceLock::new();
        CACHE.get_or_init(SignatureCache::new)
    }

    /// Create a fresh, empty cache
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            compute: Mutex::new(()),
        }
    }

    /// Cached signature for a protector, if already computed
    pub fn get(&self, id: InterfaceId) -> Result<Option<Arc<Signature>>> {
        let entries = self
            .entries
            .read()
            .map_err(|e| GuardError::Lock(format!("signature cache poisoned: {}", e)))?;
        Ok(entries.get(&id).cloned())
    }

    /// Signature for `protector`, computing and memoizing it on first use
    ///
    /// Fails with [`GuardError::Configuration`] when the protector has no
    /// inspectable public operations.
    pub fn get_or_compute(
        &self,
        protector: &Interface,
        resolver: &RangeResolver,
    ) -> Result<Arc<Signature>> {
        if let Some(signature) = self.get(protector.id())? {
            return Ok(signature);
        }

        let _compute = self
            .compute
            .lock()
            .map_err(|e| GuardError::Lock(format!("signature compute lock poisoned: {}", e)))?;

        // Another thread may have finished while we waited
        if let Some(signature) = self.get(protector.id())? {
            return Ok(signature);
        }

        let ranges = resolver.public_operation_ranges(protector);
        if ranges.is_empty() {
            return Err(GuardError::Configuration(format!(
                "protector '{}' has no inspectable public operations",
                protector.name()
            )));
        }
        let signature = Arc::new(Signature {
            protector_name: protector.name().to_string(),
            ranges,
        });

        let mut entries = self
            .entries
            .write()
            .map_err(|e| GuardError::Lock(format!("signature cache poisoned: {}", e)))?;
        entries.insert(protector.id(), Arc::clone(&signature));
        tracing::debug!(
            protector = %protector.name(),
            ranges = signature.ranges().len(),
            "Signature cached"
        );
        Ok(signature)
    }

    /// Number of cached signatures
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SignatureCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range::MatchStrategy;
    use crate::source::{MemorySourceReader, SourceReader};
    use crate::types::{OpKind, SourceLocation, Visibility};
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    /// Reader that counts file reads, to observe computation happening once
    struct CountingReader {
        inner: MemorySourceReader,
        reads: AtomicUsize,
    }

    impl CountingReader {
        fn new(file: &str, text: impl Into<String>) -> Self {
            let inner = MemorySourceReader::new();
            inner.insert(file, text);
            Self {
                inner,
                reads: AtomicUsize::new(0),
            }
        }
    }

    impl SourceReader for CountingReader {
        fn file_text(&self, location: &SourceLocation) -> Option<String> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.file_text(location)
        }
    }

    fn protector_with_ops(count: usize) -> Interface {
        let protector = Interface::new("Gateway");
        for i in 0..count {
            protector.define_at(
                OpKind::Instance,
                format!("op{}", i),
                Visibility::Public,
                Some(SourceLocation::new("gw.rs", (i as u32 * 10) + 1)),
                |_iface, _inv| Ok(Value::Null),
            );
        }
        protector
    }

    #[test]
    fn test_computed_once_and_memoized() {
        let reader = Arc::new(CountingReader::new("gw.rs", "a()\n".repeat(50)));
        let resolver = RangeResolver::new(Arc::clone(&reader) as Arc<dyn SourceReader>, MatchStrategy::FullBody);
        let cache = SignatureCache::new();
        let protector = protector_with_ops(3);

        let first = cache.get_or_compute(&protector, &resolver).unwrap();
        let second = cache.get_or_compute(&protector, &resolver).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(reader.reads.load(Ordering::SeqCst), 3);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_empty_protector_is_configuration_error() {
        let cache = SignatureCache::new();
        let resolver = RangeResolver::default();
        let protector = Interface::new("Empty");

        let err = cache.get_or_compute(&protector, &resolver).unwrap_err();
        assert!(matches!(err, GuardError::Configuration(_)));
        assert!(err.to_string().contains("Empty"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_unresolvable_only_protector_is_configuration_error() {
        let cache = SignatureCache::new();
        let resolver = RangeResolver::new(Arc::new(MemorySourceReader::new()), MatchStrategy::FullBody);
        let protector = Interface::new("Opaque");
        protector.define_at(OpKind::Instance, "op", Visibility::Public, None, |_iface, _inv| {
            Ok(Value::Null)
        });

        let err = cache.get_or_compute(&protector, &resolver).unwrap_err();
        assert!(matches!(err, GuardError::Configuration(_)));
    }

    #[test]
    fn test_concurrent_requesters_observe_one_computation() {
        let reader = Arc::new(CountingReader::new("gw.rs", "a()\n".repeat(50)));
        let resolver = RangeResolver::new(Arc::clone(&reader) as Arc<dyn SourceReader>, MatchStrategy::FullBody);
        let cache = Arc::new(SignatureCache::new());
        let protector = Arc::new(protector_with_ops(4));

        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let protector = Arc::clone(&protector);
                let resolver = resolver.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    cache.get_or_compute(&protector, &resolver).unwrap()
                })
            })
            .collect();

        let signatures: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for signature in &signatures[1..] {
            assert!(Arc::ptr_eq(&signatures[0], signature));
        }
        // One read per operation, not per requester
        assert_eq!(reader.reads.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_distinct_protectors_get_distinct_entries() {
        let reader = Arc::new(CountingReader::new("gw.rs", "a()\n".repeat(50)));
        let resolver = RangeResolver::new(Arc::clone(&reader) as Arc<dyn SourceReader>, MatchStrategy::FullBody);
        let cache = SignatureCache::new();

        let a = protector_with_ops(1);
        let b = protector_with_ops(1);
        let sig_a = cache.get_or_compute(&a, &resolver).unwrap();
        let sig_b = cache.get_or_compute(&b, &resolver).unwrap();

        assert!(!Arc::ptr_eq(&sig_a, &sig_b));
        assert_eq!(cache.len(), 2);
    }
}
