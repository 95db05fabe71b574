//! Interception install and future-operation coverage
//!
//! [`protect`] rewrites every public operation of a protected interface so
//! a caller check runs before the original body, and keeps rewriting as
//! new operations are declared. Each original is preserved under a private
//! alias; the installed wrapper captures the current call stack, verifies
//! it against the protector's cached signature, and only then delegates,
//! with arguments, block, and return value passing through unchanged.

use crate::cache::SignatureCache;
use crate::error::{GuardError, Result};
use crate::interface::{Interface, OperationDeclared};
use crate::range::{MatchStrategy, RangeResolver};
use crate::source::SourceReader;
use crate::stack::{RuntimeStack, StackProvider};
use crate::types::{InterfaceId, OpKind, Visibility};
use crate::verify::verify;
use regex::Regex;
use std::sync::{Arc, OnceLock};

/// Prefix under which original implementations are preserved
const ALIAS_PREFIX: &str = "_callgate_";

/// Names the rewrite machinery must never touch
fn skip_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^_callgate_").unwrap())
}

/// Protector identity carried into wrappers and the declaration hook
#[derive(Debug, Clone)]
struct Authority {
    id: InterfaceId,
    name: String,
}

/// Configuration for a protection install
///
/// Controls how protector source ranges are resolved and where caller
/// frames come from. The defaults read source from the filesystem, match
/// full operation bodies, and capture the thread dispatch stack.
#[derive(Clone)]
pub struct GuardConfig {
    reader: Arc<dyn SourceReader>,
    strategy: MatchStrategy,
    stack: Arc<dyn StackProvider>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            reader: Arc::new(crate::source::FsSourceReader::new()),
            strategy: MatchStrategy::default(),
            stack: Arc::new(RuntimeStack),
        }
    }
}

impl GuardConfig {
    /// Create the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the source reader used to resolve protector ranges
    pub fn with_reader(mut self, reader: Arc<dyn SourceReader>) -> Self {
        self.reader = reader;
        self
    }

    /// Set the caller-matching strategy
    pub fn with_strategy(mut self, strategy: MatchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the call-stack provider consulted at call time
    pub fn with_stack_provider(mut self, stack: Arc<dyn StackProvider>) -> Self {
        self.stack = stack;
        self
    }

    fn resolver(&self) -> RangeResolver {
        RangeResolver::new(Arc::clone(&self.reader), self.strategy)
    }
}

/// Gate `protected`'s public operations behind `protector`
///
/// After this returns, every public operation of `protected` (including
/// operations declared later) verifies that the current call stack
/// contains a frame inside one of `protector`'s public operations before
/// running. Fails with [`GuardError::Configuration`] when the protector
/// has no inspectable public operations, or when `protected` is already
/// bound to a different protector.
pub fn protect(protected: &Interface, protector: &Interface) -> Result<()> {
    protect_with(protected, protector, GuardConfig::default())
}

/// [`protect`] with explicit source, strategy, and stack configuration
///
/// The configuration is captured at install time and reused by the
/// declaration hook for operations declared later.
pub fn protect_with(protected: &Interface, protector: &Interface, config: GuardConfig) -> Result<()> {
    // Fail fast: a protector with nothing to match is a setup error, not
    // something to discover on the first guarded call
    SignatureCache::global().get_or_compute(protector, &config.resolver())?;

    let _install = protected
        .install_lock()
        .lock()
        .map_err(|e| GuardError::Lock(format!("install lock poisoned: {}", e)))?;

    let authority = Authority {
        id: protector.id(),
        name: protector.name().to_string(),
    };

    let first_install = match protected.authority().get() {
        Some((bound_id, bound_name)) => {
            if *bound_id != authority.id {
                return Err(GuardError::Configuration(format!(
                    "interface '{}' is already protected by '{}'",
                    protected.name(),
                    bound_name
                )));
            }
            false
        }
        None => {
            let _ = protected.authority().set((authority.id, authority.name.clone()));
            true
        }
    };

    if first_install {
        let hook_authority = authority.clone();
        let hook_config = config.clone();
        protected.on_operation_declared(move |iface, declared| {
            on_future_declaration(iface, declared, &hook_authority, &hook_config);
        });
        tracing::debug!(
            interface = %protected.name(),
            protector = %authority.name,
            "Declaration hook registered"
        );
    }

    for kind in [OpKind::Instance, OpKind::Static] {
        for op in protected.public_operations(kind) {
            wrap_operation(protected, op.name(), kind, &authority, &config)?;
        }
    }

    Ok(())
}

/// Eligibility shared by install-time wrapping and the declaration hook
fn should_wrap(iface: &Interface, name: &str, kind: OpKind) -> bool {
    // Don't interfere with the rewrite machinery
    if skip_pattern().is_match(name) {
        return false;
    }
    // And definitely don't wrap twice
    if iface.contains(kind, &format!("{}{}", ALIAS_PREFIX, name)) {
        return false;
    }
    iface.visibility(kind, name) == Some(Visibility::Public)
}

/// Preserve `name` under its private alias and redefine it as a verifying
/// wrapper
fn wrap_operation(
    iface: &Interface,
    name: &str,
    kind: OpKind,
    authority: &Authority,
    config: &GuardConfig,
) -> Result<()> {
    if !should_wrap(iface, name, kind) {
        tracing::debug!(interface = %iface.name(), operation = name, "Skipped rewrite");
        return Ok(());
    }

    let alias = format!("{}{}", ALIAS_PREFIX, name);
    iface.alias(kind, &alias, name)?;

    let protector_id = authority.id;
    let protector_name = authority.name.clone();
    let stack = Arc::clone(&config.stack);
    iface.redefine(kind, name, move |iface, invocation| {
        let signature = SignatureCache::global()
            .get(protector_id)?
            .ok_or_else(|| {
                GuardError::Configuration(format!(
                    "no cached signature for protector '{}'",
                    protector_name
                ))
            })?;
        verify(&signature, &stack.current_call_stack())?;
        iface.invoke_internal(kind, &alias, invocation)
    })?;

    tracing::debug!(
        interface = %iface.name(),
        operation = name,
        ?kind,
        protector = %authority.name,
        "Operation protected"
    );
    Ok(())
}

/// Declaration-hook body: wrap operations declared after install
///
/// Runs on the declaring thread. The cheap eligibility pre-filter screens
/// out the machinery's own alias and redefine notifications before the
/// install lock is taken, so wrapping from inside an install never
/// re-enters the lock.
fn on_future_declaration(
    iface: &Interface,
    declared: &OperationDeclared,
    authority: &Authority,
    config: &GuardConfig,
) {
    if !should_wrap(iface, &declared.name, declared.kind) {
        return;
    }

    let Ok(_install) = iface.install_lock().lock() else {
        tracing::warn!(
            interface = %iface.name(),
            operation = %declared.name,
            "Install lock poisoned, newly declared operation left unprotected"
        );
        return;
    };

    // Re-check under the lock: a concurrent install may have got here first
    if !should_wrap(iface, &declared.name, declared.kind) {
        return;
    }

    if let Err(err) = wrap_operation(iface, &declared.name, declared.kind, authority, config) {
        tracing::warn!(
            interface = %iface.name(),
            operation = %declared.name,
            %err,
            "Failed to protect newly declared operation"
        );
    }
}
