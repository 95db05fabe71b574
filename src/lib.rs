//! # callgate
//!
//! Call-site capability enforcement for intra-process API boundaries.
//!
//! ## Overview
//!
//! `callgate` gates a "protected" interface's public operations behind a
//! designated "protector": a call runs only when the current call stack
//! proves it originated, directly or transitively, from inside one of the
//! protector's own public operations. This is runtime access control for
//! module boundaries inside one process: internal APIs stay reachable
//! (for layering, plugins, or compatibility) but reject any caller that
//! bypasses the sanctioned façade.
//!
//! ## Quick Start
//!
//! ```rust
//! use callgate::{protect, Interface, Visibility};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # fn example() -> callgate::Result<()> {
//! let store = Arc::new(Interface::new("Store"));
//! store.define("write", Visibility::Public, |_iface, inv| {
//!     Ok(inv.args.first().cloned().unwrap_or_default())
//! });
//!
//! let gateway = Interface::new("Gateway");
//! let target = Arc::clone(&store);
//! gateway.define("relay", Visibility::Public, move |_iface, inv| {
//!     target.call("write", inv.args)
//! });
//!
//! protect(&store, &gateway)?;
//!
//! // Allowed: the call stack passes through Gateway#relay
//! let written = gateway.call("relay", &[json!("x")])?;
//! assert_eq!(written, json!("x"));
//!
//! // Rejected: direct call from outside the gateway
//! assert!(store.call("write", &[json!("x")]).is_err());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **Interface** — a named surface of dynamically registered operations
//!   (instance-level and type-level tables) that records declared source
//!   locations and notifies observers of new declarations
//! - **RangeResolver** — turns a declared start location into the full
//!   line span of the operation body
//! - **SignatureCache** — process-wide, computed-once cache of each
//!   protector's public-operation source ranges
//! - **verify** — matches captured caller frames against a signature
//! - **protect** — wraps public operations with the caller check,
//!   preserving originals under private aliases, and keeps wrapping
//!   operations declared after install
//!
//! Wrapping is one-way: there is no unprotect, and cached signatures are
//! never invalidated.

pub mod cache;
pub mod error;
pub mod guard;
pub mod interface;
pub mod range;
pub mod source;
pub mod stack;
pub mod types;
pub mod verify;

// Re-export core types
pub use cache::{Signature, SignatureCache};
pub use error::{GuardError, Result};
pub use guard::{protect, protect_with, GuardConfig};
pub use interface::{Block, Interface, Invocation, OpBody, Operation, OperationDeclared};
pub use range::{MatchStrategy, RangeResolver};
pub use source::{statement_extent, FsSourceReader, MemorySourceReader, SourceReader};
pub use stack::{RuntimeStack, StackProvider, TOP_LEVEL_LABEL};
pub use types::{InterfaceId, OpKind, SourceLocation, SourceRange, StackFrame, Visibility};
