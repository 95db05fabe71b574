//! Thread call-stack capture
//!
//! Interface dispatch maintains a per-thread stack of caller frames: every
//! `call` pushes the call site (file, line) together with the label of the
//! operation lexically containing it, and pops on return. Capturing the
//! stack is a plain thread-local read with no locking, so verification
//! never blocks.

use crate::types::StackFrame;
use std::cell::RefCell;

/// Label reported for code running outside any operation
pub const TOP_LEVEL_LABEL: &str = "<main>";

struct ActiveCall {
    /// Where the call was made from
    frame: StackFrame,
    /// Qualified name of the operation being executed
    callee: String,
}

thread_local! {
    static CALLS: RefCell<Vec<ActiveCall>> = const { RefCell::new(Vec::new()) };
}

/// Label of the operation currently executing on this thread
pub(crate) fn current_label() -> String {
    CALLS.with(|calls| {
        calls
            .borrow()
            .last()
            .map(|c| c.callee.clone())
            .unwrap_or_else(|| TOP_LEVEL_LABEL.to_string())
    })
}

/// Record a dispatch on the thread stack; the frame pops when the returned
/// guard drops, including on panic
pub(crate) fn push(frame: StackFrame, callee: String) -> FrameGuard {
    CALLS.with(|calls| calls.borrow_mut().push(ActiveCall { frame, callee }));
    FrameGuard { _private: () }
}

pub(crate) struct FrameGuard {
    _private: (),
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        CALLS.with(|calls| {
            calls.borrow_mut().pop();
        });
    }
}

/// Capture the current thread's call chain, immediate caller first
pub fn capture() -> Vec<StackFrame> {
    CALLS.with(|calls| calls.borrow().iter().rev().map(|c| c.frame.clone()).collect())
}

/// Source of caller frames for verification
///
/// Production code uses [`RuntimeStack`]; tests can substitute synthetic
/// stacks without driving real dispatch.
pub trait StackProvider: Send + Sync {
    /// Current call chain, ordered from the immediate caller outward
    fn current_call_stack(&self) -> Vec<StackFrame>;
}

/// [`StackProvider`] backed by the thread-local dispatch stack
#[derive(Debug, Default, Clone, Copy)]
pub struct RuntimeStack;

impl StackProvider for RuntimeStack {
    fn current_call_stack(&self) -> Vec<StackFrame> {
        capture()
    }
}
