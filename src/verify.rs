//! Call-stack verification against a protector signature

use crate::cache::Signature;
use crate::error::{GuardError, Result};
use crate::stack::TOP_LEVEL_LABEL;
use crate::types::StackFrame;

/// Check that at least one caller frame originates inside the protector
///
/// Frames are ordered from the immediate caller outward; the first frame
/// falling inside any signature range satisfies the check. The scan is
/// O(frames × ranges); both are small in practice, since call stacks are
/// shallow and signatures are bounded by public-operation count.
pub fn verify(signature: &Signature, frames: &[StackFrame]) -> Result<()> {
    for frame in frames {
        if let Some(range) = signature.matching_range(frame) {
            tracing::trace!(
                file = %frame.file,
                line = frame.line,
                range = %range,
                "Caller authorized"
            );
            return Ok(());
        }
    }

    let caller = frames
        .first()
        .map(|f| f.label.clone())
        .unwrap_or_else(|| TOP_LEVEL_LABEL.to_string());
    let violation = GuardError::Violation {
        caller,
        protector: signature.protector_name().to_string(),
    };
    tracing::warn!(%violation, "Rejected call");
    Err(violation)
}
