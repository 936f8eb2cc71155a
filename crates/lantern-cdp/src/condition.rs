//! Per-breakpoint condition evaluation, run on the engine thread while a
//! break event is in flight.

use lantern_diag::DiagEngine;

use crate::core::SkipPauseRequest;

/// Evaluate a breakpoint condition at the innermost call frame. The debugger
/// stops only when the expression evaluates truthy; an evaluation failure
/// counts as "pause anyway".
pub(crate) fn evaluate<E: DiagEngine>(engine: &E, condition: &str) -> SkipPauseRequest {
    match engine.evaluate_at_frame(condition, 0) {
        Ok(value) if value.is_truthy() => SkipPauseRequest::NoSkip,
        Ok(_) => SkipPauseRequest::Continue,
        Err(err) => {
            tracing::debug!("breakpoint condition failed to evaluate: {err}");
            SkipPauseRequest::NoSkip
        }
    }
}
