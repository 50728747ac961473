//! The unit-of-work contract.

use crate::execution::context::OperationContext;
use crate::execution::error::ExecutionResult;

/// One logical, retryable, atomic operation against storage.
///
/// The engine holds only a transient reference during a single `execute`
/// call. `action` may run several times - once per attempt - so any state
/// it mutates must tolerate re-execution, or be guarded with
/// [`OperationContext::is_restarted`].
///
/// Plain closures `Fn(&mut OperationContext) -> ExecutionResult<T>` are
/// units of work with no-op hooks.
pub trait UnitOfWork {
    type Output;

    /// The operation body, invoked once per attempt.
    fn action(&self, cx: &mut OperationContext) -> ExecutionResult<Self::Output>;

    /// Invoked once the operation finally succeeds.
    fn on_success(&self, _cx: &mut OperationContext) {}

    /// Invoked after each failed attempt, while the failing session is
    /// still bound to the context.
    fn on_failure(&self, _cx: &mut OperationContext) {}
}

impl<F, T> UnitOfWork for F
where
    F: Fn(&mut OperationContext) -> ExecutionResult<T>,
{
    type Output = T;

    fn action(&self, cx: &mut OperationContext) -> ExecutionResult<T> {
        self(cx)
    }
}
