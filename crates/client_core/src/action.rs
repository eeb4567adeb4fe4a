use std::sync::Arc;

use async_trait::async_trait;

use crate::{error::ActionError, state::RequestToken};

/// One external operation a controller serializes.
///
/// `perform` must resolve exactly once per call with either the success payload
/// or a structured [`ActionError`]. The controller never retries it.
#[async_trait]
pub trait Action: Send + Sync + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn perform(
        &self,
        input: Self::Input,
        token: RequestToken,
    ) -> Result<Self::Output, ActionError>;
}

#[async_trait]
impl<A> Action for Arc<A>
where
    A: Action,
{
    type Input = A::Input;
    type Output = A::Output;

    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn perform(
        &self,
        input: Self::Input,
        token: RequestToken,
    ) -> Result<Self::Output, ActionError> {
        (**self).perform(input, token).await
    }
}

/// Presentation callbacks, invoked on the controller's execution context only.
pub trait RenderHooks<R>: Send + 'static {
    fn on_pending(&mut self) {}

    fn on_success(&mut self, result: &R);

    fn on_failure(&mut self, error: &ActionError);
}

/// Hooks for callers that only await tickets.
pub struct SilentHooks;

impl<R> RenderHooks<R> for SilentHooks {
    fn on_success(&mut self, _result: &R) {}

    fn on_failure(&mut self, _error: &ActionError) {}
}
