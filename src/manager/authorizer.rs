//! Channel authorizers
//!
//! An authorizer decides whether a caller may subscribe to a secured
//! channel, given the caller context and the parameters captured from the
//! channel name. Errors and panics both count as a denial.

use async_trait::async_trait;

use crate::channel::ChannelParams;

/// Access policy for one secured channel pattern
#[async_trait]
pub trait ChannelAuthorizer<C>: Send + Sync
where
    C: Send + Sync + 'static,
{
    /// Return `Ok(true)` to allow the subscription
    async fn authorize(&self, context: &C, params: &ChannelParams) -> anyhow::Result<bool>;
}

/// Adapter for synchronous closures
pub(crate) struct FnAuthorizer<F>(pub(crate) F);

#[async_trait]
impl<C, F> ChannelAuthorizer<C> for FnAuthorizer<F>
where
    C: Send + Sync + 'static,
    F: Fn(&C, &ChannelParams) -> anyhow::Result<bool> + Send + Sync,
{
    async fn authorize(&self, context: &C, params: &ChannelParams) -> anyhow::Result<bool> {
        (self.0)(context, params)
    }
}
