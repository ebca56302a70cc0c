//! Pipeline stages: the units of processing the error handler protects.

use std::{fmt, sync::Arc};

use async_trait::async_trait;

use crate::{exchange::Exchange, failure::Failure};

/// One step of processing that may fail.
#[async_trait]
pub trait Stage: Send + Sync + 'static {
    /// Process the exchange in place.
    ///
    /// # Errors
    ///
    /// Returns the primary [`Failure`] when processing fails.
    async fn process(&self, exchange: &mut Exchange) -> Result<(), Failure>;
}

#[async_trait]
impl<S: Stage + ?Sized> Stage for Arc<S> {
    async fn process(&self, exchange: &mut Exchange) -> Result<(), Failure> {
        (**self).process(exchange).await
    }
}

/// Shared, type-erased stage.
pub type SharedStage = Arc<dyn Stage>;

/// Stage backed by a synchronous closure.
pub struct FnStage<F> {
    f: F,
}

impl<F> fmt::Debug for FnStage<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str("FnStage") }
}

#[async_trait]
impl<F> Stage for FnStage<F>
where
    F: Fn(&mut Exchange) -> Result<(), Failure> + Send + Sync + 'static,
{
    async fn process(&self, exchange: &mut Exchange) -> Result<(), Failure> { (self.f)(exchange) }
}

/// Wrap a synchronous closure as a [`Stage`].
///
/// ```
/// use redelivery::{exchange::Exchange, failure::Failure, stage::stage_fn};
///
/// let upper = stage_fn(|ex: &mut Exchange| -> Result<(), Failure> {
///     let body = ex.body().to_ascii_uppercase();
///     ex.set_body(body);
///     Ok(())
/// });
/// # let _ = upper;
/// ```
pub fn stage_fn<F>(f: F) -> FnStage<F>
where
    F: Fn(&mut Exchange) -> Result<(), Failure> + Send + Sync + 'static,
{
    FnStage { f }
}
