//! Ordered stages, each protected by its own error handler.

use std::sync::Arc;

use tracing::debug;

use crate::{
    exchange::Exchange,
    failure::Failure,
    handler::{Disposition, ErrorHandler},
};

/// Runs protected stages in order.
///
/// The message is snapshotted on entry, before any stage mutates it, so
/// policies using the original message see what the pipeline received.
/// Routing stops after a stage whose failure was handled or dead-lettered,
/// and at the first failure that propagates. A continued failure lets the
/// next stage run.
#[derive(Clone, Debug, Default)]
pub struct Pipeline {
    route_id: Option<Arc<str>>,
    stages: Vec<ErrorHandler>,
}

impl Pipeline {
    /// Create an empty pipeline for `route_id`.
    pub fn new(route_id: impl Into<Arc<str>>) -> Self {
        Self {
            route_id: Some(route_id.into()),
            stages: Vec::new(),
        }
    }

    /// Append a protected stage.
    #[must_use]
    pub fn stage(mut self, handler: ErrorHandler) -> Self {
        self.stages.push(handler);
        self
    }

    /// Route identifier.
    #[must_use]
    pub fn route_id(&self) -> Option<&str> { self.route_id.as_deref() }

    /// Number of stages.
    #[must_use]
    pub fn len(&self) -> usize { self.stages.len() }

    /// Returns `true` if the pipeline has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.stages.is_empty() }

    /// Run every stage until one stops routing.
    ///
    /// Returns the disposition of the last stage that ran.
    ///
    /// # Errors
    ///
    /// Returns the primary failure of the first stage whose failure
    /// propagated. Later stages do not run.
    pub async fn process(&self, exchange: &mut Exchange) -> Result<Disposition, Failure> {
        exchange.capture_original();
        if exchange.route_id().is_none() {
            exchange.set_route_id(self.route_id.clone());
        }
        let mut last = Disposition::Completed;
        for (index, handler) in self.stages.iter().enumerate() {
            last = handler.process(exchange).await?;
            if last.stops_routing() || exchange.is_route_stop() {
                debug!(
                    exchange = %exchange.id(),
                    stage = index,
                    disposition = ?last,
                    "routing stopped"
                );
                break;
            }
        }
        Ok(last)
    }

    /// Stop every stage's handler.
    pub fn stop(&self) {
        for handler in &self.stages {
            handler.stop();
        }
    }
}
