use async_trait::async_trait;
use catchup_core::event::Event;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{BatchHandler, Listener, ListenerError};

/// Runs its children one after another, each to completion before the next
/// starts.
pub struct SequenceListener<E> {
    listeners: Vec<Box<dyn Listener<E>>>,
}

impl<E: Event> SequenceListener<E> {
    /// Creates a sequence over `listeners`, in order.
    #[must_use]
    pub fn new(listeners: Vec<Box<dyn Listener<E>>>) -> Self {
        Self { listeners }
    }
}

#[async_trait]
impl<E: Event> Listener<E> for SequenceListener<E> {
    async fn initialize(
        &mut self,
        name: &str,
        event_types: &[String],
    ) -> Result<(), ListenerError> {
        for listener in &mut self.listeners {
            listener.initialize(name, event_types).await?;
        }
        Ok(())
    }

    async fn listen(
        &self,
        cancel: &CancellationToken,
        handler: &dyn BatchHandler<E>,
    ) -> Result<(), ListenerError> {
        for (position, listener) in self.listeners.iter().enumerate() {
            if cancel.is_cancelled() {
                return Ok(());
            }
            debug!(position, "starting listener");
            listener.listen(cancel, handler).await?;
        }
        Ok(())
    }
}
