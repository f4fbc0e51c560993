use async_trait::async_trait;
use catchup_core::event::Event;
use tokio_util::sync::CancellationToken;

use super::{BatchHandler, Listener, ListenerError, handler_error};

/// Delivers a fixed list of events as one batch, then stops.
#[derive(Debug, Clone)]
pub struct StaticListener<E> {
    events: Vec<E>,
    initialized: bool,
}

impl<E> StaticListener<E> {
    /// Creates a listener that yields `events`.
    #[must_use]
    pub fn new(events: Vec<E>) -> Self {
        Self {
            events,
            initialized: false,
        }
    }
}

#[async_trait]
impl<E: Event + Clone> Listener<E> for StaticListener<E> {
    async fn initialize(
        &mut self,
        _name: &str,
        _event_types: &[String],
    ) -> Result<(), ListenerError> {
        self.initialized = true;
        Ok(())
    }

    async fn listen(
        &self,
        cancel: &CancellationToken,
        handler: &dyn BatchHandler<E>,
    ) -> Result<(), ListenerError> {
        if !self.initialized {
            return Err(ListenerError::NotInitialized);
        }
        if self.events.is_empty() || cancel.is_cancelled() {
            return Ok(());
        }
        handler
            .handle(self.events.clone())
            .await
            .map_err(handler_error)
    }
}

#[cfg(test)]
mod tests {
    use catchup_core::error::BoxError;
    use catchup_test_support::{MockEvent, mock_event};

    use super::*;
    use crate::listener::testing::Recorder;

    #[tokio::test]
    async fn test_listen_before_initialize_fails() {
        let listener = StaticListener::new(vec![mock_event("1")]);

        let result = listener
            .listen(&CancellationToken::new(), &Recorder::default())
            .await;

        assert!(matches!(result, Err(ListenerError::NotInitialized)));
    }

    #[tokio::test]
    async fn test_delivers_events_as_one_batch() {
        let mut listener = StaticListener::new(vec![mock_event("1"), mock_event("2")]);
        listener.initialize("static", &[]).await.unwrap();
        let recorder = Recorder::default();

        listener
            .listen(&CancellationToken::new(), &recorder)
            .await
            .unwrap();

        assert_eq!(recorder.batches(), vec![vec!["1", "2"]]);
    }

    #[tokio::test]
    async fn test_handler_error_is_returned() {
        let mut listener = StaticListener::new(vec![mock_event("1")]);
        listener.initialize("static", &[]).await.unwrap();
        let failing =
            |_events: Vec<MockEvent>| async { Err::<(), BoxError>("read model down".into()) };

        let result = listener.listen(&CancellationToken::new(), &failing).await;

        match result {
            Err(ListenerError::Handler(err)) => assert_eq!(err.to_string(), "read model down"),
            other => panic!("expected Handler, got {other:?}"),
        }
    }
}
