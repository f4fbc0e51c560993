use async_trait::async_trait;
use catchup_core::event::Event;
use futures::future::try_join_all;
use tokio_util::sync::CancellationToken;

use super::{BatchHandler, Listener, ListenerError};

/// Runs its children concurrently. The first error stops the siblings and is
/// returned as-is.
pub struct ParallelListener<E> {
    listeners: Vec<Box<dyn Listener<E>>>,
}

impl<E: Event> ParallelListener<E> {
    /// Creates a parallel group over `listeners`.
    #[must_use]
    pub fn new(listeners: Vec<Box<dyn Listener<E>>>) -> Self {
        Self { listeners }
    }
}

#[async_trait]
impl<E: Event> Listener<E> for ParallelListener<E> {
    async fn initialize(
        &mut self,
        name: &str,
        event_types: &[String],
    ) -> Result<(), ListenerError> {
        try_join_all(
            self.listeners
                .iter_mut()
                .map(|listener| listener.initialize(name, event_types)),
        )
        .await?;
        Ok(())
    }

    async fn listen(
        &self,
        cancel: &CancellationToken,
        handler: &dyn BatchHandler<E>,
    ) -> Result<(), ListenerError> {
        let group = cancel.child_token();
        let result = try_join_all(self.listeners.iter().map(|listener| {
            let group = &group;
            async move {
                let result = listener.listen(group, handler).await;
                if result.is_err() {
                    group.cancel();
                }
                result
            }
        }))
        .await;
        group.cancel();
        result.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use catchup_core::error::BoxError;
    use catchup_test_support::{MockEvent, mock_event};

    use super::*;
    use crate::listener::StaticListener;
    use crate::listener::testing::Recorder;

    /// Delivers nothing and runs until cancelled.
    struct UntilCancelled {
        stopped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Listener<MockEvent> for UntilCancelled {
        async fn initialize(
            &mut self,
            _name: &str,
            _event_types: &[String],
        ) -> Result<(), ListenerError> {
            Ok(())
        }

        async fn listen(
            &self,
            cancel: &CancellationToken,
            _handler: &dyn BatchHandler<MockEvent>,
        ) -> Result<(), ListenerError> {
            cancel.cancelled().await;
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_every_child_delivers() {
        let children: Vec<Box<dyn Listener<MockEvent>>> = (0..50)
            .map(|listener| {
                let events = (0..20)
                    .map(|event| mock_event(&format!("{listener}-{event}")))
                    .collect();
                Box::new(StaticListener::new(events)) as Box<dyn Listener<MockEvent>>
            })
            .collect();
        let mut parallel = ParallelListener::new(children);
        parallel.initialize("parallel", &[]).await.unwrap();
        let recorder = Recorder::default();

        parallel
            .listen(&CancellationToken::new(), &recorder)
            .await
            .unwrap();

        let ids: HashSet<String> = recorder.ids().into_iter().collect();
        assert_eq!(recorder.batches().len(), 50);
        assert_eq!(ids.len(), 1000);
    }

    #[tokio::test]
    async fn test_first_child_error_is_returned() {
        let mut parallel = ParallelListener::new(vec![
            Box::new(StaticListener::new(vec![mock_event("ok")])) as Box<dyn Listener<MockEvent>>,
            Box::new(StaticListener::new(vec![mock_event("boom")])),
        ]);
        parallel.initialize("parallel", &[]).await.unwrap();
        let handler = |events: Vec<MockEvent>| async move {
            if events.iter().any(|e| e.event_id() == "boom") {
                Err::<(), BoxError>("boom".into())
            } else {
                Ok(())
            }
        };

        let result = parallel.listen(&CancellationToken::new(), &handler).await;

        match result {
            Err(ListenerError::Handler(err)) => assert_eq!(err.to_string(), "boom"),
            other => panic!("expected Handler, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failing_child_stops_an_endless_sibling() {
        let stopped = Arc::new(AtomicBool::new(false));
        let mut parallel = ParallelListener::new(vec![
            Box::new(UntilCancelled {
                stopped: Arc::clone(&stopped),
            }) as Box<dyn Listener<MockEvent>>,
            Box::new(StaticListener::new(vec![mock_event("boom")])),
        ]);
        parallel.initialize("parallel", &[]).await.unwrap();
        let handler = |_events: Vec<MockEvent>| async { Err::<(), BoxError>("boom".into()) };
        let cancel = CancellationToken::new();

        let result =
            tokio::time::timeout(Duration::from_secs(5), parallel.listen(&cancel, &handler))
                .await
                .unwrap();

        match result {
            Err(ListenerError::Handler(err)) => assert_eq!(err.to_string(), "boom"),
            other => panic!("expected Handler, got {other:?}"),
        }
        assert!(stopped.load(Ordering::SeqCst));
        assert!(!cancel.is_cancelled());
    }
}
