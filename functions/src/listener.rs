// functions/src/listener.rs

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tracing::Instrument;

use crate::config::ConfigError;
use crate::pipeline::Pipeline;
use crate::queue::{Delivery, MessageSource};
use crate::store::ObjectStore;

/// How the listener claims messages.
#[derive(Debug, Clone)]
pub struct ListenerSettings {
    /// Messages claimed but not yet settled. One keeps processing strictly
    /// sequential.
    pub max_outstanding_messages: usize,
    /// Interval at which a claimed message's lock is renewed while it is
    /// processed. `None` never extends the deadline, so a slow run may see
    /// its message redelivered elsewhere.
    pub lock_renewal: Option<Duration>,
    /// Pause after an empty or failed receive.
    pub idle_interval: Duration,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            max_outstanding_messages: 1,
            lock_renewal: None,
            idle_interval: Duration::from_secs(5),
        }
    }
}

impl ListenerSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limit = self.max_outstanding_messages;
        // shutdown drains by taking every permit back in one u32 sized call
        if limit == 0 || limit > Semaphore::MAX_PERMITS || u32::try_from(limit).is_err() {
            return Err(ConfigError::Invalid {
                name: "max_outstanding_messages",
                value: limit.to_string(),
            });
        }
        if self.lock_renewal == Some(Duration::ZERO) {
            return Err(ConfigError::Invalid {
                name: "lock_renewal",
                value: "0s".to_owned(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Acked,
    Nacked,
}

pub struct Listener<Q, S> {
    source: Q,
    pipeline: Arc<Pipeline<S>>,
    settings: ListenerSettings,
}

impl<Q, S> Listener<Q, S>
where
    Q: MessageSource + Sync,
    S: ObjectStore + Send + Sync + 'static,
{
    pub fn new(source: Q, pipeline: Pipeline<S>, settings: ListenerSettings) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            source,
            pipeline: Arc::new(pipeline),
            settings,
        })
    }

    pub fn settings(&self) -> &ListenerSettings {
        &self.settings
    }

    /// Run one claimed message through the pipeline and settle it.
    pub async fn handle(&self, delivery: Q::Delivery) -> Outcome {
        handle_delivery(&*self.pipeline, delivery, self.settings.lock_renewal).await
    }

    /// Claim and process messages until `shutdown` flips to `true` or its
    /// sender goes away. Returns once in-flight messages are settled.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let limit = self.settings.max_outstanding_messages;
        let semaphore = Arc::new(Semaphore::new(limit));

        tracing::info!(
            max_outstanding_messages = limit,
            lock_renewal = ?self.settings.lock_renewal,
            "starting listener"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let permit = tokio::select! {
                _ = shutdown.changed() => break,
                permit = semaphore.clone().acquire_owned() => permit,
            };
            let Ok(permit) = permit else {
                break;
            };

            let received = tokio::select! {
                _ = shutdown.changed() => break,
                received = self.source.receive() => received,
            };

            match received {
                Ok(Some(delivery)) => {
                    let pipeline = self.pipeline.clone();
                    let lock_renewal = self.settings.lock_renewal;
                    tokio::spawn(
                        async move {
                            handle_delivery(&*pipeline, delivery, lock_renewal).await;
                            drop(permit);
                        }
                        .instrument(tracing::info_span!("message")),
                    );
                    continue;
                }
                Ok(None) => {
                    drop(permit);
                    tracing::debug!("no messages received, sleeping");
                }
                Err(err) => {
                    drop(permit);
                    tracing::warn!(error = %err, "error receiving messages");
                }
            }

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(self.settings.idle_interval) => {}
            }
        }

        tracing::info!("listener stopping, waiting for in-flight messages");

        // every permit back means nothing is in flight
        let _ = semaphore.acquire_many(u32::try_from(limit).unwrap_or(u32::MAX)).await;

        tracing::info!("listener stopped");
    }
}

/// Process a delivery and ack it on success or nack it on any failure.
/// Errors never escape: they are logged and turned into a nack.
pub async fn handle_delivery<S, D>(pipeline: &Pipeline<S>, delivery: D, lock_renewal: Option<Duration>) -> Outcome
where
    S: ObjectStore + Sync,
    D: Delivery,
{
    let result = match lock_renewal {
        None => pipeline.process(delivery.data()).await,
        Some(period) => {
            let process = pipeline.process(delivery.data());
            tokio::pin!(process);

            let mut ticker = tokio::time::interval(period);
            // the first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    result = &mut process => break result,
                    _ = ticker.tick() => {
                        if let Err(err) = delivery.renew().await {
                            tracing::warn!(error = %err, "failed to renew message lock");
                        }
                    }
                }
            }
        }
    };

    match result {
        Ok(processed) => {
            tracing::info!(
                bucket = %processed.source_bucket,
                key = %processed.key,
                content_type = %processed.content_type,
                original_size = processed.original_size,
                resized_size = processed.resized_size,
                "processed image uploaded"
            );

            if let Err(err) = delivery.ack().await {
                tracing::error!(error = %err, "failed to ack message");
            }
            Outcome::Acked
        }
        Err(err) => {
            tracing::error!(
                step = err.step(),
                permanent = err.is_permanent(),
                error = %err,
                "failed to process message"
            );

            if let Err(err) = delivery.nack().await {
                tracing::error!(error = %err, "failed to nack message");
            }
            Outcome::Nacked
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    use super::*;
    use crate::queue::memory::MemoryDelivery;
    use crate::queue::{MemoryQueue, QueueError};
    use crate::store::MemoryStore;

    /// Source that never has a message and counts how often it was asked.
    #[derive(Clone, Default)]
    struct CountingSource {
        failing: bool,
        receives: Arc<AtomicUsize>,
    }

    impl MessageSource for CountingSource {
        type Delivery = MemoryDelivery;

        async fn receive(&self) -> Result<Option<MemoryDelivery>, QueueError> {
            self.receives.fetch_add(1, Ordering::SeqCst);
            if self.failing {
                Err(QueueError::Closed)
            } else {
                Ok(None)
            }
        }
    }

    async fn receives_during_window(source: CountingSource) -> usize {
        let receives = source.receives.clone();
        let pipeline = Pipeline::new(MemoryStore::new(), "resized");
        let settings = ListenerSettings {
            idle_interval: Duration::from_secs(5),
            ..Default::default()
        };
        let listener = Listener::new(source, pipeline, settings).unwrap();

        let (tx, rx) = watch::channel(false);
        let run = tokio::spawn(async move { listener.run(rx).await });

        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("listener did not stop")
            .unwrap();

        receives.load(Ordering::SeqCst)
    }

    /// Counts ERROR level events.
    struct ErrorCounter(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> Layer<S> for ErrorCounter {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == tracing::Level::ERROR {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn default_settings_are_sequential() {
        let settings = ListenerSettings::default();
        assert_eq!(settings.max_outstanding_messages, 1);
        assert!(settings.lock_renewal.is_none());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn zero_limit_is_rejected() {
        let settings = ListenerSettings {
            max_outstanding_messages: 0,
            ..Default::default()
        };
        let pipeline = Pipeline::new(MemoryStore::new(), "resized");
        assert!(Listener::new(MemoryQueue::new(), pipeline, settings).is_err());
    }

    #[test]
    fn oversized_limit_is_rejected() {
        let settings = ListenerSettings {
            max_outstanding_messages: usize::MAX,
            ..Default::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Invalid {
                name: "max_outstanding_messages",
                ..
            })
        ));

        let settings = ListenerSettings {
            max_outstanding_messages: 64,
            ..Default::default()
        };
        assert!(settings.validate().is_ok());
    }

    #[tokio::test]
    async fn empty_receive_sleeps_for_idle_interval() {
        assert_eq!(receives_during_window(CountingSource::default()).await, 1);
    }

    #[tokio::test]
    async fn failed_receive_sleeps_for_idle_interval() {
        let source = CountingSource {
            failing: true,
            ..Default::default()
        };
        assert_eq!(receives_during_window(source).await, 1);
    }

    #[tokio::test]
    async fn failure_is_logged_once() {
        let errors = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(ErrorCounter(errors.clone()));
        let _guard = tracing::subscriber::set_default(subscriber);

        let queue = MemoryQueue::new();
        queue.push(&b"invalid json"[..]).await;
        let delivery = queue.receive().await.unwrap().unwrap();

        let pipeline = Pipeline::new(MemoryStore::new(), "resized");
        assert_eq!(handle_delivery(&pipeline, delivery, None).await, Outcome::Nacked);
        assert_eq!(errors.load(Ordering::SeqCst), 1);

        // the source object is missing, so the download step fails
        let queue = MemoryQueue::new();
        queue.push(&br#"{"bucket":"source-bucket","name":"image.jpg"}"#[..]).await;
        let delivery = queue.receive().await.unwrap().unwrap();
        assert_eq!(handle_delivery(&pipeline, delivery, None).await, Outcome::Nacked);
        assert_eq!(errors.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn malformed_message_is_nacked() {
        let queue = MemoryQueue::new();
        queue.push(&b"invalid json"[..]).await;

        let pipeline = Pipeline::new(MemoryStore::new(), "resized");
        let listener = Listener::new(queue.clone(), pipeline, ListenerSettings::default()).unwrap();

        let delivery = queue.receive().await.unwrap().unwrap();
        assert_eq!(listener.handle(delivery).await, Outcome::Nacked);
        assert_eq!(queue.nacked().await, 1);
        assert_eq!(queue.acked().await, 0);
    }

    #[tokio::test]
    async fn stops_when_shutdown_is_signalled() {
        let queue = MemoryQueue::new();
        let pipeline = Pipeline::new(MemoryStore::new(), "resized");
        let settings = ListenerSettings {
            idle_interval: Duration::from_millis(10),
            ..Default::default()
        };
        let listener = Listener::new(queue, pipeline, settings).unwrap();

        let (tx, rx) = watch::channel(false);
        let run = tokio::spawn(async move { listener.run(rx).await });

        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("listener did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn receive_errors_do_not_stop_the_loop() {
        let queue = MemoryQueue::new();
        queue.close().await;

        let pipeline = Pipeline::new(MemoryStore::new(), "resized");
        let settings = ListenerSettings {
            idle_interval: Duration::from_millis(5),
            ..Default::default()
        };
        let listener = Listener::new(queue, pipeline, settings).unwrap();

        let (tx, rx) = watch::channel(false);
        let run = tokio::spawn(async move { listener.run(rx).await });

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!run.is_finished());

        drop(tx);
        tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("listener did not stop")
            .unwrap();
    }
}
