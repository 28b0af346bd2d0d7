//! Lazy, single-flight acquisition of the counter collection.
//!
//! The first caller to need the collection starts one connection attempt;
//! everyone arriving while it runs awaits that same attempt and receives the
//! same handle or the same error. A failed attempt returns the manager to
//! [`ConnectionStatus::Uninitialized`] so the next caller retries from scratch.
//!
//! Shutdown is single-flight too. While an owned connection is being closed
//! the manager reports [`ConnectionStatus::Closing`] and acquisitions wait
//! for the close to finish before connecting again, so at most one
//! connection sequence is ever running.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};

use ratestore_core::StoreError;
use ratestore_core::ports::{CollectionConnector, CounterCollection};

type CollectionHandle = Arc<dyn CounterCollection>;
type Flight = Shared<BoxFuture<'static, Result<CollectionHandle, StoreError>>>;
type CloseFlight = Shared<BoxFuture<'static, Result<(), StoreError>>>;

/// Observable acquisition state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Uninitialized,
    Initializing,
    Initialized,
    Closing,
}

enum ConnectionState {
    Uninitialized,
    Initializing { generation: u64, flight: Flight },
    Initialized { generation: u64, handle: CollectionHandle },
    Closing { generation: u64, done: CloseFlight },
}

/// What an `acquire` call does once the state lock is released.
enum Step {
    Ready(CollectionHandle),
    Join { generation: u64, flight: Flight },
    AwaitClose { generation: u64, done: CloseFlight },
}

/// Owns the collection handle for one store.
///
/// Built either around a connector, in which case the handle is created on
/// first use and owned here, or around a handle supplied by the caller,
/// which is never connected or closed by the manager.
pub struct ConnectionManager {
    connector: Option<Arc<dyn CollectionConnector>>,
    state: Mutex<ConnectionState>,
    generations: AtomicU64,
}

impl ConnectionManager {
    /// Manager that connects lazily through `connector`.
    pub fn new(connector: Arc<dyn CollectionConnector>) -> Self {
        Self {
            connector: Some(connector),
            state: Mutex::new(ConnectionState::Uninitialized),
            generations: AtomicU64::new(0),
        }
    }

    /// Manager around an externally owned handle. Starts initialized.
    pub fn with_collection(collection: CollectionHandle) -> Self {
        Self {
            connector: None,
            state: Mutex::new(ConnectionState::Initialized {
                generation: 0,
                handle: collection,
            }),
            generations: AtomicU64::new(0),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        match &*self.lock_state() {
            ConnectionState::Uninitialized => ConnectionStatus::Uninitialized,
            ConnectionState::Initializing { .. } => ConnectionStatus::Initializing,
            ConnectionState::Initialized { .. } => ConnectionStatus::Initialized,
            ConnectionState::Closing { .. } => ConnectionStatus::Closing,
        }
    }

    /// Whether the manager created, and therefore owns, its connection.
    pub fn owns_connection(&self) -> bool {
        self.connector.is_some()
    }

    /// Return the collection handle, connecting if nobody has yet.
    ///
    /// A handle whose attempt was overtaken by a shutdown is never returned;
    /// the caller waits for the close and reconnects instead.
    pub async fn acquire(&self) -> Result<CollectionHandle, StoreError> {
        loop {
            match self.next_step()? {
                Step::Ready(handle) => return Ok(handle),
                Step::Join { generation, flight } => {
                    let outcome = flight.await;
                    if let Some(outcome) = self.settle(generation, outcome) {
                        return outcome;
                    }
                    tracing::debug!(
                        attempt = generation,
                        "Acquired collection was shut down, reconnecting"
                    );
                }
                Step::AwaitClose { generation, done } => {
                    tracing::debug!("Waiting for collection shutdown before reconnecting");
                    let _ = done.await;
                    self.finish_close(generation);
                }
            }
        }
    }

    /// Close an owned connection and return to `Uninitialized`.
    ///
    /// An attempt still in flight is awaited and its connection closed.
    /// Concurrent calls share one close. A supplied handle is left
    /// untouched; closing it is its owner's call.
    pub async fn shutdown(&self) -> Result<(), StoreError> {
        if !self.owns_connection() {
            return Ok(());
        }

        let (generation, done) = {
            let mut state = self.lock_state();
            match &*state {
                ConnectionState::Uninitialized => return Ok(()),
                ConnectionState::Closing { generation, done } => (*generation, done.clone()),
                ConnectionState::Initialized { handle, .. } => {
                    let handle = Arc::clone(handle);
                    self.begin_close(&mut state, close(handle))
                }
                ConnectionState::Initializing { flight, .. } => {
                    let flight = flight.clone();
                    self.begin_close(&mut state, async move {
                        match flight.await {
                            Ok(handle) => close(handle).await,
                            // Nothing was opened, so nothing to close.
                            Err(_) => Ok(()),
                        }
                    })
                }
            }
        };

        let outcome = done.await;
        self.finish_close(generation);
        outcome
    }

    fn next_step(&self) -> Result<Step, StoreError> {
        let mut state = self.lock_state();
        let step = match &*state {
            ConnectionState::Initialized { handle, .. } => Step::Ready(Arc::clone(handle)),
            ConnectionState::Initializing { generation, flight } => {
                tracing::debug!(attempt = generation, "Joining in-flight collection acquisition");
                Step::Join {
                    generation: *generation,
                    flight: flight.clone(),
                }
            }
            ConnectionState::Closing { generation, done } => Step::AwaitClose {
                generation: *generation,
                done: done.clone(),
            },
            ConnectionState::Uninitialized => {
                let connector = self.connector.clone().ok_or_else(|| {
                    StoreError::Configuration("no collection or connector configured".to_string())
                })?;

                let generation = self.next_generation();
                tracing::debug!(attempt = generation, "Starting collection acquisition");

                let flight = async move {
                    AssertUnwindSafe(async move { connector.connect().await })
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| {
                            Err(StoreError::Connection("collection connector panicked".to_string()))
                        })
                }
                .boxed()
                .shared();
                *state = ConnectionState::Initializing {
                    generation,
                    flight: flight.clone(),
                };
                Step::Join { generation, flight }
            }
        };
        Ok(step)
    }

    /// Move to `Closing` around `close`, returning the shared close flight.
    fn begin_close<F>(&self, state: &mut ConnectionState, close: F) -> (u64, CloseFlight)
    where
        F: std::future::Future<Output = Result<(), StoreError>> + Send + 'static,
    {
        let generation = self.next_generation();
        let done = close.boxed().shared();
        *state = ConnectionState::Closing {
            generation,
            done: done.clone(),
        };
        (generation, done)
    }

    /// Leave `Closing` once its close has run. A newer state is left alone.
    fn finish_close(&self, generation: u64) {
        let mut state = self.lock_state();
        if matches!(
            &*state,
            ConnectionState::Closing { generation: closing, .. } if *closing == generation
        ) {
            *state = ConnectionState::Uninitialized;
        }
    }

    /// Apply the outcome of attempt `generation` and decide what the waiter
    /// gets. Every waiter calls this; the first one moves the state and the
    /// rest find it already settled.
    ///
    /// Returns `None` when a shutdown took over the attempt's handle, in
    /// which case the waiter must start over.
    fn settle(
        &self,
        generation: u64,
        outcome: Result<CollectionHandle, StoreError>,
    ) -> Option<Result<CollectionHandle, StoreError>> {
        let mut state = self.lock_state();
        let running = matches!(
            &*state,
            ConnectionState::Initializing { generation: current, .. } if *current == generation
        );
        let settled = matches!(
            &*state,
            ConnectionState::Initialized { generation: current, .. } if *current == generation
        );

        match outcome {
            Ok(handle) if running => {
                tracing::debug!(attempt = generation, "Collection acquired");
                *state = ConnectionState::Initialized {
                    generation,
                    handle: Arc::clone(&handle),
                };
                Some(Ok(handle))
            }
            Ok(handle) if settled => Some(Ok(handle)),
            Ok(_) => None,
            Err(error) => {
                if running {
                    tracing::warn!(attempt = generation, %error, "Collection acquisition failed");
                    *state = ConnectionState::Uninitialized;
                }
                Some(Err(error))
            }
        }
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn lock_state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn close(handle: CollectionHandle) -> Result<(), StoreError> {
    handle.close().await?;
    tracing::info!("Counter collection connection closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::collection::InMemoryCounterCollection;

    /// Connector that sleeps before answering and counts its calls, along
    /// with the most connection sequences it ever saw running at once.
    /// Fails every attempt up to and including `fail_until`.
    struct SlowConnector {
        calls: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
        fail_until: usize,
        delay: Duration,
    }

    impl SlowConnector {
        fn new(fail_until: usize) -> Arc<Self> {
            Self::with_delay(fail_until, Duration::from_millis(20))
        }

        fn with_delay(fail_until: usize, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
                fail_until,
                delay,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn max_active(&self) -> usize {
            self.max_active.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CollectionConnector for SlowConnector {
        async fn connect(&self) -> Result<CollectionHandle, StoreError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);

            tokio::time::sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            if call <= self.fail_until {
                return Err(StoreError::Connection(format!("attempt {call} refused")));
            }
            Ok(Arc::new(InMemoryCounterCollection::new()))
        }
    }

    /// Connector whose first `panics` attempts panic instead of returning.
    struct PanickingConnector {
        calls: AtomicUsize,
        panics: usize,
    }

    #[async_trait]
    impl CollectionConnector for PanickingConnector {
        async fn connect(&self) -> Result<CollectionHandle, StoreError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(Duration::from_millis(5)).await;
            if call <= self.panics {
                panic!("driver blew up on attempt {call}");
            }
            Ok(Arc::new(InMemoryCounterCollection::new()))
        }
    }

    #[tokio::test]
    async fn test_supplied_collection_starts_initialized() {
        let manager = ConnectionManager::with_collection(Arc::new(InMemoryCounterCollection::new()));
        assert_eq!(manager.status(), ConnectionStatus::Initialized);
        assert!(!manager.owns_connection());
        assert!(manager.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_acquire_connects_once() {
        let connector = SlowConnector::new(0);
        let manager = ConnectionManager::new(connector.clone());
        assert_eq!(manager.status(), ConnectionStatus::Uninitialized);

        let handles = futures::future::join_all((0..8).map(|_| manager.acquire())).await;

        assert_eq!(connector.calls(), 1);
        let handles: Vec<_> = handles.into_iter().map(Result::unwrap).collect();
        assert!(handles.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
        assert_eq!(manager.status(), ConnectionStatus::Initialized);
    }

    #[tokio::test]
    async fn test_status_while_initializing() {
        let connector = SlowConnector::new(0);
        let manager = ConnectionManager::new(connector);

        let mut pending = Box::pin(manager.acquire());
        assert!(futures::poll!(pending.as_mut()).is_pending());
        assert_eq!(manager.status(), ConnectionStatus::Initializing);

        pending.await.unwrap();
        assert_eq!(manager.status(), ConnectionStatus::Initialized);
    }

    #[tokio::test]
    async fn test_failure_is_shared_then_retried() {
        let connector = SlowConnector::new(1);
        let manager = ConnectionManager::new(connector.clone());

        let results = futures::future::join_all((0..5).map(|_| manager.acquire())).await;
        assert_eq!(connector.calls(), 1);
        for result in &results {
            assert_eq!(
                result.as_ref().err(),
                Some(&StoreError::Connection("attempt 1 refused".to_string()))
            );
        }
        assert_eq!(manager.status(), ConnectionStatus::Uninitialized);

        assert!(manager.acquire().await.is_ok());
        assert_eq!(connector.calls(), 2);
        assert_eq!(manager.status(), ConnectionStatus::Initialized);
    }

    #[tokio::test]
    async fn test_shutdown_resets_owned_connection() {
        let connector = SlowConnector::new(0);
        let manager = ConnectionManager::new(connector.clone());

        manager.acquire().await.unwrap();
        manager.shutdown().await.unwrap();
        assert_eq!(manager.status(), ConnectionStatus::Uninitialized);

        manager.acquire().await.unwrap();
        assert_eq!(connector.calls(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_during_acquisition_keeps_single_flight() {
        let connector = SlowConnector::with_delay(0, Duration::from_millis(50));
        let manager = Arc::new(ConnectionManager::new(connector.clone()));

        let first = tokio::spawn({
            let manager = manager.clone();
            async move { manager.acquire().await }
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(manager.status(), ConnectionStatus::Initializing);

        let closing = tokio::spawn({
            let manager = manager.clone();
            async move { manager.shutdown().await }
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(manager.status(), ConnectionStatus::Closing);

        let second = tokio::spawn({
            let manager = manager.clone();
            async move { manager.acquire().await }
        });

        closing.await.unwrap().unwrap();
        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();

        assert_eq!(connector.max_active(), 1);
        // The attempt the shutdown closed is never handed out; both callers
        // share the reconnection that follows it.
        assert_eq!(connector.calls(), 2);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(manager.status(), ConnectionStatus::Initialized);
    }

    #[tokio::test]
    async fn test_concurrent_shutdowns_share_one_close() {
        let connector = SlowConnector::new(0);
        let manager = ConnectionManager::new(connector.clone());
        manager.acquire().await.unwrap();

        let (a, b) = futures::join!(manager.shutdown(), manager.shutdown());
        a.unwrap();
        b.unwrap();
        assert_eq!(manager.status(), ConnectionStatus::Uninitialized);
        assert_eq!(connector.calls(), 1);
    }

    #[tokio::test]
    async fn test_panicking_connector_fails_attempt_and_recovers() {
        let connector = Arc::new(PanickingConnector {
            calls: AtomicUsize::new(0),
            panics: 1,
        });
        let manager = ConnectionManager::new(connector.clone());

        let results = futures::future::join_all((0..3).map(|_| manager.acquire())).await;
        for result in results {
            assert!(matches!(result, Err(StoreError::Connection(_))));
        }
        assert_eq!(manager.status(), ConnectionStatus::Uninitialized);

        assert!(manager.acquire().await.is_ok());
        assert_eq!(connector.calls.load(Ordering::SeqCst), 2);
        assert_eq!(manager.status(), ConnectionStatus::Initialized);
    }

    #[tokio::test]
    async fn test_shutdown_leaves_supplied_collection() {
        let manager = ConnectionManager::with_collection(Arc::new(InMemoryCounterCollection::new()));
        manager.shutdown().await.unwrap();
        assert_eq!(manager.status(), ConnectionStatus::Initialized);
    }
}
