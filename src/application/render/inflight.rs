use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};

use super::TransformFailure;
use crate::application::engine::EngineError;

type SharedTransform = Shared<BoxFuture<'static, Result<Bytes, TransformFailure>>>;

/// Role a caller played in a coalesced transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flight {
    /// Started the work.
    Leader,
    /// Joined work another request had already started.
    Follower,
}

/// Per-process single-flight table keyed by cache artifact.
///
/// Concurrent misses on the same key share one transform: the first caller
/// spawns the work, later callers await the same shared join handle. The work
/// runs to completion even when every waiter has gone away, and its entry is
/// removed when the task finishes or unwinds.
#[derive(Default, Clone)]
pub struct InFlightTransforms {
    inner: Arc<DashMap<String, SharedTransform>>,
}

impl InFlightTransforms {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
        }
    }

    pub async fn run<F>(&self, key: String, work: F) -> (Result<Bytes, TransformFailure>, Flight)
    where
        F: Future<Output = Result<Bytes, TransformFailure>> + Send + 'static,
    {
        let (shared, flight) = match self.inner.entry(key.clone()) {
            Entry::Occupied(occupied) => (occupied.get().clone(), Flight::Follower),
            Entry::Vacant(vacant) => {
                let guard = EntryGuard {
                    table: Arc::clone(&self.inner),
                    key,
                };
                let task = tokio::spawn(async move {
                    let _guard = guard;
                    work.await
                });
                let shared = async move {
                    task.await.unwrap_or_else(|err| {
                        Err(TransformFailure::Engine(EngineError::Join(err.to_string())))
                    })
                }
                .boxed()
                .shared();
                vacant.insert(shared.clone());
                (shared, Flight::Leader)
            }
        };

        (shared.await, flight)
    }

    /// Number of keys with work in progress.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Drops the table entry for `key` once the spawned work is done with it.
struct EntryGuard {
    table: Arc<DashMap<String, SharedTransform>>,
    key: String,
}

impl Drop for EntryGuard {
    fn drop(&mut self) {
        self.table.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn concurrent_callers_share_one_execution() {
        let table = InFlightTransforms::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let table = table.clone();
            let runs = Arc::clone(&runs);
            handles.push(tokio::spawn(async move {
                table
                    .run("folder/abc_1.webp".to_string(), async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(Bytes::from_static(b"variant"))
                    })
                    .await
            }));
        }

        let mut leaders = 0;
        for handle in handles {
            let (result, flight) = handle.await.expect("task");
            assert_eq!(result.expect("ok"), "variant");
            if flight == Flight::Leader {
                leaders += 1;
            }
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(leaders, 1);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn failures_are_shared_and_cleared() {
        let table = InFlightTransforms::new();

        let (result, flight) = table
            .run("k".to_string(), async {
                Err(TransformFailure::Engine(EngineError::Decode("bad".into())))
            })
            .await;
        assert!(matches!(result, Err(TransformFailure::Engine(_))));
        assert_eq!(flight, Flight::Leader);
        assert_eq!(table.len(), 0);

        // A later call starts fresh work.
        let (result, flight) = table
            .run("k".to_string(), async { Ok(Bytes::from_static(b"ok")) })
            .await;
        assert!(result.is_ok());
        assert_eq!(flight, Flight::Leader);
    }

    #[tokio::test]
    async fn abandoned_work_still_finishes_and_clears_its_entry() {
        let table = InFlightTransforms::new();
        let finished = Arc::new(AtomicUsize::new(0));

        let completed = Arc::clone(&finished);
        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            table.run("k".to_string(), async move {
                tokio::time::sleep(Duration::from_millis(60)).await;
                completed.fetch_add(1, Ordering::SeqCst);
                Ok(Bytes::from_static(b"late"))
            }),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(table.len(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn panicking_work_is_reported_and_cleared() {
        let table = InFlightTransforms::new();

        let (result, _) = table
            .run("k".to_string(), async { panic!("engine blew up") })
            .await;
        assert!(matches!(
            result,
            Err(TransformFailure::Engine(EngineError::Join(_)))
        ));
        assert!(table.is_empty());
    }
}
