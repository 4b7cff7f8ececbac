//! RPC arbiter (spec §4.6): request admission, serialization of mutating
//! LVM operations, and single-flight coalescing of concurrent requests
//! sharing a natural key and nonce.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::future::{FutureExt, Shared};
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::error::CoreError;

type BoxFut<T> = Pin<Box<dyn Future<Output = Result<T, CoreError>> + Send>>;

struct Entry {
    nonce: Option<String>,
    shared: Box<dyn Any + Send + Sync>,
}

/// Admission + serialization + coalescing layer sitting between the
/// server facade and the volume service.
pub struct Arbiter {
    admission: Arc<Semaphore>,
    rw: Arc<RwLock<()>>,
    inflight: Arc<Mutex<HashMap<String, Entry>>>,
}

impl Arbiter {
    pub fn new(request_limit: usize) -> Self {
        Self {
            admission: Arc::new(Semaphore::new(request_limit)),
            rw: Arc::new(RwLock::new(())),
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Runs a mutating operation (writer lock, subject to the admission
    /// budget) under the given natural key and nonce. Concurrent callers
    /// with the same key+nonce observe the same result; a differing
    /// nonce on the same key fails with `Aborted`.
    pub async fn call_mutating<T, F, Fut>(
        &self,
        key: impl Into<String>,
        nonce: Option<String>,
        cancel: CancellationToken,
        op: F,
    ) -> Result<T, CoreError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, CoreError>> + Send + 'static,
        T: Clone + Send + Sync + 'static,
    {
        let permit = self
            .admission
            .clone()
            .try_acquire_owned()
            .map_err(|_| CoreError::Unavailable("Too many requests in flight".to_string()))?;

        let result = self
            .join_or_lead(key.into(), nonce, true, cancel, op)
            .await;
        drop(permit);
        result
    }

    /// Runs a read-only operation (reader lock, not subject to the
    /// admission budget) under the given key/nonce.
    pub async fn call_readonly<T, F, Fut>(
        &self,
        key: impl Into<String>,
        nonce: Option<String>,
        cancel: CancellationToken,
        op: F,
    ) -> Result<T, CoreError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, CoreError>> + Send + 'static,
        T: Clone + Send + Sync + 'static,
    {
        self.join_or_lead(key.into(), nonce, false, cancel, op).await
    }

    async fn join_or_lead<T, F, Fut>(
        &self,
        key: String,
        nonce: Option<String>,
        mutating: bool,
        cancel: CancellationToken,
        op: F,
    ) -> Result<T, CoreError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, CoreError>> + Send + 'static,
        T: Clone + Send + Sync + 'static,
    {
        let shared: Shared<BoxFut<T>> = {
            let mut inflight = self.inflight.lock().await;
            match inflight.get(&key) {
                Some(entry) => {
                    if entry.nonce != nonce {
                        return Err(CoreError::Aborted(
                            "A competing operation, with conflicting parameters, is already in progress."
                                .to_string(),
                        ));
                    }
                    entry
                        .shared
                        .downcast_ref::<Shared<BoxFut<T>>>()
                        .expect("natural keys are never reused across RPC types")
                        .clone()
                }
                None => {
                    let rw = self.rw.clone();
                    // The worker is detached from any individual caller's
                    // cancellation: its context carries the callers'
                    // *values* (key, nonce) but not a particular caller's
                    // deadline, per spec §9.
                    let worker: BoxFut<T> = Box::pin(async move {
                        let _guard: Box<dyn Send> = if mutating {
                            Box::new(rw.write_owned().await)
                        } else {
                            Box::new(rw.read_owned().await)
                        };
                        op().await
                    });
                    let handle = tokio::spawn(worker);
                    let joined: BoxFut<T> = Box::pin(async move {
                        match handle.await {
                            Ok(result) => result,
                            Err(e) => Err(CoreError::Internal(format!("worker task panicked: {}", e))),
                        }
                    });
                    let shared = joined.shared();
                    inflight.insert(
                        key.clone(),
                        Entry {
                            nonce,
                            shared: Box::new(shared.clone()),
                        },
                    );

                    // Cleanup is decoupled from any individual caller's
                    // cancellation: the entry is removed exactly once,
                    // when the work actually finishes, regardless of how
                    // many waiters dropped out along the way.
                    let cleanup_shared = shared.clone();
                    let cleanup_inflight = self.inflight.clone();
                    let cleanup_key = key.clone();
                    tokio::spawn(async move {
                        let _ = cleanup_shared.await;
                        cleanup_inflight.lock().await.remove(&cleanup_key);
                    });

                    shared
                }
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                Err(CoreError::Canceled("the caller disconnected".to_string()))
            }
            result = shared => result,
        }
    }

    /// Number of admission permits currently available. Exposed for
    /// tests asserting invariant 6 (no more than N mutating RPCs
    /// in-flight at once).
    pub fn available_permits(&self) -> usize {
        self.admission.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn identical_concurrent_calls_coalesce() {
        let arbiter = Arc::new(Arbiter::new(10));
        let executions = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let arbiter = arbiter.clone();
            let executions = executions.clone();
            handles.push(tokio::spawn(async move {
                arbiter
                    .call_mutating(
                        "new/v1",
                        Some("nonce-a".to_string()),
                        CancellationToken::new(),
                        move || {
                            let executions = executions.clone();
                            async move {
                                executions.fetch_add(1, Ordering::SeqCst);
                                tokio::time::sleep(Duration::from_millis(20)).await;
                                Ok::<u64, CoreError>(42)
                            }
                        },
                    )
                    .await
            }));
        }

        let mut results = Vec::new();
        for h in handles {
            results.push(h.await.unwrap().unwrap());
        }

        assert_eq!(executions.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| *r == 42));
    }

    #[tokio::test]
    async fn conflicting_nonce_is_aborted() {
        let arbiter = Arc::new(Arbiter::new(10));
        let a = {
            let arbiter = arbiter.clone();
            tokio::spawn(async move {
                arbiter
                    .call_mutating("new/v1", Some("nonce-a".into()), CancellationToken::new(), || async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<u64, CoreError>(1)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        let b = arbiter
            .call_mutating("new/v1", Some("nonce-b".into()), CancellationToken::new(), || async {
                Ok::<u64, CoreError>(2)
            })
            .await;

        assert!(matches!(b, Err(CoreError::Aborted(_))));
        assert_eq!(a.await.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn admission_budget_rejects_overflow() {
        let arbiter = Arc::new(Arbiter::new(2));
        let mut handles = Vec::new();
        for i in 0..5 {
            let arbiter = arbiter.clone();
            handles.push(tokio::spawn(async move {
                arbiter
                    .call_mutating(format!("new/v{}", i), None, CancellationToken::new(), || async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<u64, CoreError>(1)
                    })
                    .await
            }));
            // Ensure each call is admitted (or rejected) before issuing the next.
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let mut ok = 0;
        let mut unavailable = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => ok += 1,
                Err(CoreError::Unavailable(_)) => unavailable += 1,
                Err(other) => panic!("unexpected error: {:?}", other),
            }
        }
        assert_eq!(ok, 2);
        assert_eq!(unavailable, 3);
    }

    #[tokio::test]
    async fn cancellation_does_not_abort_shared_execution() {
        let arbiter = Arc::new(Arbiter::new(10));
        let executions = Arc::new(AtomicUsize::new(0));

        let leader_cancel = CancellationToken::new();
        let follower_cancel = CancellationToken::new();

        let leader = {
            let arbiter = arbiter.clone();
            let executions = executions.clone();
            let cancel = leader_cancel.clone();
            tokio::spawn(async move {
                arbiter
                    .call_mutating("new/v1", None, cancel, move || {
                        let executions = executions.clone();
                        async move {
                            tokio::time::sleep(Duration::from_millis(30)).await;
                            executions.fetch_add(1, Ordering::SeqCst);
                            Ok::<u64, CoreError>(7)
                        }
                    })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(5)).await;
        let follower = {
            let arbiter = arbiter.clone();
            let cancel = follower_cancel.clone();
            tokio::spawn(async move {
                arbiter
                    .call_mutating("new/v1", None, cancel, || async { Ok::<u64, CoreError>(7) })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(5)).await;
        follower_cancel.cancel();

        let follower_result = follower.await.unwrap();
        assert!(matches!(follower_result, Err(CoreError::Canceled(_))));

        let leader_result = leader.await.unwrap().unwrap();
        assert_eq!(leader_result, 7);
        assert_eq!(executions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_releases_admission_slot() {
        let arbiter = Arc::new(Arbiter::new(1));
        let cancel = CancellationToken::new();

        let caller = {
            let arbiter = arbiter.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                arbiter
                    .call_mutating("new/slow", None, cancel, || async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<u64, CoreError>(0)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(arbiter.available_permits(), 0);

        cancel.cancel();
        let result = caller.await.unwrap();
        assert!(matches!(result, Err(CoreError::Canceled(_))));
        assert_eq!(arbiter.available_permits(), 1);
    }
}
