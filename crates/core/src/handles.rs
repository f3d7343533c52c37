use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Lazily-initialised, explicitly scoped slot for a shared client.
///
/// The first `acquire` runs its initialiser while holding the slot lock, so
/// concurrent callers wait for it and then share the same `Arc`. A failed
/// initialiser leaves the slot empty for the next caller to retry.
pub struct SharedHandle<T> {
    slot: Mutex<Option<Arc<T>>>,
}

impl<T> Default for SharedHandle<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SharedHandle<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    pub async fn acquire<F, Fut, E>(&self, init: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut slot = self.slot.lock().await;
        if let Some(value) = slot.as_ref() {
            return Ok(Arc::clone(value));
        }

        let value = Arc::new(init().await?);
        *slot = Some(Arc::clone(&value));
        Ok(value)
    }

    /// Replaces the held value, returning the previous one.
    pub async fn install(&self, value: T) -> Option<Arc<T>> {
        self.slot.lock().await.replace(Arc::new(value))
    }

    pub async fn release(&self) -> Option<Arc<T>> {
        self.slot.lock().await.take()
    }

    pub async fn is_initialised(&self) -> bool {
        self.slot.lock().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn initialiser_runs_once_under_concurrency() {
        let handle = Arc::new(SharedHandle::<usize>::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let handle = Arc::clone(&handle);
            let runs = Arc::clone(&runs);
            tasks.push(tokio::spawn(async move {
                handle
                    .acquire(|| async {
                        runs.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, String>(42)
                    })
                    .await
            }));
        }

        for task in tasks {
            let value = task.await.expect("task joins").expect("init succeeds");
            assert_eq!(*value, 42);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_init_leaves_slot_empty() {
        let handle = SharedHandle::<u8>::new();
        let failed = handle.acquire(|| async { Err::<u8, _>("boom") }).await;
        assert_eq!(failed.err(), Some("boom"));
        assert!(!handle.is_initialised().await);

        let value = handle.acquire(|| async { Ok::<_, &str>(7) }).await;
        assert_eq!(value.ok().map(|value| *value), Some(7));
    }

    #[tokio::test]
    async fn install_and_release_swap_the_value() {
        let handle = SharedHandle::<&'static str>::new();
        assert!(handle.install("fake").await.is_none());

        let current = handle
            .acquire(|| async { Ok::<_, ()>("real") })
            .await
            .expect("installed value is returned");
        assert_eq!(*current, "fake");

        let released = handle.release().await;
        assert_eq!(released.map(|value| *value), Some("fake"));
        assert!(!handle.is_initialised().await);
    }
}
