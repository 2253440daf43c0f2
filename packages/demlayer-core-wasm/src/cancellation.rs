use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{AbortHandle, Abortable};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::TileError;

struct TokenState {
    cancelled: AtomicBool,
    next_handle: AtomicU64,
    // Handles of the futures currently running under the token.
    handles: Mutex<HashMap<u64, AbortHandle>>,
}

/// Shared cancel flag for one tile request. Cancelling aborts every future
/// currently running under [`CancellationToken::run`].
#[derive(Clone)]
pub struct CancellationToken {
    pub id: String,
    state: Arc<TokenState>,
}

impl CancellationToken {
    pub fn new(id: String) -> Self {
        Self {
            id,
            state: Arc::new(TokenState {
                cancelled: AtomicBool::new(false),
                next_handle: AtomicU64::new(0),
                handles: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn random() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }

    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
        let handles = std::mem::take(&mut *self.state.handles.lock());
        for handle in handles.into_values() {
            handle.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    pub fn throw_if_cancelled(&self) -> Result<(), TileError> {
        if self.is_cancelled() {
            Err(TileError::Cancelled(self.id.clone()))
        } else {
            Ok(())
        }
    }

    /// Drives `fut` until it completes or the token is cancelled.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, TileError> {
        self.throw_if_cancelled()?;
        let (handle, registration) = AbortHandle::new_pair();
        let key = self.state.next_handle.fetch_add(1, Ordering::SeqCst);
        self.state.handles.lock().insert(key, handle.clone());
        // cancel() may have drained the map before the insert above.
        if self.is_cancelled() {
            handle.abort();
        }
        let outcome = Abortable::new(fut, registration).await;
        self.state.handles.lock().remove(&key);
        outcome.map_err(|_| TileError::Cancelled(self.id.clone()))
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("id", &self.id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::oneshot;
    use futures::executor::block_on;

    #[test]
    fn runs_to_completion_when_left_alone() {
        let token = CancellationToken::random();
        assert_eq!(block_on(token.run(async { 7 })), Ok(7));
        assert!(token.throw_if_cancelled().is_ok());
    }

    #[test]
    fn already_cancelled_token_rejects_immediately() {
        let token = CancellationToken::new("t1".to_string());
        token.cancel();
        assert_eq!(
            block_on(token.run(async { 7 })),
            Err(TileError::Cancelled("t1".to_string()))
        );
    }

    #[test]
    fn cancel_aborts_a_pending_future() {
        let token = CancellationToken::new("t2".to_string());
        let (_tx, rx) = oneshot::channel::<u32>();
        let clone = token.clone();
        let result = block_on(async {
            let waiting = token.run(rx);
            let cancelling = async move { clone.cancel() };
            let (result, ()) = futures::join!(waiting, cancelling);
            result
        });
        assert_eq!(result, Err(TileError::Cancelled("t2".to_string())));
        assert!(token.is_cancelled());
    }

    #[test]
    fn reused_token_releases_finished_handles() {
        let token = CancellationToken::random();
        for i in 0..10 {
            assert_eq!(block_on(token.run(async move { i })), Ok(i));
        }
        assert!(token.state.handles.lock().is_empty());

        let (_tx, rx) = oneshot::channel::<u32>();
        let clone = token.clone();
        let result = block_on(async {
            let waiting = token.run(rx);
            let cancelling = async move {
                assert_eq!(clone.state.handles.lock().len(), 1);
                clone.cancel()
            };
            let (result, ()) = futures::join!(waiting, cancelling);
            result
        });
        assert!(result.is_err());
        assert!(token.state.handles.lock().is_empty());
    }
}
