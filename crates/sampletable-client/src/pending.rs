//! Handles for in-flight key retrievals
//!
//! A [`PendingRetrieval`] wraps the metadata half of a split retrieval: the
//! table service's filtered read returning stored cells. The caller decides
//! when to block on it, can poll it with a zero or finite timeout, and can
//! wait on several at once with [`PendingRetrieval::wait_many`].

use futures::FutureExt;
use futures::future::select_all;
use sampletable_common::{Cell, Error, Result, SampleBatch};
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;

type Outcome = Result<SampleBatch<Cell>>;

enum State {
    Running(JoinHandle<Outcome>),
    Done(Outcome),
    Taken,
}

pub struct PendingRetrieval {
    state: State,
}

fn settle_join(joined: std::result::Result<Outcome, JoinError>) -> Outcome {
    joined.unwrap_or_else(|e| Err(Error::internal(format!("retrieval task failed: {e}"))))
}

impl PendingRetrieval {
    /// Track a spawned retrieval
    #[must_use]
    pub const fn new(handle: JoinHandle<Outcome>) -> Self {
        Self {
            state: State::Running(handle),
        }
    }

    /// An already-resolved retrieval
    #[must_use]
    pub const fn ready(outcome: Outcome) -> Self {
        Self {
            state: State::Done(outcome),
        }
    }

    /// True once the result is available without blocking
    #[must_use]
    pub fn is_ready(&self) -> bool {
        match &self.state {
            State::Running(handle) => handle.is_finished(),
            State::Done(_) => true,
            State::Taken => false,
        }
    }

    /// Wait up to `timeout` for the result; `Duration::ZERO` checks without waiting
    pub async fn poll_ready(&mut self, timeout: Duration) -> bool {
        match &mut self.state {
            State::Running(handle) => match tokio::time::timeout(timeout, handle).await {
                Ok(joined) => {
                    self.state = State::Done(settle_join(joined));
                    true
                }
                Err(_) => false,
            },
            State::Done(_) => true,
            State::Taken => false,
        }
    }

    /// Take the result if it is available
    pub fn try_take(&mut self) -> Option<Outcome> {
        if let State::Running(handle) = &mut self.state {
            let joined = handle.now_or_never()?;
            self.state = State::Done(settle_join(joined));
        }
        match std::mem::replace(&mut self.state, State::Taken) {
            State::Done(outcome) => Some(outcome),
            other => {
                self.state = other;
                None
            }
        }
    }

    /// Block until the result is available
    pub async fn wait(self) -> Outcome {
        match self.state {
            State::Running(handle) => settle_join(handle.await),
            State::Done(outcome) => outcome,
            State::Taken => Err(Error::internal("retrieval result already taken")),
        }
    }

    const fn is_running(&self) -> bool {
        matches!(self.state, State::Running(_))
    }

    async fn settle(&mut self) {
        if let State::Running(handle) = &mut self.state {
            let joined = handle.await;
            self.state = State::Done(settle_join(joined));
        }
    }

    /// Wait until at least `num_ready` handles have resolved or `timeout`
    /// elapses (`None` waits indefinitely).
    ///
    /// Returns `(ready, pending)`; ready handles are listed in the order they
    /// were observed to finish. Handles whose result was already taken stay
    /// in `pending`.
    pub async fn wait_many(
        handles: Vec<Self>,
        num_ready: usize,
        timeout: Option<Duration>,
    ) -> (Vec<Self>, Vec<Self>) {
        let deadline = timeout.map(|t| Instant::now() + t);
        let target = num_ready.min(handles.len());
        let mut ready = Vec::with_capacity(handles.len());
        let mut pending = handles;
        loop {
            let (now_ready, still_pending): (Vec<_>, Vec<_>) =
                pending.into_iter().partition(Self::is_ready);
            ready.extend(now_ready);
            pending = still_pending;
            if ready.len() >= target || !pending.iter().any(Self::is_running) {
                break;
            }

            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            if remaining == Some(Duration::ZERO) {
                break;
            }
            let any = select_all(
                pending
                    .iter_mut()
                    .filter(|h| h.is_running())
                    .map(|h| Box::pin(h.settle())),
            );
            match remaining {
                Some(remaining) => {
                    if tokio::time::timeout(remaining, any).await.is_err() {
                        break;
                    }
                }
                None => {
                    any.await;
                }
            }
        }
        (ready, pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delayed(ms: u64, rows: usize) -> PendingRetrieval {
        PendingRetrieval::new(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            let mut batch = SampleBatch::empty(&[]);
            batch.sample_ids = (0..rows).map(|i| format!("s{i}_0_0")).collect();
            Ok(batch)
        }))
    }

    #[tokio::test]
    async fn test_poll_then_wait() {
        let mut pending = delayed(50, 2);
        assert!(!pending.poll_ready(Duration::ZERO).await);
        assert!(pending.try_take().is_none());
        assert!(pending.poll_ready(Duration::from_secs(5)).await);
        assert!(pending.is_ready());
        assert_eq!(pending.wait().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_try_take_once() {
        let mut pending = PendingRetrieval::ready(Ok(SampleBatch::empty(&[])));
        assert!(pending.try_take().is_some());
        assert!(pending.try_take().is_none());
        assert!(!pending.is_ready());
        assert!(pending.wait().await.is_err());
    }

    #[tokio::test]
    async fn test_wait_many_splits_ready_and_pending() {
        let handles = vec![delayed(5_000, 1), delayed(1, 2), delayed(5_000, 3)];
        let (ready, pending) =
            PendingRetrieval::wait_many(handles, 1, Some(Duration::from_secs(2))).await;
        assert_eq!(ready.len(), 1);
        assert_eq!(pending.len(), 2);
        let batch = ready.into_iter().next().unwrap().wait().await.unwrap();
        assert_eq!(batch.len(), 2);
    }

    #[tokio::test]
    async fn test_wait_many_times_out() {
        let handles = vec![delayed(5_000, 1)];
        let (ready, pending) =
            PendingRetrieval::wait_many(handles, 1, Some(Duration::from_millis(20))).await;
        assert!(ready.is_empty());
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn test_wait_many_with_taken_handle() {
        let mut taken = PendingRetrieval::ready(Ok(SampleBatch::empty(&[])));
        assert!(taken.try_take().is_some());
        let handles = vec![taken, delayed(10, 2)];
        let (ready, pending) = tokio::time::timeout(
            Duration::from_secs(5),
            PendingRetrieval::wait_many(handles, 1, None),
        )
        .await
        .unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(pending.len(), 1);
        assert!(!pending[0].is_ready());
        assert_eq!(ready.into_iter().next().unwrap().wait().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_wait_many_all() {
        let handles = vec![delayed(10, 1), delayed(20, 1), delayed(1, 1)];
        let (ready, pending) = PendingRetrieval::wait_many(handles, 3, None).await;
        assert_eq!(ready.len(), 3);
        assert!(pending.is_empty());
    }
}
