use crate::types::{MarkStatus, TransactionType};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// One token per transaction reaching a terminal state, whatever its type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionToken {
    pub tx_type: TransactionType,
    pub status: MarkStatus,
}

/// How the emission loop waits for completion tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacingMode {
    /// Park the control task on the channel until a token or the deadline.
    #[default]
    Blocking,
    /// Spin on `try_recv`, yielding between attempts. Burns a core for
    /// tighter reaction to completions.
    BusyPoll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Completed,
    DeadlineReached,
    /// Every sender is gone; no token can ever arrive.
    Closed,
}

/// Build a fresh channel for one run.
pub fn completion_channel() -> (CompletionSender, CompletionReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (CompletionSender { tx }, CompletionReceiver { rx })
}

#[derive(Clone, Debug)]
pub struct CompletionSender {
    tx: mpsc::UnboundedSender<CompletionToken>,
}

impl CompletionSender {
    /// Push a token. Tokens sent after the run's receiver is gone are dropped.
    pub fn signal(&self, tx_type: TransactionType, status: MarkStatus) {
        let _ = self.tx.send(CompletionToken { tx_type, status });
    }
}

#[derive(Debug)]
pub struct CompletionReceiver {
    rx: mpsc::UnboundedReceiver<CompletionToken>,
}

impl CompletionReceiver {
    /// Consume one token, waiting no later than `deadline`.
    pub async fn wait_until(&mut self, deadline: Instant, mode: PacingMode) -> WaitOutcome {
        match mode {
            PacingMode::Blocking => match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                Ok(Some(_)) => WaitOutcome::Completed,
                Ok(None) => WaitOutcome::Closed,
                Err(_) => WaitOutcome::DeadlineReached,
            },
            PacingMode::BusyPoll => loop {
                match self.rx.try_recv() {
                    Ok(_) => return WaitOutcome::Completed,
                    Err(mpsc::error::TryRecvError::Disconnected) => return WaitOutcome::Closed,
                    Err(mpsc::error::TryRecvError::Empty) => {
                        if Instant::now() >= deadline {
                            return WaitOutcome::DeadlineReached;
                        }
                        tokio::task::yield_now().await;
                    }
                }
            },
        }
    }

    /// Take every token currently queued without waiting.
    pub fn drain(&mut self) -> Vec<CompletionToken> {
        let mut tokens = Vec::new();
        while let Ok(token) = self.rx.try_recv() {
            tokens.push(token);
        }
        tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn blocking_wait_returns_token() {
        let (tx, mut rx) = completion_channel();
        tx.signal(TransactionType::PriceUpdate, MarkStatus::Success);
        let outcome = rx
            .wait_until(Instant::now() + Duration::from_secs(1), PacingMode::Blocking)
            .await;
        assert_eq!(outcome, WaitOutcome::Completed);
    }

    #[tokio::test]
    async fn wait_is_time_bounded() {
        for mode in [PacingMode::Blocking, PacingMode::BusyPoll] {
            let (_tx, mut rx) = completion_channel();
            let start = Instant::now();
            let outcome = rx
                .wait_until(start + Duration::from_millis(50), mode)
                .await;
            assert_eq!(outcome, WaitOutcome::DeadlineReached);
            let waited = start.elapsed();
            assert!(waited >= Duration::from_millis(50));
            assert!(waited < Duration::from_millis(500), "{mode:?} waited {waited:?}");
        }
    }

    #[tokio::test]
    async fn busy_poll_sees_late_token() {
        let (tx, mut rx) = completion_channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            tx.signal(TransactionType::CustomerSession, MarkStatus::Abort);
        });
        let outcome = rx
            .wait_until(Instant::now() + Duration::from_secs(1), PacingMode::BusyPoll)
            .await;
        assert_eq!(outcome, WaitOutcome::Completed);
    }

    #[tokio::test]
    async fn closed_when_senders_dropped() {
        let (tx, mut rx) = completion_channel();
        drop(tx);
        let outcome = rx
            .wait_until(Instant::now() + Duration::from_secs(1), PacingMode::Blocking)
            .await;
        assert_eq!(outcome, WaitOutcome::Closed);
    }

    #[test]
    fn drain_collects_queued_tokens() {
        let (tx, mut rx) = completion_channel();
        tx.signal(TransactionType::UpdateDelivery, MarkStatus::Success);
        tx.signal(TransactionType::QueryDashboard, MarkStatus::Success);
        let tokens = rx.drain();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].tx_type, TransactionType::UpdateDelivery);
        assert!(rx.drain().is_empty());
    }
}
