//! Password-confirmation broker.
//!
//! When the API answers 423, the HTTP layer files a request here and
//! suspends. Whatever drives the UI receives a [`PendingConfirmation`] on
//! the prompt stream, walks the user through `POST /api/auth/confirm-password`,
//! and resolves the correlation id with the outcome. Each id resolves at
//! most once; an unknown or already-resolved id is a no-op.

use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};
use tokio::sync::{mpsc, oneshot};
use ulid::Ulid;

/// How a filed confirmation request ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    Confirmed,
    Cancelled,
}

/// A prompt the UI owes the user an answer for.
#[derive(Debug)]
pub struct PendingConfirmation {
    /// Correlation id to pass back to [`ConfirmationBroker::resolve`].
    pub id: String,
}

pub struct ConfirmationBroker {
    pending: Mutex<HashMap<String, oneshot::Sender<ConfirmationOutcome>>>,
    prompts: mpsc::UnboundedSender<PendingConfirmation>,
}

impl ConfirmationBroker {
    /// Create a broker and the stream of prompts the UI drains.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PendingConfirmation>) {
        let (prompts, receiver) = mpsc::unbounded_channel();
        (
            Self {
                pending: Mutex::new(HashMap::new()),
                prompts,
            },
            receiver,
        )
    }

    /// File a confirmation request and suspend until it resolves.
    ///
    /// With no UI draining the prompt stream, or a resolver dropped without
    /// answering, the request counts as cancelled.
    pub async fn request(&self) -> ConfirmationOutcome {
        let id = Ulid::new().to_string();
        let (tx, rx) = oneshot::channel();

        self.lock_pending().insert(id.clone(), tx);

        if self.prompts.send(PendingConfirmation { id: id.clone() }).is_err() {
            self.lock_pending().remove(&id);
            return ConfirmationOutcome::Cancelled;
        }

        rx.await.unwrap_or(ConfirmationOutcome::Cancelled)
    }

    /// Resolve a pending prompt. Returns false for an unknown or
    /// already-resolved id.
    pub fn resolve(&self, id: &str, outcome: ConfirmationOutcome) -> bool {
        match self.lock_pending().remove(id) {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }

    /// Number of prompts still awaiting an answer.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.lock_pending().len()
    }

    fn lock_pending(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<String, oneshot::Sender<ConfirmationOutcome>>> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[tokio::test]
    async fn request_resolves_with_confirmation() -> Result<()> {
        let (broker, mut prompts) = ConfirmationBroker::new();
        let broker = std::sync::Arc::new(broker);

        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.request().await })
        };

        let prompt = prompts.recv().await.expect("prompt should arrive");
        assert_eq!(broker.pending_count(), 1);
        assert!(broker.resolve(&prompt.id, ConfirmationOutcome::Confirmed));

        assert_eq!(waiter.await?, ConfirmationOutcome::Confirmed);
        assert_eq!(broker.pending_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn cancellation_propagates() -> Result<()> {
        let (broker, mut prompts) = ConfirmationBroker::new();
        let broker = std::sync::Arc::new(broker);

        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.request().await })
        };

        let prompt = prompts.recv().await.expect("prompt should arrive");
        assert!(broker.resolve(&prompt.id, ConfirmationOutcome::Cancelled));

        assert_eq!(waiter.await?, ConfirmationOutcome::Cancelled);
        Ok(())
    }

    #[tokio::test]
    async fn request_without_ui_is_cancelled() {
        let (broker, prompts) = ConfirmationBroker::new();
        drop(prompts);

        assert_eq!(broker.request().await, ConfirmationOutcome::Cancelled);
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test]
    async fn resolve_is_once_only() -> Result<()> {
        let (broker, mut prompts) = ConfirmationBroker::new();
        let broker = std::sync::Arc::new(broker);

        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.request().await })
        };

        let prompt = prompts.recv().await.expect("prompt should arrive");
        assert!(broker.resolve(&prompt.id, ConfirmationOutcome::Confirmed));
        assert!(!broker.resolve(&prompt.id, ConfirmationOutcome::Cancelled));
        assert!(!broker.resolve("not-an-id", ConfirmationOutcome::Confirmed));

        assert_eq!(waiter.await?, ConfirmationOutcome::Confirmed);
        Ok(())
    }
}
