//! Best-effort user notifications
//!
//! Financial operations push events into a bounded queue and move on. A
//! background dispatcher drains the queue into a [`Notifier`].
//!
//! ```text
//!   DepositDesk ──try_send──▶ mpsc (bounded) ──▶ NotificationDispatcher ──▶ Notifier
//!                  │
//!                  └── full / closed: logged and dropped
//! ```
//!
//! Delivery errors are logged and never reach the operation that produced
//! the event.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledger_core::UserId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Kind of event being announced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Deposit received and awaiting confirmation
    DepositSubmitted,
    /// Deposit confirmed, mining started
    DepositConfirmed,
    /// Attested amount did not match
    ConfirmationFailed,
    /// Bonus credited to a referrer
    ReferralBonus,
    /// Principal plus profit paid out
    WithdrawalCompleted,
}

impl NotificationKind {
    /// Subject line
    pub fn subject(&self) -> &'static str {
        match self {
            NotificationKind::DepositSubmitted => "Your Deposit is Being Processed",
            NotificationKind::DepositConfirmed => "Your Deposit is Confirmed",
            NotificationKind::ConfirmationFailed => "Deposit Confirmation Failed",
            NotificationKind::ReferralBonus => "Referral Bonus Received",
            NotificationKind::WithdrawalCompleted => "Withdrawal Successful",
        }
    }
}

/// Who receives a notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    /// Account
    pub user_id: UserId,
    /// Delivery address
    pub email: String,
    /// Salutation
    pub name: String,
}

impl From<&ledger_core::User> for Recipient {
    fn from(user: &ledger_core::User) -> Self {
        Self {
            user_id: user.user_id,
            email: user.email.clone(),
            name: user.display_name().to_string(),
        }
    }
}

/// One event for one recipient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Notification ID
    pub id: Uuid,
    /// Event kind
    pub kind: NotificationKind,
    /// Recipient
    pub recipient: Recipient,
    /// Event details
    pub payload: BTreeMap<String, String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Create a notification with an empty payload
    pub fn new(kind: NotificationKind, recipient: impl Into<Recipient>) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind,
            recipient: recipient.into(),
            payload: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Add a payload entry
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.payload.insert(key.into(), value.to_string());
        self
    }

    /// Add an amount formatted to cents
    pub fn with_amount(self, key: impl Into<String>, amount: Decimal) -> Self {
        self.with(key, format!("{:.2}", amount))
    }
}

/// Delivery failure
#[derive(Debug, Error)]
pub enum NotifyError {
    /// Transport rejected the message
    #[error("Delivery failed: {0}")]
    Delivery(String),

    /// Downstream consumer went away
    #[error("Notification channel closed")]
    Closed,
}

/// Delivers notifications to users
#[async_trait]
pub trait Notifier: Send + Sync + std::fmt::Debug {
    /// Deliver one notification
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes notifications to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(&notification.payload)
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;
        tracing::info!(
            kind = ?notification.kind,
            to = %notification.recipient.email,
            subject = notification.kind.subject(),
            %payload,
            "Notification"
        );
        Ok(())
    }
}

/// Forwards notifications to an in-process channel
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    /// Notifier plus the receiving end
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sender
            .send(notification.clone())
            .map_err(|_| NotifyError::Closed)
    }
}

/// Producer side of the notification queue
#[derive(Debug, Clone)]
pub struct NotificationHandle {
    sender: mpsc::Sender<Notification>,
}

impl NotificationHandle {
    /// Enqueue without waiting. Returns false when the event was dropped.
    pub fn notify(&self, notification: Notification) -> bool {
        match self.sender.try_send(notification) {
            Ok(()) => true,
            Err(TrySendError::Full(dropped)) => {
                tracing::warn!(
                    kind = ?dropped.kind,
                    user_id = %dropped.recipient.user_id,
                    "Notification queue full, dropping"
                );
                false
            }
            Err(TrySendError::Closed(dropped)) => {
                tracing::warn!(
                    kind = ?dropped.kind,
                    user_id = %dropped.recipient.user_id,
                    "Notification dispatcher stopped, dropping"
                );
                false
            }
        }
    }
}

/// Consumer side of the notification queue
#[derive(Debug)]
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
    mailbox: mpsc::Receiver<Notification>,
}

impl NotificationDispatcher {
    /// Deliver until every handle is dropped
    pub async fn run(mut self) {
        while let Some(notification) = self.mailbox.recv().await {
            if let Err(e) = self.notifier.notify(&notification).await {
                tracing::warn!(
                    kind = ?notification.kind,
                    user_id = %notification.recipient.user_id,
                    error = %e,
                    "Notification delivery failed"
                );
            }
        }
        tracing::debug!("Notification dispatcher stopped");
    }
}

/// Create a queue of `capacity` feeding `notifier`
pub fn notification_queue(
    notifier: Arc<dyn Notifier>,
    capacity: usize,
) -> (NotificationHandle, NotificationDispatcher) {
    let (sender, mailbox) = mpsc::channel(capacity.max(1));
    (
        NotificationHandle { sender },
        NotificationDispatcher { notifier, mailbox },
    )
}

/// Create a queue and run its dispatcher on the current runtime
pub fn spawn_dispatcher(
    notifier: Arc<dyn Notifier>,
    capacity: usize,
) -> (NotificationHandle, JoinHandle<()>) {
    let (handle, dispatcher) = notification_queue(notifier, capacity);
    (handle, tokio::spawn(dispatcher.run()))
}
