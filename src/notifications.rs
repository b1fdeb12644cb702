//! Fire-and-forget notification dispatch.
//!
//! The engine reports withdrawal lifecycle events here on a best-effort basis: a sink
//! failure is logged and swallowed, never rolled back into the financial state.

use async_trait::async_trait;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum WithdrawalEventKind {
    Initiated,
    Completed,
    Failed,
}

impl WithdrawalEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalEventKind::Initiated => "withdrawal-initiated",
            WithdrawalEventKind::Completed => "withdrawal-completed",
            WithdrawalEventKind::Failed => "withdrawal-failed",
        }
    }
}

/// One withdrawal lifecycle event. Carries only what a notification template needs;
/// in particular, the destination is a masked descriptor, never a raw identifier.
#[derive(Debug, Clone)]
pub struct WithdrawalEvent {
    pub kind: WithdrawalEventKind,
    /// Merchant contact address, when one is configured.
    pub recipient: Option<String>,
    pub amount_in_minor: u64,
    pub fee_in_minor: u64,
    pub reference: Uuid,
    pub destination_descriptor: String,
}

/// External email/alert dispatch.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, event: WithdrawalEvent) -> Result<(), anyhow::Error>;
}

/// Default sink: emits the event to the log stream and nothing else.
#[derive(Debug, Default)]
pub struct TracingSink;

#[async_trait]
impl NotificationSink for TracingSink {
    async fn notify(&self, event: WithdrawalEvent) -> Result<(), anyhow::Error> {
        tracing::info!(
            kind = event.kind.as_str(),
            reference = %event.reference,
            amount_in_minor = event.amount_in_minor,
            fee_in_minor = event.fee_in_minor,
            destination = %event.destination_descriptor,
            "withdrawal notification"
        );
        Ok(())
    }
}
