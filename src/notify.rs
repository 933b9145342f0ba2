use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::info;
use ulid::Ulid;

use crate::clock::format_local;
use crate::jobs::NotificationKind;
use crate::model::{BusinessId, Client, OrderReceipt};

const CHANNEL_CAPACITY: usize = 256;

/// An outbound message about one order, ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub business_id: BusinessId,
    pub order_id: Ulid,
    pub kind: NotificationKind,
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("order {0} has no client email")]
    NoRecipient(Ulid),
    #[error("delivery failed: {0}")]
    Delivery(String),
}

impl NotifyError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, NotifyError::Delivery(_))
    }
}

/// Outbound delivery seam. Real mail delivery lives outside this crate.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Build the message for `order` addressed to its client.
pub fn compose(
    business_id: BusinessId,
    kind: NotificationKind,
    order: &OrderReceipt,
    client: Option<&Client>,
    utc_offset_minutes: i32,
) -> Result<Notification, NotifyError> {
    let client = client.ok_or(NotifyError::NoRecipient(order.id))?;
    let recipient = client
        .email
        .clone()
        .filter(|e| !e.trim().is_empty())
        .ok_or(NotifyError::NoRecipient(order.id))?;

    let number = order
        .reservation_number
        .or(order.operation_number)
        .map(|n| format!("#{n}"))
        .unwrap_or_default();
    let subject = match kind {
        NotificationKind::ReservationConfirmation => format!("Confirmación de reserva {number}"),
        NotificationKind::ReservationRescheduled => format!("Cambios en su reserva {number}"),
        NotificationKind::ReservationCancelled => format!("Cancelación en su reserva {number}"),
        NotificationKind::OrderCancelled => format!("Orden cancelada {number}"),
    };

    let mut body = format!("Hola {},\n", client.name);
    for (line, slot) in order.reservation_lines() {
        body.push_str(&format!(
            "- {}: {} a {}\n",
            line.name,
            format_local(slot.start_at, utc_offset_minutes),
            format_local(slot.end_at, utc_offset_minutes),
        ));
    }

    Ok(Notification {
        business_id,
        order_id: order.id,
        kind,
        recipient,
        subject: subject.trim_end().to_string(),
        body,
    })
}

/// Logs every notification and fans it out to in-process subscribers.
pub struct NotifyHub {
    sender: broadcast::Sender<Notification>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            sender: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for NotifyHub {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(
            business = %notification.business_id,
            order = %notification.order_id,
            kind = notification.kind.as_str(),
            to = %notification.recipient,
            "{}",
            notification.subject
        );
        // No subscribers is fine.
        let _ = self.sender.send(notification.clone());
        Ok(())
    }
}
