//! Confirmation notification queue.
//!
//! A monitor that reaches `confirmed` enqueues exactly one notification; the
//! chat front-end drains the queue and renders the confirmation message.
//! Single producer per payment, single consumer overall; the drain deletes
//! each file as it reads it.

use std::fs;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{PaymentStore, StoreResult};

/// Kind of confirmation being reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    /// A direct EVM payment settled
    DirectConfirmed,
    /// A bridged payment filled on the settlement chain
    BridgeConfirmed,
}

/// Payload rendered into the user-facing confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Kind of confirmation
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    /// Payment the notification belongs to
    pub payment_id: String,
    /// Business that was paid
    pub business_id: String,
    /// Business display name
    pub business_name: String,
    /// Token symbol
    pub token: String,
    /// Amount in token units
    pub amount: f64,
    /// Settlement chain tag
    pub settlement_chain: String,
    /// Settlement transaction hash on the destination chain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    /// Solana deposit signature (bridge payments)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deposit_tx_sig: Option<String>,
    /// Confirmations at the time of settlement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmations: Option<u64>,
    /// Unix seconds when the payment confirmed
    pub confirmed_at: u64,
    /// Chat channel to deliver to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
}

impl PaymentStore {
    /// Enqueues a confirmation notification for a payment.
    pub fn enqueue_notification(
        &self,
        payment_id: &str,
        notification: &Notification,
    ) -> StoreResult<()> {
        let path = self.notification_path(payment_id);
        self.write_json_atomic(&path, notification)
    }

    /// Drains all pending notifications, deleting each as it is read.
    ///
    /// An unreadable file is skipped (and left in place for inspection)
    /// rather than aborting the drain.
    pub fn drain_notifications(&self) -> StoreResult<Vec<Notification>> {
        let dir = self.notifications_dir();
        let mut drained = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match self.read_json::<Notification>(&path) {
                Ok(notification) => {
                    fs::remove_file(&path)?;
                    drained.push(notification);
                }
                Err(e) => {
                    warn!("Skipping unreadable notification {}: {}", path.display(), e);
                }
            }
        }
        drained.sort_by(|a, b| a.confirmed_at.cmp(&b.confirmed_at));
        Ok(drained)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(payment_id: &str, confirmed_at: u64) -> Notification {
        Notification {
            notification_type: NotificationType::DirectConfirmed,
            payment_id: payment_id.to_string(),
            business_id: "biz_123".to_string(),
            business_name: "Acme Imports".to_string(),
            token: "USDC".to_string(),
            amount: 100.0,
            settlement_chain: "polygon".to_string(),
            tx_hash: Some("0xabc".to_string()),
            deposit_tx_sig: None,
            confirmations: Some(20),
            confirmed_at,
            chat_id: None,
        }
    }

    /// Test that drain returns queued notifications and deletes them
    /// Why: the queue is consume-once; a second drain must see nothing
    #[test]
    fn test_drain_deletes_as_it_reads() {
        let dir = std::env::temp_dir().join(format!("railclaw-notif-{}", std::process::id()));
        let store = PaymentStore::new(&dir).expect("open store");

        store
            .enqueue_notification("pay_a", &sample("pay_a", 10))
            .unwrap();
        store
            .enqueue_notification("pay_b", &sample("pay_b", 5))
            .unwrap();

        let first = store.drain_notifications().expect("first drain");
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].payment_id, "pay_b"); // oldest first

        let second = store.drain_notifications().expect("second drain");
        assert!(second.is_empty());

        let _ = fs::remove_dir_all(&dir);
    }

    /// Test that the wire field is named `type`
    #[test]
    fn test_type_field_name() {
        let json = serde_json::to_string(&sample("pay_a", 1)).unwrap();
        assert!(json.contains("\"type\":\"direct_confirmed\""));
    }
}
