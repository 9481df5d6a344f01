//! Payment Monitors Module
//!
//! Two long-running monitors settle payments: the direct EVM monitor and the
//! bridge pipeline monitor. Each runs as a detached task that outlives the
//! request that created its payment; the registry guarantees at most one
//! live monitor per payment id, which is what makes the record's
//! single-writer convention hold.

pub mod bridge;
pub mod direct_evm;
pub mod generic;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::{error, info, warn};

use crate::config::Config;
use crate::store::{ListFilter, PaymentKind, PaymentStatus, PaymentStore};

pub use bridge::run_bridge_monitor;
pub use direct_evm::run_direct_monitor;

// ============================================================================
// REGISTRY
// ============================================================================

/// Tracks which payments currently have a live monitor.
///
/// `try_acquire` hands out a guard that releases the slot on drop, so a
/// monitor that panics or completes either way frees its payment id.
#[derive(Debug, Clone, Default)]
pub struct MonitorRegistry {
    active: Arc<Mutex<HashSet<String>>>,
}

/// Slot held by a running monitor; released on drop.
#[derive(Debug)]
pub struct MonitorGuard {
    payment_id: String,
    active: Arc<Mutex<HashSet<String>>>,
}

impl Drop for MonitorGuard {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(&self.payment_id);
        }
    }
}

impl MonitorRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the monitor slot for a payment.
    ///
    /// # Returns
    ///
    /// * `Some(MonitorGuard)` - Slot claimed; hold the guard for the
    ///   monitor's lifetime
    /// * `None` - Another monitor already owns this payment
    pub fn try_acquire(&self, payment_id: &str) -> Option<MonitorGuard> {
        let mut active = self.active.lock().ok()?;
        if !active.insert(payment_id.to_string()) {
            return None;
        }
        Some(MonitorGuard {
            payment_id: payment_id.to_string(),
            active: self.active.clone(),
        })
    }

    /// Whether a payment currently has a live monitor.
    pub fn is_active(&self, payment_id: &str) -> bool {
        self.active
            .lock()
            .map(|active| active.contains(payment_id))
            .unwrap_or(false)
    }

    /// Spawns the appropriate monitor for a record as a detached task.
    ///
    /// Returns `false` when the payment already has a live monitor.
    pub fn spawn_for_record(
        &self,
        config: Arc<Config>,
        store: PaymentStore,
        payment_id: &str,
        kind_is_bridge: bool,
        resume_stage3: bool,
    ) -> bool {
        let Some(guard) = self.try_acquire(payment_id) else {
            warn!("Monitor already running for payment {}", payment_id);
            return false;
        };

        let payment_id = payment_id.to_string();
        tokio::spawn(async move {
            let _guard = guard;
            let result = if kind_is_bridge {
                run_bridge_monitor(config, store, payment_id.clone(), resume_stage3).await
            } else {
                run_direct_monitor(config, store, payment_id.clone()).await
            };
            match result {
                Ok(status) => info!("Monitor for {} finished: {:?}", payment_id, status),
                Err(e) => error!("Monitor for {} aborted: {}", payment_id, e),
            }
        });
        true
    }

    /// Rescans the store at startup and resumes interrupted monitors.
    ///
    /// - `pending`/`confirming` direct records restart their watcher (it
    ///   only observes the chain, so restarting repeats nothing).
    /// - `bridging` bridge records resume at the fill watch with a widened
    ///   look-back.
    /// - `waiting_deposit` bridge records restart the deposit watch.
    /// - `deposit_received` records are left alone: the deposit instruction
    ///   may already be on chain and must not be submitted again.
    pub fn resume_interrupted(&self, config: Arc<Config>, store: PaymentStore) {
        let records = match store.list(&ListFilter {
            limit: usize::MAX,
            ..ListFilter::default()
        }) {
            Ok(records) => records,
            Err(e) => {
                error!("Startup record scan failed: {}", e);
                return;
            }
        };

        for record in records {
            if record.status.is_terminal() {
                continue;
            }
            let is_bridge = matches!(record.kind, PaymentKind::Bridge(_));
            match record.status {
                PaymentStatus::Pending | PaymentStatus::Confirming if !is_bridge => {
                    info!("Resuming direct monitor for {}", record.payment_id);
                    self.spawn_for_record(
                        config.clone(),
                        store.clone(),
                        &record.payment_id,
                        false,
                        false,
                    );
                }
                PaymentStatus::WaitingDeposit if is_bridge => {
                    info!("Resuming deposit watch for {}", record.payment_id);
                    self.spawn_for_record(
                        config.clone(),
                        store.clone(),
                        &record.payment_id,
                        true,
                        false,
                    );
                }
                PaymentStatus::Bridging if is_bridge => {
                    info!("Resuming fill watch for {}", record.payment_id);
                    self.spawn_for_record(
                        config.clone(),
                        store.clone(),
                        &record.payment_id,
                        true,
                        true,
                    );
                }
                PaymentStatus::DepositReceived => {
                    warn!(
                        "Payment {} interrupted mid-deposit; not resuming (deposit must not repeat)",
                        record.payment_id
                    );
                }
                _ => {}
            }
        }
    }
}
