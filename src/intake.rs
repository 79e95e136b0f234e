//! Change-notification intake: token check and redelivery deduplication in
//! front of the sync engine.
//!
//! The file store redelivers notifications on timeout, so every delivery
//! carries an id and duplicates are acknowledged without re-processing.
//! A bad or missing token is rejected before anything else is looked at.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::VaultError;
use crate::sync::{SyncEngine, SyncOutcome};
use crate::types::ChangeNotification;

/// Delivery ids remembered for deduplication. The sender's redelivery
/// horizon is far shorter than this, so evicting the oldest ids is safe.
const MAX_TRACKED_DELIVERIES: usize = 4096;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IntakeOutcome {
    /// The notification was handed to the sync engine.
    Processed(SyncOutcome),
    /// A delivery with this id was already accepted.
    Duplicate,
}

/// Bounded insertion-ordered set of recently seen delivery ids.
struct DeliveryWindow {
    seen: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl DeliveryWindow {
    fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    /// Returns `false` if the id was already present.
    fn insert(&mut self, delivery_id: &str) -> bool {
        if !self.seen.insert(delivery_id.to_string()) {
            return false;
        }
        self.order.push_back(delivery_id.to_string());
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        true
    }

    fn remove(&mut self, delivery_id: &str) {
        if self.seen.remove(delivery_id) {
            self.order.retain(|id| id != delivery_id);
        }
    }
}

pub struct ChangeIntake {
    engine: Arc<SyncEngine>,
    secret: Option<String>,
    window: Mutex<DeliveryWindow>,
}

impl ChangeIntake {
    pub fn new(engine: Arc<SyncEngine>, secret: Option<String>) -> Self {
        Self {
            engine,
            secret,
            window: Mutex::new(DeliveryWindow::new(MAX_TRACKED_DELIVERIES)),
        }
    }

    pub fn with_dedup_capacity(mut self, capacity: usize) -> Self {
        self.window = Mutex::new(DeliveryWindow::new(capacity));
        self
    }

    /// Accepts one delivery. Rejected tokens are errors; duplicates are
    /// acknowledged successes so the sender stops redelivering. A delivery
    /// whose processing errors is forgotten again, so the sender's retry
    /// gets a fresh attempt instead of a duplicate acknowledgement.
    pub async fn deliver(
        &self,
        notification: &ChangeNotification,
    ) -> Result<IntakeOutcome, VaultError> {
        if let Some(secret) = &self.secret {
            if notification.token.as_deref() != Some(secret.as_str()) {
                warn!(
                    delivery_id = %notification.delivery_id,
                    "notification rejected, token mismatch"
                );
                return Err(VaultError::Intake(
                    "notification token mismatch".to_string(),
                ));
            }
        }

        if !self.window.lock().insert(&notification.delivery_id) {
            debug!(delivery_id = %notification.delivery_id, "duplicate delivery ignored");
            return Ok(IntakeOutcome::Duplicate);
        }

        match self.engine.handle_notification(notification).await {
            Ok(outcome) => Ok(IntakeOutcome::Processed(outcome)),
            Err(err) => {
                self.window.lock().remove(&notification.delivery_id);
                Err(err)
            }
        }
    }
}
