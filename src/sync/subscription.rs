//! Delivery of store change notifications to registered callbacks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use super::{Delivery, SharedCache};
use crate::models::{owner_of, StoreEvent, Vehicle, VEHICLES_COLLECTION};

/// Handle to an active change subscription.
///
/// Once [`Subscription::cancel`] returns, no further callback starts for this handle.
/// Dropping the handle cancels it.
pub struct Subscription {
    cancelled: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub(crate) fn spawn<C, R>(
        mut events: broadcast::Receiver<StoreEvent>,
        cache: SharedCache,
        on_changed: C,
        on_removed: R,
    ) -> Self
    where
        C: Fn(Vehicle) + Send + Sync + 'static,
        R: Fn(Vehicle) + Send + Sync + 'static,
    {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();

        let task = tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Vehicle subscriber lagged, {} events skipped", skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };

                if event.collection() != VEHICLES_COLLECTION {
                    continue;
                }

                let vehicle = match Vehicle::from_document(event.id(), event.fields()) {
                    Ok(vehicle) => vehicle,
                    Err(e) => {
                        tracing::warn!("Ignoring malformed vehicle {}: {}", event.id(), e);
                        continue;
                    }
                };

                let removed = matches!(event, StoreEvent::Removed { .. });
                let previous_owner = event.previous().and_then(owner_of);
                let delivery = cache
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .apply(&vehicle, previous_owner, removed);

                if flag.load(Ordering::Acquire) {
                    break;
                }
                match delivery {
                    Delivery::Changed => on_changed(vehicle),
                    Delivery::Removed => on_removed(vehicle),
                    Delivery::Skip => {}
                }
            }
        });

        Self {
            cancelled,
            task: Some(task),
        }
    }

    /// Stop delivering notifications.
    pub fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}
