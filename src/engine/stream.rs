//! Alert delivery.
//!
//! The engine hands every alert to an [`AlertSink`]. Delivery never blocks the
//! dispatch path: a sink that cannot accept an alert reports `false` and the
//! engine counts the drop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::error::{EngineError, EngineResult};
use crate::output::Alert;

/// Destination for emitted alerts.
pub trait AlertSink: Send {
    /// Accepts one alert. Returns `false` if it was dropped.
    fn deliver(&self, alert: Alert) -> bool;
}

impl<F> AlertSink for F
where
    F: Fn(Alert) -> bool + Send,
{
    fn deliver(&self, alert: Alert) -> bool {
        self(alert)
    }
}

/// Creates a bounded alert channel.
#[must_use]
pub fn alert_channel(capacity: usize) -> (ChannelSink, AlertStream) {
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    (
        ChannelSink {
            tx,
            dropped: Arc::clone(&dropped),
        },
        AlertStream { rx, dropped },
    )
}

/// Sending half of [`alert_channel`].
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: Sender<Alert>,
    dropped: Arc<AtomicU64>,
}

impl AlertSink for ChannelSink {
    fn deliver(&self, alert: Alert) -> bool {
        match self.tx.try_send(alert) {
            Ok(()) => true,
            Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }
}

/// Receiving half of [`alert_channel`].
#[derive(Debug)]
pub struct AlertStream {
    rx: Receiver<Alert>,
    dropped: Arc<AtomicU64>,
}

impl AlertStream {
    /// Receive the next alert (blocking).
    pub fn recv(&self) -> EngineResult<Alert> {
        self.rx.recv().map_err(|_| EngineError::Disconnected {
            path: "alert_stream".to_string(),
        })
    }

    /// Receive the next alert with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> EngineResult<Alert> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => EngineError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            },
            RecvTimeoutError::Disconnected => EngineError::Disconnected {
                path: "alert_stream".to_string(),
            },
        })
    }

    /// Next alert, if one is already queued.
    #[must_use]
    pub fn try_recv(&self) -> Option<Alert> {
        self.rx.try_recv().ok()
    }

    /// Everything currently queued, in emission order.
    #[must_use]
    pub fn drain(&self) -> Vec<Alert> {
        self.rx.try_iter().collect()
    }

    /// Alerts the sink could not queue.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
