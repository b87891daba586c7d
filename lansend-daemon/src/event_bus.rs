//! Thread-safe operation/notification queues between the host pipe and
//! the async core.
//!
//! Two operations are latches rather than queue entries: the pending
//! `ConfirmReceive` answer and the `CancelReceive` flag. Posting either
//! replaces the previous value; polling consumes it. Everything else is
//! strict FIFO.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tracing::warn;

use lansend_protocol::{ConfirmReceive, Notification, Operation};

#[derive(Default)]
struct BusState {
    operations: VecDeque<Operation>,
    notifications: VecDeque<Notification>,
    confirm_receive: Option<ConfirmReceive>,
    cancel_receive: Option<u64>,
}

/// MPMC event queue. Every public method takes the internal mutex for
/// the duration of one read or write; no method blocks, and the lock is
/// never held across an await point.
#[derive(Default)]
pub struct EventBus {
    state: Mutex<BusState>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post_operation(&self, operation: Operation) {
        let mut state = self.state.lock().unwrap();
        match operation {
            Operation::ConfirmReceive(confirm) => {
                if state.confirm_receive.is_some() {
                    warn!("replacing pending ConfirmReceive answer");
                }
                state.confirm_receive = Some(confirm);
            }
            Operation::CancelReceive { transfer_id } => {
                state.cancel_receive = Some(transfer_id);
            }
            other => state.operations.push_back(other),
        }
    }

    pub fn post_notification(&self, notification: Notification) {
        self.state
            .lock()
            .unwrap()
            .notifications
            .push_back(notification);
    }

    pub fn poll_operation(&self) -> Option<Operation> {
        self.state.lock().unwrap().operations.pop_front()
    }

    pub fn poll_notification(&self) -> Option<Notification> {
        self.state.lock().unwrap().notifications.pop_front()
    }

    pub fn poll_confirm_receive(&self) -> Option<ConfirmReceive> {
        self.state.lock().unwrap().confirm_receive.take()
    }

    pub fn poll_cancel_receive(&self) -> Option<u64> {
        self.state.lock().unwrap().cancel_receive.take()
    }

    /// Wait for the host to answer a receive request, polling the latch
    /// at the host's own 100 ms cadence. Returns None on timeout, which
    /// callers treat as a rejection.
    pub async fn await_confirm_receive(&self, timeout: Duration) -> Option<ConfirmReceive> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(confirm) = self.poll_confirm_receive() {
                return Some(confirm);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}
