//! Wake-up signal for a duplex loop parked on socket reads

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// Lets writers pull a duplex loop out of its read wait
///
/// The loop marks itself parked, re-checks its outbound queue and only then
/// waits. [`DuplexWaker::interrupt`] signals only a parked loop; a running
/// loop will see the queued message on its next pass anyway.
#[derive(Debug, Default)]
pub struct DuplexWaker {
    notify: Notify,
    parked: AtomicBool,
}

impl DuplexWaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake the loop if it is parked; returns whether a signal was sent
    pub fn interrupt(&self) -> bool {
        if self.parked.load(Ordering::SeqCst) {
            // Stores a permit if the loop has not started waiting yet
            self.notify.notify_one();
            true
        } else {
            false
        }
    }

    pub(crate) fn park(&self) {
        self.parked.store(true, Ordering::SeqCst);
    }

    pub(crate) fn unpark(&self) {
        self.parked.store(false, Ordering::SeqCst);
    }

    pub(crate) async fn woken(&self) {
        self.notify.notified().await;
    }
}
