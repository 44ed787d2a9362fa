//! One-shot timers that post an event to the control task.

use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

/// A scheduled event. Dropping the timer cancels it.
///
/// Cancelling cannot recall an event that was already posted, so events
/// carry the window or tick they were armed for and handlers ignore stale
/// ones.
#[derive(Debug)]
pub struct Timer {
    handle: JoinHandle<()>,
}

impl Timer {
    /// Post `event` on `events` after `delay`.
    pub fn after<E>(delay: Duration, events: &UnboundedSender<E>, event: E) -> Self
    where
        E: Send + 'static,
    {
        let events = events.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // receiver gone means the controller shut down
            let _ = events.send(event);
        });
        Self { handle }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
