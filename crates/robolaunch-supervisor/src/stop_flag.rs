//! Cooperative stop signal shared with background tasks

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// One-way "stop requested" flag.
///
/// Cloned into each background task at spawn time. Once raised it never
/// resets. Tasks either poll [`is_raised`](Self::is_raised) between reads or
/// await [`raised`](Self::raised) alongside their own work.
#[derive(Debug, Clone, Default)]
pub struct StopFlag {
    inner: Arc<StopInner>,
}

#[derive(Debug, Default)]
struct StopInner {
    raised: AtomicBool,
    notify: Notify,
}

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag. Returns `true` only for the call that raised it.
    pub fn raise(&self) -> bool {
        let was_raised = self.inner.raised.swap(true, Ordering::AcqRel);
        if !was_raised {
            self.inner.notify.notify_waiters();
        }
        !was_raised
    }

    pub fn is_raised(&self) -> bool {
        self.inner.raised.load(Ordering::Acquire)
    }

    /// Resolve once the flag is raised.
    pub async fn raised(&self) {
        // Create the `notified()` future BEFORE the check so a raise between
        // the check and the await cannot be missed.
        let notified = self.inner.notify.notified();
        if self.is_raised() {
            return;
        }
        notified.await;
    }
}
