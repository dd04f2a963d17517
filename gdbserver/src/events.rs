/// Stop notifications from the emulation core
///
/// The core reports that a thread halted (breakpoint hit or finished step) through a
/// [`StopNotifier`]. The debug session waits on the same handle while the target runs.

use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct PauseState {
    paused: bool,
    paused_by: Option<u64>,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<PauseState>,
    notify: Notify,
}

/// Cloneable handle shared between the server and the emulation core
#[derive(Debug, Clone, Default)]
pub struct StopNotifier {
    inner: Arc<Shared>,
}

impl StopNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, PauseState> {
        // the state is two plain fields, a poisoned lock still holds usable data
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Called by the core when `thread_id` halts. Ignored while already paused.
    pub fn pause_from(&self, thread_id: u64) {
        {
            let mut state = self.state();
            if state.paused {
                return;
            }
            state.paused = true;
            state.paused_by = Some(thread_id);
        }
        log::debug!("Execution paused by thread {:x}", thread_id);
        self.inner.notify.notify_one();
    }

    /// Pause requested by the client rather than by a halting thread
    pub fn interrupt(&self) {
        {
            let mut state = self.state();
            if state.paused {
                return;
            }
            state.paused = true;
            state.paused_by = None;
        }
        self.inner.notify.notify_one();
    }

    /// Forget the last stop before the target is resumed
    pub fn clear(&self) {
        let mut state = self.state();
        state.paused = false;
        state.paused_by = None;
    }

    pub fn is_paused(&self) -> bool {
        self.state().paused
    }

    /// Thread whose stop paused the session, `None` after an interrupt
    pub fn paused_by(&self) -> Option<u64> {
        self.state().paused_by
    }

    /// Resolves after the next `pause_from`/`interrupt` (or immediately if one is pending)
    pub async fn notified(&self) {
        self.inner.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_first_pause_wins() {
        let stop = StopNotifier::new();
        assert!(!stop.is_paused());

        stop.pause_from(0x100);
        stop.pause_from(0x200);
        assert!(stop.is_paused());
        assert_eq!(stop.paused_by(), Some(0x100));

        stop.clear();
        assert!(!stop.is_paused());
        assert_eq!(stop.paused_by(), None);

        stop.pause_from(0x200);
        assert_eq!(stop.paused_by(), Some(0x200));
    }

    #[test]
    fn test_interrupt_has_no_thread() {
        let stop = StopNotifier::new();
        stop.interrupt();
        assert!(stop.is_paused());
        assert_eq!(stop.paused_by(), None);

        // a thread halting afterwards does not override the interrupt
        stop.pause_from(1);
        assert_eq!(stop.paused_by(), None);
    }

    #[tokio::test]
    async fn test_notified_wakes_waiter() {
        let stop = StopNotifier::new();
        let core = stop.clone();

        let waiter = tokio::spawn(async move {
            stop.notified().await;
            stop.paused_by()
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        core.pause_from(7);

        let paused_by = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("waiter not woken")
            .unwrap();
        assert_eq!(paused_by, Some(7));
    }

    #[tokio::test]
    async fn test_pause_before_wait_is_not_lost() {
        let stop = StopNotifier::new();
        stop.pause_from(3);
        tokio::time::timeout(Duration::from_secs(5), stop.notified())
            .await
            .expect("stored permit not delivered");
    }
}
