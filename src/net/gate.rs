//! Single-entry, non-blocking processing gate.
//!
//! # Design Decisions
//! - A compare-and-swap over three states (idle, busy, busy-with-pending)
//!   instead of a mutex, so the socket reader never blocks on the send path
//! - A caller that finds the gate busy does not wait and does not queue; it
//!   leaves a pending mark and the pass already running loops once more

use std::sync::atomic::{AtomicU8, Ordering};

const IDLE: u8 = 0;
const BUSY: u8 = 1;
const PENDING: u8 = 2;

#[derive(Debug, Default)]
pub struct ProcessGate {
    state: AtomicU8,
}

impl ProcessGate {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(IDLE),
        }
    }

    /// Claim the gate. On `false` another pass is running and has been told
    /// to run again before leaving.
    pub fn try_enter(&self) -> bool {
        loop {
            match self
                .state
                .compare_exchange(IDLE, BUSY, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return true,
                Err(PENDING) => return false,
                Err(_) => {
                    if self
                        .state
                        .compare_exchange(BUSY, PENDING, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return false;
                    }
                    // The holder left in between; try to claim again.
                }
            }
        }
    }

    /// Release the gate. Returns `true` when a notification arrived during the
    /// pass, in which case the caller still holds the gate and must run again.
    pub fn leave(&self) -> bool {
        match self
            .state
            .compare_exchange(BUSY, IDLE, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => false,
            Err(_) => {
                self.state.store(BUSY, Ordering::Release);
                true
            }
        }
    }

    /// Run `pass` under the gate until no notification is pending.
    ///
    /// Returns `false` without running anything if the gate was held.
    pub fn run(&self, mut pass: impl FnMut()) -> bool {
        if !self.try_enter() {
            return false;
        }
        loop {
            pass();
            if !self.leave() {
                return true;
            }
        }
    }

    pub fn is_busy(&self) -> bool {
        self.state.load(Ordering::Acquire) != IDLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_enter_and_leave() {
        let gate = ProcessGate::new();
        assert!(gate.try_enter());
        assert!(gate.is_busy());
        assert!(!gate.leave());
        assert!(!gate.is_busy());
    }

    #[test]
    fn test_skipped_notification_reruns_pass() {
        let gate = ProcessGate::new();
        assert!(gate.try_enter());
        assert!(!gate.try_enter());
        assert!(!gate.try_enter());
        // Two skipped calls collapse into a single extra pass.
        assert!(gate.leave());
        assert!(!gate.leave());
    }

    #[test]
    fn test_reentrant_call_is_noop() {
        let gate = ProcessGate::new();
        let passes = AtomicUsize::new(0);
        let ran = gate.run(|| {
            let n = passes.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                assert!(!gate.run(|| panic!("nested pass must not run")));
            }
        });
        assert!(ran);
        assert_eq!(passes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_concurrent_notifications_not_lost() {
        let gate = Arc::new(ProcessGate::new());
        let produced = Arc::new(AtomicUsize::new(0));
        let consumed = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = gate.clone();
                let produced = produced.clone();
                let consumed = consumed.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        produced.fetch_add(1, Ordering::SeqCst);
                        gate.run(|| {
                            let seen = produced.load(Ordering::SeqCst);
                            consumed.fetch_max(seen, Ordering::SeqCst);
                        });
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(consumed.load(Ordering::SeqCst), produced.load(Ordering::SeqCst));
    }
}
