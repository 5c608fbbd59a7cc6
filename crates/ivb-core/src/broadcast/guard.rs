use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Process-wide "broadcast in progress" flag.
///
/// At most one [`BroadcastPermit`] exists at a time. The flag is cleared when
/// the permit is dropped, so an early return or a panic inside a job still
/// frees it.
#[derive(Clone, Debug, Default)]
pub struct BroadcastGuard {
    busy: Arc<AtomicBool>,
}

impl BroadcastGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the guard, or `None` if a broadcast is already running.
    pub fn try_acquire(&self) -> Option<BroadcastPermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BroadcastPermit {
                busy: self.busy.clone(),
            })
    }

    pub fn in_progress(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub struct BroadcastPermit {
    busy: Arc<AtomicBool>,
}

impl Drop for BroadcastPermit {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_one_permit_at_a_time() {
        let guard = BroadcastGuard::new();
        let permit = guard.try_acquire().unwrap();
        assert!(guard.in_progress());
        assert!(guard.try_acquire().is_none());
        assert!(guard.clone().try_acquire().is_none());

        drop(permit);
        assert!(!guard.in_progress());
        assert!(guard.try_acquire().is_some());
    }

    #[test]
    fn permit_released_on_panic() {
        let guard = BroadcastGuard::new();
        let g = guard.clone();
        let res = std::panic::catch_unwind(move || {
            let _permit = g.try_acquire().unwrap();
            panic!("job crashed");
        });
        assert!(res.is_err());
        assert!(!guard.in_progress());
    }
}
