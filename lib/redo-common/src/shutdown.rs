use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Shutdown coordination shared across every thread in the pipeline
/// (spec.md §4.9 / §5).
///
/// Two independent flags: `soft` asks the pipeline to stop once the current
/// transaction's commit has been fully emitted; `hard` asks every thread to
/// stop at its next safe point, dropping whatever it was doing. A signal
/// handler (or any caller) flips one of these and broadcasts every condition
/// variable that a thread has registered itself on, so that threads blocked
/// in `get_chunk`, ring-buffer waits, or the writer's sent-queue wait all
/// wake up and re-check their predicate.
#[derive(Clone)]
pub struct ClockGuardedShutdown {
    inner: Arc<Inner>,
}

struct Inner {
    soft: AtomicBool,
    hard: AtomicBool,
    waiters: Mutex<Vec<Arc<Condvar>>>,
}

impl Default for ClockGuardedShutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockGuardedShutdown {
    pub fn new() -> Self {
        ClockGuardedShutdown {
            inner: Arc::new(Inner {
                soft: AtomicBool::new(false),
                hard: AtomicBool::new(false),
                waiters: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Registers a condition variable to be broadcast on any shutdown. Every
    /// component that blocks on its own `(Mutex, Condvar)` pair should
    /// register that condvar once at startup.
    pub fn register(&self, cv: Arc<Condvar>) {
        self.inner.waiters.lock().expect("poisoned").push(cv);
    }

    pub fn soft_shutdown(&self) {
        self.inner.soft.store(true, Ordering::SeqCst);
        self.broadcast();
    }

    pub fn hard_shutdown(&self) {
        self.inner.hard.store(true, Ordering::SeqCst);
        self.broadcast();
    }

    pub fn is_soft(&self) -> bool {
        self.inner.soft.load(Ordering::SeqCst)
    }

    pub fn is_hard(&self) -> bool {
        self.inner.hard.load(Ordering::SeqCst)
    }

    /// True once either shutdown flag is set; the predicate every blocking
    /// wait in the system must OR with its own "work available" condition.
    pub fn should_stop(&self) -> bool {
        self.is_soft() || self.is_hard()
    }

    fn broadcast(&self) {
        for cv in self.inner.waiters.lock().expect("poisoned").iter() {
            cv.notify_all();
        }
    }

    /// Blocks on `cv`/`guard` until `predicate` holds, `hard_shutdown` is
    /// signaled, or `timeout` elapses — whichever comes first. Returns the
    /// reacquired guard; callers re-check `is_hard()` themselves, since a
    /// soft shutdown alone should not abort an in-flight wait (the predicate
    /// is expected to account for it where relevant).
    pub fn wait_while<'a, T>(
        &self,
        cv: &Condvar,
        mut guard: MutexGuard<'a, T>,
        timeout: Duration,
        mut predicate: impl FnMut(&mut T) -> bool,
    ) -> MutexGuard<'a, T> {
        loop {
            if self.is_hard() || predicate(&mut guard) {
                return guard;
            }
            let (next, timed_out) = cv.wait_timeout(guard, timeout).expect("poisoned");
            guard = next;
            if timed_out.timed_out() {
                return guard;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn hard_shutdown_wakes_waiters() {
        let shutdown = ClockGuardedShutdown::new();
        let cv = Arc::new(Condvar::new());
        shutdown.register(Arc::clone(&cv));
        let mutex = Arc::new(Mutex::new(false));

        let s2 = shutdown.clone();
        let cv2 = Arc::clone(&cv);
        let mutex2 = Arc::clone(&mutex);
        let handle = thread::spawn(move || {
            let guard = mutex2.lock().unwrap();
            let _ = s2.wait_while(&cv2, guard, Duration::from_secs(5), |ready| *ready);
        });

        thread::sleep(Duration::from_millis(20));
        shutdown.hard_shutdown();
        handle.join().unwrap();
        assert!(shutdown.is_hard());
    }

    #[test]
    fn should_stop_reflects_either_flag() {
        let shutdown = ClockGuardedShutdown::new();
        assert!(!shutdown.should_stop());
        shutdown.soft_shutdown();
        assert!(shutdown.should_stop());
    }
}
