use std::sync::{Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

#[derive(Debug, Default)]
struct Owner {
    thread: Option<ThreadId>,
    depth: usize,
}

/// Serializes structural changes to the catalog.
///
/// The owning thread may acquire it again, so a body that registers or specializes
/// functions while it compiles does not block on itself.
#[derive(Debug, Default)]
pub(crate) struct MutationLock {
    owner: Mutex<Owner>,
    released: Condvar,
}

impl MutationLock {
    pub(crate) fn acquire(&self) -> MutationGuard<'_> {
        let me = thread::current().id();
        let mut owner = self.lock_owner();
        while owner.thread.is_some_and(|thread| thread != me) {
            owner = match self.released.wait(owner) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        owner.thread = Some(me);
        owner.depth += 1;
        MutationGuard { lock: self }
    }

    /// Whether the calling thread currently holds the lock.
    #[cfg(test)]
    pub(crate) fn is_held(&self) -> bool {
        self.lock_owner().thread == Some(thread::current().id())
    }

    fn lock_owner(&self) -> MutexGuard<'_, Owner> {
        match self.owner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

pub(crate) struct MutationGuard<'a> {
    lock: &'a MutationLock,
}

impl Drop for MutationGuard<'_> {
    fn drop(&mut self) {
        let mut owner = self.lock.lock_owner();
        owner.depth = owner.depth.saturating_sub(1);
        if owner.depth == 0 {
            owner.thread = None;
            drop(owner);
            self.lock.released.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn owner_reenters_without_blocking() {
        let lock = MutationLock::default();
        let outer = lock.acquire();
        let inner = lock.acquire();
        assert!(lock.is_held());
        drop(inner);
        assert!(lock.is_held());
        drop(outer);
        assert!(!lock.is_held());
    }

    #[test]
    fn other_threads_wait_for_release() {
        let lock = Arc::new(MutationLock::default());
        let inside = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..50 {
                        let _guard = lock.acquire();
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        thread::yield_now();
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(!lock.is_held());
    }
}
