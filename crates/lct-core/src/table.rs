//! Mutex-guarded pending table shared by both tracker implementations.
//!
//! Every mutation and lookup goes through one `parking_lot::Mutex`. Mutations
//! that can only make states more ready (releases, snapshot capture) notify
//! the condition variable so that blocked `wait_*` callers re-check.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::time::Instant;

pub(crate) struct GuardedTable<T> {
    inner: Mutex<T>,
    changed: Condvar,
}

impl<T: fmt::Debug> fmt::Debug for GuardedTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("GuardedTable");
        match self.inner.try_lock() {
            Some(guard) => out.field("inner", &*guard),
            None => out.field("inner", &format_args!("<locked>")),
        };
        out.finish_non_exhaustive()
    }
}

impl<T: Default> Default for GuardedTable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> GuardedTable<T> {
    pub(crate) fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
            changed: Condvar::new(),
        }
    }

    pub(crate) fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let guard = self.inner.lock();
        f(&guard)
    }

    /// Mutate without waking waiters. Only for changes that cannot make any
    /// state more ready.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut guard)
    }

    /// Mutate and wake every waiter once the lock is dropped.
    pub(crate) fn update_and_notify<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let result = {
            let mut guard = self.inner.lock();
            f(&mut guard)
        };
        self.changed.notify_all();
        result
    }

    /// Re-run `check` under the lock until it returns `Ok` or `deadline`
    /// passes. `Err` carries the last value `check` produced.
    pub(crate) fn wait_until<R>(
        &self,
        deadline: Option<Instant>,
        mut check: impl FnMut(&T) -> Result<R, R>,
    ) -> Result<R, R> {
        let mut guard = self.inner.lock();
        loop {
            if let Ok(done) = check(&guard) {
                return Ok(done);
            }
            match deadline {
                None => self.changed.wait(&mut guard),
                Some(deadline) => {
                    if self.changed.wait_until(&mut guard, deadline).timed_out() {
                        // A release may have raced the timeout.
                        return check(&guard);
                    }
                }
            }
        }
    }
}
