//! Cancellable observer handles.
//!
//! A handle wraps anything that can be told to stop: a thread, a timer, a
//! scheduled task, or a plain callback. The registry only ever sees the handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Something that can be stopped.
///
/// `dispose` may be called from any thread. Implementations do not need to
/// be idempotent themselves; [`ObserverHandle`] guarantees a single call.
pub trait Disposable: Send + Sync {
    fn dispose(&self);
}

struct Inner {
    label: &'static str,
    disposed: AtomicBool,
    target: Box<dyn Disposable>,
}

/// Shared, idempotent cancellation handle.
///
/// Clones refer to the same underlying observer; disposing any clone disposes
/// all of them, and the wrapped [`Disposable`] runs at most once.
#[derive(Clone)]
pub struct ObserverHandle {
    inner: Arc<Inner>,
}

impl ObserverHandle {
    pub fn new(label: &'static str, target: impl Disposable + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                label,
                disposed: AtomicBool::new(false),
                target: Box::new(target),
            }),
        }
    }

    /// Wrap a one-shot callback.
    pub fn from_fn(label: &'static str, f: impl FnOnce() + Send + 'static) -> Self {
        Self::new(label, FnDisposable(Mutex::new(Some(Box::new(f)))))
    }

    /// Stop the observer. Returns `true` only for the call that actually
    /// disposed it; later calls are no-ops.
    pub fn dispose(&self) -> bool {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.inner.target.dispose();
        true
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    pub fn label(&self) -> &'static str {
        self.inner.label
    }

    /// Whether both handles refer to the same observer.
    pub fn same_as(&self, other: &ObserverHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl core::fmt::Debug for ObserverHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ObserverHandle")
            .field("label", &self.inner.label)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

type Callback = Box<dyn FnOnce() + Send>;

struct FnDisposable(Mutex<Option<Callback>>);

impl Disposable for FnDisposable {
    fn dispose(&self) {
        let callback = match self.0.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(callback) = callback {
            callback();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn dispose_runs_callback_once_across_clones() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handle = ObserverHandle::from_fn("test", move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let clone = handle.clone();

        assert!(handle.dispose());
        assert!(!clone.dispose());
        assert!(!handle.dispose());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(clone.is_disposed());
    }

    #[test]
    fn identity_is_shared_by_clones_only() {
        let a = ObserverHandle::from_fn("a", || {});
        let b = ObserverHandle::from_fn("b", || {});

        assert!(a.same_as(&a.clone()));
        assert!(!a.same_as(&b));
    }
}
