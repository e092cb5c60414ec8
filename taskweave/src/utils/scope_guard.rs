use std::marker::PhantomData;

/// Runs a closure when dropped, on normal exit and on unwind alike.
///
/// We use it to pair profiler start/stop events, to keep the per-thread task
/// depth balanced, and to notice worker threads unwinding out of a task.
pub(crate) struct ScopeGuard<'a, F: FnOnce()> {
    // `Option` so the closure can be taken exactly once, either by `drop` or
    // by `disarm`.
    closure: Option<F>,

    _p: PhantomData<&'a ()>,
}

impl<'a, F: FnOnce()> ScopeGuard<'a, F> {
    /// Creates an armed guard.
    ///
    /// ```ignore
    /// let mut message = String::from("unchanged");
    /// {
    ///     let _guard = ScopeGuard::new(|| message = String::from("changed!"));
    /// }
    /// assert_eq!(message, "changed!");
    /// ```
    pub(crate) fn new(closure: F) -> Self {
        ScopeGuard {
            closure: Some(closure),
            _p: PhantomData,
        }
    }

    /// The closure will not run on drop.
    pub(crate) fn disarm(mut self) {
        self.closure.take();
    }
}

impl<'a, F: FnOnce()> Drop for ScopeGuard<'a, F> {
    fn drop(&mut self) {
        if let Some(closure) = self.closure.take() {
            closure();
        }
    }
}
