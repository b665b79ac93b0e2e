//! Synchronous progress reporting. Callbacks run on the caller's thread,
//! between filesystem operations; there is no background transport here.

use std::path::PathBuf;

/// Events emitted while scanning capture sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// One capture source is about to be walked.
    ScanBegin { source: PathBuf, target: String },
    /// A path was visited; `excluded` reports whether the capture
    /// configuration pruned it.
    ScanDentry { path: String, excluded: bool },
    /// The source finished.
    ScanEnd { source: PathBuf, target: String },
}

/// Caller-supplied progress receiver.
pub type ProgressFn<'a> = dyn FnMut(&ProgressEvent) + 'a;

/// Internal shim so engine code can emit unconditionally.
pub(crate) struct Progress<'a, 'b>(pub Option<&'a mut ProgressFn<'b>>);

impl Progress<'_, '_> {
    pub(crate) fn emit(&mut self, event: ProgressEvent) {
        if let Some(f) = self.0.as_mut() {
            f(&event);
        }
    }
}
