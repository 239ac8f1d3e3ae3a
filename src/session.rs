//! Per-command session context.
//!
//! Every top-level operation receives a [`SessionContext`] explicitly —
//! there is no ambient global state. The context owns the result store
//! handle, the save policy, and a cooperative cancel flag. It is created
//! when a command (or one interactive-menu action) starts and dropped
//! when it ends; nothing in it outlives the command except what the
//! store persisted.

use crate::error::BomError;
use crate::store::ResultStore;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Context threaded through one pipeline invocation.
#[derive(Debug, Clone)]
pub struct SessionContext {
    store: Option<ResultStore>,
    save_results: bool,
    cancel: Arc<AtomicBool>,
}

impl SessionContext {
    /// A context that persists nothing. Results exist only in the return
    /// value.
    pub fn ephemeral() -> Self {
        Self {
            store: None,
            save_results: false,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A context that saves every successful unit into a store at `root`.
    pub fn with_store(root: impl Into<PathBuf>) -> Result<Self, BomError> {
        let store = ResultStore::open(root)?;
        debug!("Session store at {}", store.root().display());
        Ok(Self {
            store: Some(store),
            save_results: true,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Open a store for reading (e.g. the `latex` command) without
    /// turning on the save policy.
    pub fn with_store_readonly(root: impl Into<PathBuf>) -> Result<Self, BomError> {
        let store = ResultStore::open(root)?;
        Ok(Self {
            store: Some(store),
            save_results: false,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The store handle, when this session has one.
    pub fn store(&self) -> Option<&ResultStore> {
        self.store.as_ref()
    }

    /// Whether successful units should be persisted.
    pub fn should_save(&self) -> bool {
        self.save_results && self.store.is_some()
    }

    /// A clonable handle for signalling cancellation from another task
    /// (e.g. a ctrl-c handler).
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Request cooperative cancellation. Units check between pipeline
    /// stages; an external call already in flight runs to completion, and
    /// anything already stored stays stored.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ephemeral_never_saves() {
        let ctx = SessionContext::ephemeral();
        assert!(!ctx.should_save());
        assert!(ctx.store().is_none());
        assert!(!ctx.is_cancelled());
    }

    #[test]
    fn store_session_saves() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = SessionContext::with_store(dir.path()).unwrap();
        assert!(ctx.should_save());
        assert!(ctx.store().is_some());
    }

    #[test]
    fn readonly_store_does_not_save() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = SessionContext::with_store_readonly(dir.path()).unwrap();
        assert!(!ctx.should_save());
        assert!(ctx.store().is_some());
    }

    #[test]
    fn cancel_is_visible_through_clones_and_handles() {
        let ctx = SessionContext::ephemeral();
        let clone = ctx.clone();
        let handle = ctx.cancel_handle();
        handle.store(true, Ordering::SeqCst);
        assert!(ctx.is_cancelled());
        assert!(clone.is_cancelled());
    }
}
