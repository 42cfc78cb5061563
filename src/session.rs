//! State owned by one editing session: the open modal, the delete lock and pending
//! delayed tasks.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};
use crate::watcher::Debouncer;

/// Asks the user to confirm a destructive action.
#[async_trait]
pub trait Prompt: Send + Sync {
    async fn confirm(&self, message: &str) -> bool;
}

/// Confirms everything. Used by the headless host.
pub struct AutoConfirm;

#[async_trait]
impl Prompt for AutoConfirm {
    async fn confirm(&self, _message: &str) -> bool {
        true
    }
}

/// Guards the whole confirm-then-delete sequence so a double click deletes once.
#[derive(Debug, Clone, Default)]
pub struct DeleteLock {
    held: Arc<AtomicBool>,
}

impl DeleteLock {
    pub fn try_acquire(&self) -> Result<DeleteToken> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::Busy)?;
        Ok(DeleteToken {
            held: Arc::clone(&self.held),
            deferred: false,
        })
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

/// Proof of holding the delete lock. Dropping it releases the lock at once;
/// `release_after` keeps it held a little longer.
#[derive(Debug)]
pub struct DeleteToken {
    held: Arc<AtomicBool>,
    deferred: bool,
}

impl DeleteToken {
    /// Release once `delay` has passed, so change events caused by the delete settle first.
    pub fn release_after(mut self, delay: Duration) {
        self.deferred = true;
        let held = Arc::clone(&self.held);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            held.store(false, Ordering::Release);
            debug!("delete lock released");
        });
    }
}

impl Drop for DeleteToken {
    fn drop(&mut self) {
        if !self.deferred {
            self.held.store(false, Ordering::Release);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModalKind {
    Describe,
    Edit,
    ConfirmDelete,
}

#[derive(Debug, Default)]
struct ModalState {
    next_id: u64,
    open: Option<(u64, ModalKind)>,
}

/// At most one modal is open. Opening another replaces it.
#[derive(Debug, Clone, Default)]
pub struct ModalSlot {
    state: Arc<Mutex<ModalState>>,
}

impl ModalSlot {
    pub fn open(&self, kind: ModalKind) -> ModalGuard {
        let mut state = self.state.lock().expect("modal slot mutex");
        state.next_id += 1;
        let id = state.next_id;
        if let Some((_, previous)) = state.open.replace((id, kind)) {
            debug!(?previous, ?kind, "replacing open modal");
        }
        ModalGuard {
            slot: self.clone(),
            id,
        }
    }

    pub fn current(&self) -> Option<ModalKind> {
        self.state
            .lock()
            .expect("modal slot mutex")
            .open
            .map(|(_, kind)| kind)
    }

    pub fn close_all(&self) {
        self.state.lock().expect("modal slot mutex").open = None;
    }
}

/// Closes its modal when dropped, unless a newer modal has replaced it.
#[derive(Debug)]
pub struct ModalGuard {
    slot: ModalSlot,
    id: u64,
}

impl Drop for ModalGuard {
    fn drop(&mut self) {
        let mut state = self.slot.state.lock().expect("modal slot mutex");
        if state.open.map(|(id, _)| id) == Some(self.id) {
            state.open = None;
        }
    }
}

/// Session-scoped state with an explicit end of life.
#[derive(Clone, Default)]
pub struct Session {
    pub modal: ModalSlot,
    pub delete_lock: DeleteLock,
    pub debouncer: Debouncer,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close any modal, cancel pending delayed tasks and refuse new ones. Work that
    /// already started runs to completion but cannot schedule follow-ups.
    pub fn dispose(&self) {
        self.modal.close_all();
        self.debouncer.close();
        debug!("session disposed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_delete_lock_rejects_second_holder() {
        let lock = DeleteLock::default();
        let token = lock.try_acquire().unwrap();
        assert!(matches!(lock.try_acquire(), Err(Error::Busy)));
        drop(token);
        assert!(lock.try_acquire().is_ok());
    }

    #[tokio::test]
    async fn test_delete_lock_release_is_delayed() {
        let lock = DeleteLock::default();
        lock.try_acquire()
            .unwrap()
            .release_after(Duration::from_millis(30));
        assert!(lock.is_held());
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!lock.is_held());
    }

    #[test]
    fn test_modal_slot_holds_one_modal() {
        let slot = ModalSlot::default();
        let first = slot.open(ModalKind::Describe);
        let second = slot.open(ModalKind::ConfirmDelete);
        assert_eq!(slot.current(), Some(ModalKind::ConfirmDelete));

        // The replaced modal closing must not close the newer one
        drop(first);
        assert_eq!(slot.current(), Some(ModalKind::ConfirmDelete));
        drop(second);
        assert_eq!(slot.current(), None);
    }

    #[tokio::test]
    async fn test_dispose_cancels_pending_tasks() {
        let session = Session::new();
        let _modal = session.modal.open(ModalKind::Edit);
        session.debouncer.schedule(
            "a.md".into(),
            Duration::from_millis(50),
            async { Err(Error::Busy) },
        );
        session.dispose();
        assert_eq!(session.debouncer.pending(), 0);
        assert_eq!(session.modal.current(), None);
        assert!(session.debouncer.is_closed());
    }
}
