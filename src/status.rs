//! Module status state machine and the single-flight action lock.
//!
//! The node carries exactly one piece of shared mutable state: its
//! [`ModuleStatus`]. It doubles as the action lock, so every transition
//! through BUSY goes through [`StatusCell::try_acquire`] and the returned
//! [`ActionGuard`].
//!
//! # Transitions
//!
//! ```text
//! INIT ──init ok──► IDLE ◄──release── BUSY
//!   │                 │                 │
//!   └──init failed──► ERROR ◄──fault────┘
//!                     │
//!                     └──admin reset──► IDLE
//! ```
//!
//! Acquire is one indivisible check-and-set under the cell's mutex, so two
//! concurrent requests can never both observe IDLE and both enter BUSY.

use crate::error::{NodeError, NodeResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Coarse-grained lifecycle state of the whole node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ModuleStatus {
    /// Driver not initialised yet
    Init,
    /// Ready to accept an action
    Idle,
    /// Same as `Idle`
    Ready,
    /// An action holds the lock
    Busy,
    /// Faulted; needs an administrative reset
    Error,
    /// Status could not be determined
    Unknown,
}

impl ModuleStatus {
    /// Wire name, as reported by `/state`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleStatus::Init => "INIT",
            ModuleStatus::Idle => "IDLE",
            ModuleStatus::Ready => "READY",
            ModuleStatus::Busy => "BUSY",
            ModuleStatus::Error => "ERROR",
            ModuleStatus::Unknown => "UNKNOWN",
        }
    }

    /// Whether a new action may take the lock from this state.
    pub fn accepts_actions(&self) -> bool {
        matches!(self, ModuleStatus::Idle | ModuleStatus::Ready)
    }
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared, process-wide status cell.
///
/// Cloning is cheap and every clone observes the same value.
#[derive(Clone, Debug)]
pub struct StatusCell {
    inner: Arc<Mutex<ModuleStatus>>,
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new(ModuleStatus::Init)
    }
}

impl StatusCell {
    /// Cell starting at `initial`.
    pub fn new(initial: ModuleStatus) -> Self {
        Self {
            inner: Arc::new(Mutex::new(initial)),
        }
    }

    /// Current status. Never blocks on a running action.
    pub fn get(&self) -> ModuleStatus {
        *self.inner.lock()
    }

    /// Unconditional write. Used by startup, shutdown and fault paths only.
    pub fn set(&self, new: ModuleStatus) {
        let mut status = self.inner.lock();
        if *status != new {
            debug!(from = %*status, to = %new, "module status changed");
        }
        *status = new;
    }

    /// Atomically replaces `expected` with `new`. Returns `false` and leaves
    /// the status untouched if the current value is not `expected`.
    pub fn compare_and_set(&self, expected: ModuleStatus, new: ModuleStatus) -> bool {
        let mut status = self.inner.lock();
        if *status != expected {
            return false;
        }
        debug!(from = %expected, to = %new, "module status changed");
        *status = new;
        true
    }

    /// Takes the action lock: IDLE/READY → BUSY in one step.
    ///
    /// Fails with [`NodeError::ModuleBusy`] carrying the observed status when
    /// the node is in any other state. The lock is held until the returned
    /// guard is dropped.
    pub fn try_acquire(&self) -> NodeResult<ActionGuard> {
        let mut status = self.inner.lock();
        if !status.accepts_actions() {
            return Err(NodeError::ModuleBusy(*status));
        }
        debug!(from = %*status, "action lock acquired");
        *status = ModuleStatus::Busy;
        Ok(ActionGuard { cell: self.clone() })
    }

    /// BUSY → IDLE. A no-op in every other state, so a concurrent ERROR is
    /// never clobbered. Returns whether a transition happened.
    pub fn release(&self) -> bool {
        let released = self.compare_and_set(ModuleStatus::Busy, ModuleStatus::Idle);
        if released {
            debug!("action lock released");
        }
        released
    }

    /// Administrative recovery back to IDLE. Refused while an action is running.
    pub fn reset(&self) -> NodeResult<ModuleStatus> {
        let mut status = self.inner.lock();
        if *status == ModuleStatus::Busy {
            return Err(NodeError::ModuleBusy(ModuleStatus::Busy));
        }
        if *status != ModuleStatus::Idle {
            warn!(from = %*status, "module status reset to IDLE");
        }
        *status = ModuleStatus::Idle;
        Ok(ModuleStatus::Idle)
    }
}

/// RAII handle for the action lock.
///
/// Dropping it releases the lock (BUSY → IDLE), on every exit path including
/// unwinding. [`ActionGuard::fault`] moves the node to ERROR instead.
#[derive(Debug)]
#[must_use = "dropping the guard releases the action lock immediately"]
pub struct ActionGuard {
    cell: StatusCell,
}

impl ActionGuard {
    /// BUSY → ERROR. The subsequent release on drop is then a no-op, so the
    /// node stays in ERROR until an administrative reset.
    pub fn fault(self) {
        self.cell.set(ModuleStatus::Error);
    }
}

impl Drop for ActionGuard {
    fn drop(&mut self) {
        self.cell.release();
    }
}
