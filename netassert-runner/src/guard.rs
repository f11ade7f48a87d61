//! Cleanup of local containers whose worker was cancelled.
//!
//! A worker aborted at the class deadline never reaches its own
//! `remove_container` call. Its [`ContainerGuard`] is dropped instead and
//! hands the container name to the [`Reaper`], which the strategy drains
//! once the class has finished.

use std::sync::{Arc, Mutex};

use netassert_types::ContainerName;

/// Containers awaiting forced removal.
#[derive(Debug, Clone, Default)]
pub struct Reaper {
    pending: Arc<Mutex<Vec<ContainerName>>>,
}

impl Reaper {
    /// Create an empty reaper.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a guard for a freshly created container.
    pub fn guard(&self, name: ContainerName) -> ContainerGuard {
        ContainerGuard {
            name: Some(name),
            pending: Arc::clone(&self.pending),
        }
    }

    /// Remove and return every pending container name.
    pub fn take_pending(&self) -> Vec<ContainerName> {
        match self.pending.lock() {
            Ok(mut pending) => std::mem::take(&mut *pending),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

/// Hands a container to its [`Reaper`] on drop unless disarmed.
#[derive(Debug)]
pub struct ContainerGuard {
    name: Option<ContainerName>,
    pending: Arc<Mutex<Vec<ContainerName>>>,
}

impl ContainerGuard {
    /// The guarded container.
    pub fn name(&self) -> Option<&ContainerName> {
        self.name.as_ref()
    }

    /// The container was removed normally.
    pub fn disarm(mut self) {
        self.name = None;
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if let Some(name) = self.name.take() {
            tracing::debug!("Container {} left behind, queued for removal", name);
            match self.pending.lock() {
                Ok(mut pending) => pending.push(name),
                Err(poisoned) => poisoned.into_inner().push(name),
            }
        }
    }
}
