//! Node status flags shared by the hook and whoever answers remote queries.

use std::sync::{Mutex, MutexGuard};

use tracing::debug;

#[derive(Debug)]
struct Flags {
    zombie: Option<u32>,
    hooking: bool,
    hooked_waiting: Option<u32>,
    gonna_hook: bool,
}

/// Zombie, hooking and hooked-waiting flags.
///
/// A fresh node is `gonna_hook`: it has not bootstrapped yet.
#[derive(Debug)]
pub struct NodeStatus {
    flags: Mutex<Flags>,
}

impl Default for NodeStatus {
    fn default() -> Self {
        Self {
            flags: Mutex::new(Flags {
                zombie: None,
                hooking: false,
                hooked_waiting: None,
                gonna_hook: true,
            }),
        }
    }
}

impl NodeStatus {
    pub fn new() -> Self {
        Self::default()
    }

    fn flags(&self) -> MutexGuard<'_, Flags> {
        self.flags.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_zombie(&self) -> bool {
        self.flags().zombie.is_some()
    }

    pub fn zombie_id(&self) -> Option<u32> {
        self.flags().zombie
    }

    pub fn set_zombie_id(&self, id: u32) {
        debug!(zombie_id = id, "entering zombie state");
        self.flags().zombie = Some(id);
    }

    /// Leave the zombie state if `id` is the current token.
    pub fn unset_zombie_id(&self, id: u32) -> bool {
        let mut flags = self.flags();
        if flags.zombie == Some(id) {
            flags.zombie = None;
            true
        } else {
            false
        }
    }

    pub fn is_hooking(&self) -> bool {
        self.flags().hooking
    }

    /// Mark the start or the end of a hook attempt.
    pub fn set_hooking(&self, hooking: bool) {
        let mut flags = self.flags();
        flags.hooking = hooking;
        if hooking {
            flags.gonna_hook = false;
        }
    }

    pub fn gonna_hook(&self) -> bool {
        self.flags().gonna_hook
    }

    pub fn set_gonna_hook(&self, gonna_hook: bool) {
        self.flags().gonna_hook = gonna_hook;
    }

    pub fn hooked_waiting_id(&self) -> Option<u32> {
        self.flags().hooked_waiting
    }

    pub fn set_hooked_waiting_id(&self, id: u32) {
        self.flags().hooked_waiting = Some(id);
    }

    /// Clear the waiting token if it is `id`; the join is then complete.
    pub fn unset_hooked_waiting_id(&self, id: u32) -> bool {
        let mut flags = self.flags();
        if flags.hooked_waiting == Some(id) {
            flags.hooked_waiting = None;
            flags.hooking = false;
            true
        } else {
            false
        }
    }

    /// Joined, not about to rehook and not cooling down.
    pub fn is_hooked(&self) -> bool {
        let flags = self.flags();
        !flags.hooking && !flags.gonna_hook && flags.zombie.is_none()
    }
}
