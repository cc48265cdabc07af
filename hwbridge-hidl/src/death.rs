// SPDX-FileCopyrightText: 2025 hwbridge contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Death notification plumbing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;

/// Receives a one-shot notice that a remote object died.
///
/// Called on a runtime thread, possibly while the owner is mid-transaction.
pub trait DeathRecipient: Send + Sync {
    fn service_died(&self, cookie: u64);
}

/// Death recipient that clears the liveness flag of a binder handle.
///
/// Holds the flag weakly so a notice arriving after the handle is dropped is
/// a no-op.
pub struct LivenessBridge {
    alive: Weak<AtomicBool>,
    interface: String,
    instance: String,
}

impl LivenessBridge {
    pub fn new(alive: Weak<AtomicBool>, interface: &str, instance: &str) -> Self {
        Self {
            alive,
            interface: interface.to_string(),
            instance: instance.to_string(),
        }
    }
}

impl DeathRecipient for LivenessBridge {
    fn service_died(&self, cookie: u64) {
        match self.alive.upgrade() {
            Some(flag) => {
                if flag.swap(false, Ordering::AcqRel) {
                    log::warn!(
                        "binder: {}/{} died (cookie={})",
                        self.interface,
                        self.instance,
                        cookie
                    );
                }
            }
            None => log::debug!(
                "binder: death notice for released handle {}/{}",
                self.interface,
                self.instance
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_clears_flag_once() {
        let alive = Arc::new(AtomicBool::new(true));
        let bridge = LivenessBridge::new(Arc::downgrade(&alive), "a.b@1.0::IFoo", "default");
        bridge.service_died(0);
        assert!(!alive.load(Ordering::Acquire));
        bridge.service_died(0);
        assert!(!alive.load(Ordering::Acquire));
    }

    #[test]
    fn test_notice_after_drop_is_noop() {
        let alive = Arc::new(AtomicBool::new(true));
        let bridge = LivenessBridge::new(Arc::downgrade(&alive), "a.b@1.0::IFoo", "default");
        drop(alive);
        bridge.service_died(7);
    }
}
