// SPDX-FileCopyrightText: 2025 hwbridge contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Seams to the HIDL runtime.
//!
//! The binder layer only talks to these traits. [`crate::passthrough`]
//! provides an in-process implementation; a device build would back them with
//! the system service manager and the hwbinder driver.

use std::any::Any;
use std::sync::Arc;

use hwbridge_common::Status;

use crate::death::DeathRecipient;

/// Descriptor every HIDL interface chain ends with.
pub const HIDL_BASE_DESCRIPTOR: &str = "android.hidl.base@1.0::IBase";

/// Root of every HIDL object (`android.hidl.base@1.0::IBase`).
pub trait IBase: Send + Sync {
    /// Descriptors from the most derived interface down to the base.
    fn interface_chain(&self) -> Result<Vec<String>, Status>;

    fn link_to_death(&self, recipient: Arc<dyn DeathRecipient>, cookie: u64) -> Result<(), Status>;

    fn unlink_to_death(&self, recipient: &Arc<dyn DeathRecipient>) -> Result<(), Status>;

    /// Upcast for runtimes that need the concrete object back.
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Transaction endpoint of a remote object.
pub trait IBinder: Send + Sync {
    /// Deliver a serialized request parcel, returning the serialized reply.
    /// One-way calls return an empty reply.
    fn transact(&self, code: u32, data: &[u8], flags: u32) -> Result<Vec<u8>, Status>;

    /// Whether descriptors in native handles can cross this endpoint.
    fn supports_fd_transfer(&self) -> bool {
        true
    }
}

/// Raw manifest transport values (`IServiceManager::Transport`).
pub mod manifest {
    pub const EMPTY: u8 = 0;
    pub const HWBINDER: u8 = 1;
    pub const PASSTHROUGH: u8 = 2;
}

/// A service registry (`IServiceManager`).
pub trait ServiceManager: Send + Sync {
    /// Manifest transport of `interface/instance`, one of [`manifest`].
    fn get_transport(&self, interface: &str, instance: &str) -> Result<u8, Status>;

    fn get(&self, interface: &str, instance: &str) -> Result<Option<Arc<dyn IBase>>, Status>;
}

/// Process-wide entry points of the HIDL runtime.
pub trait HidlRuntime: Send + Sync {
    /// The central (hwbinder) registry; `None` when it cannot be reached.
    fn default_service_manager(&self) -> Option<Arc<dyn ServiceManager>>;

    /// The registry of in-process implementations.
    fn passthrough_service_manager(&self) -> Option<Arc<dyn ServiceManager>>;

    fn to_binder(&self, object: &Arc<dyn IBase>) -> Option<Arc<dyn IBinder>>;
}
