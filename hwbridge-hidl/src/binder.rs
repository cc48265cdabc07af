// SPDX-FileCopyrightText: 2025 hwbridge contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Client-side handle to a remote HIDL service.
//!
//! A [`BinderHandle`] is produced by resolving `interface/instance` through a
//! [`HidlRuntime`]. It carries a liveness flag that a death notification
//! clears, and releases its remote reference (unlinking the death recipient
//! first) on [`BinderHandle::release`] or drop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bitflags::bitflags;
use hwbridge_common::{HidlError, Result, Status};
use parking_lot::Mutex;

use crate::death::{DeathRecipient, LivenessBridge};
use crate::parcel::Parcel;
use crate::runtime::{HidlRuntime, IBase, IBinder, ServiceManager};
use crate::transport::{self, TransportKind};

bitflags! {
    /// Flags passed to `transact`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TransactionFlags: u32 {
        /// Fire and forget; the reply is empty.
        const ONEWAY = 0x01;
    }
}

/// Cookie registered with every death link.
const DEATH_COOKIE: u64 = 0;

/// Observable lifecycle of a resolved handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinderState {
    Live,
    /// The remote died; the reference is still held until release.
    Dead,
    Released,
}

struct Remote {
    base: Arc<dyn IBase>,
    binder: Arc<dyn IBinder>,
    recipient: Arc<dyn DeathRecipient>,
}

/// Handle to a resolved remote object.
pub struct BinderHandle {
    interface: String,
    instance: String,
    transport: TransportKind,
    alive: Arc<AtomicBool>,
    remote: Mutex<Option<Remote>>,
}

impl BinderHandle {
    /// Resolve `interface/instance`, returning the specific failure.
    pub fn resolve(runtime: &dyn HidlRuntime, interface: &str, instance: &str) -> Result<Self> {
        let registry = transport::registry(runtime, interface, instance)?;
        let kind = transport::query_transport(registry.as_ref(), interface, instance)?;

        let manager = match kind {
            TransportKind::SharedMemory => registry,
            TransportKind::InProcess | TransportKind::Unknown => runtime
                .passthrough_service_manager()
                .ok_or_else(|| not_found(interface, instance, "no passthrough service manager"))?,
        };

        let base = lookup(manager.as_ref(), interface, instance)?;
        check_cast(base.as_ref(), interface, instance)?;

        let binder = runtime
            .to_binder(&base)
            .ok_or_else(|| not_found(interface, instance, "object has no binder"))?;

        let alive = Arc::new(AtomicBool::new(true));
        let recipient: Arc<dyn DeathRecipient> =
            Arc::new(LivenessBridge::new(Arc::downgrade(&alive), interface, instance));
        base.link_to_death(recipient.clone(), DEATH_COOKIE)
            .map_err(|status| not_found(interface, instance, &format!("linkToDeath failed: {}", status)))?;

        log::info!("binder: resolved {}/{} over {}", interface, instance, kind);
        Ok(Self {
            interface: interface.to_string(),
            instance: instance.to_string(),
            transport: kind,
            alive,
            remote: Mutex::new(Some(Remote {
                base,
                binder,
                recipient,
            })),
        })
    }

    /// Resolve `interface/instance`. Recoverable failures are logged and
    /// yield `Ok(None)`; only fatal errors propagate.
    pub fn query(runtime: &dyn HidlRuntime, interface: &str, instance: &str) -> Result<Option<Self>> {
        match Self::resolve(runtime, interface, instance) {
            Ok(handle) => Ok(Some(handle)),
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                log::warn!("binder: {}", err);
                Ok(None)
            }
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    /// Whether the remote is still believed to be running. Never blocks.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn state(&self) -> BinderState {
        if self.remote.lock().is_none() {
            BinderState::Released
        } else if self.is_alive() {
            BinderState::Live
        } else {
            BinderState::Dead
        }
    }

    /// Send `data` and return the reply parcel.
    pub fn transact(&self, code: u32, data: &Parcel, flags: TransactionFlags) -> Result<Parcel> {
        let mut reply = Parcel::new();
        self.transact_into(code, data, &mut reply, flags)?;
        Ok(reply)
    }

    /// Send `data` and replace `reply` with the answer. On error `reply` is
    /// left as it was.
    pub fn transact_into(
        &self,
        code: u32,
        data: &Parcel,
        reply: &mut Parcel,
        flags: TransactionFlags,
    ) -> Result<()> {
        // Hold the lock only long enough to clone the endpoint.
        let binder = {
            let remote = self.remote.lock();
            match remote.as_ref() {
                Some(remote) if self.is_alive() => remote.binder.clone(),
                _ => return Err(self.gone(code)),
            }
        };

        if data.has_file_descriptors() && !binder.supports_fd_transfer() {
            return Err(HidlError::FdTransferUnsupported {
                interface: self.interface.clone(),
                instance: self.instance.clone(),
            });
        }

        log::debug!(
            "binder: transact {}/{} code={} len={} flags={:?}",
            self.interface,
            self.instance,
            code,
            data.data_size(),
            flags
        );
        let raw = binder
            .transact(code, &data.serialize(), flags.bits())
            .map_err(|status| {
                if status == Status::DEAD_OBJECT {
                    self.alive.store(false, Ordering::Release);
                    self.gone(code)
                } else {
                    HidlError::Transport {
                        interface: self.interface.clone(),
                        instance: self.instance.clone(),
                        code,
                        status,
                    }
                }
            })?;

        *reply = if flags.contains(TransactionFlags::ONEWAY) {
            Parcel::new()
        } else {
            Parcel::from_bytes(&raw)?
        };
        Ok(())
    }

    /// Unlink the death recipient and drop the remote reference. Idempotent.
    pub fn release(&self) {
        let Some(remote) = self.remote.lock().take() else {
            return;
        };
        self.alive.store(false, Ordering::Release);
        if let Err(status) = remote.base.unlink_to_death(&remote.recipient) {
            log::debug!(
                "binder: unlinkToDeath {}/{}: {}",
                self.interface,
                self.instance,
                status
            );
        }
        log::info!("binder: released {}/{}", self.interface, self.instance);
    }

    fn gone(&self, code: u32) -> HidlError {
        HidlError::RemoteGone {
            interface: self.interface.clone(),
            instance: self.instance.clone(),
            code,
        }
    }
}

impl Drop for BinderHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for BinderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinderHandle")
            .field("interface", &self.interface)
            .field("instance", &self.instance)
            .field("transport", &self.transport)
            .field("state", &self.state())
            .finish()
    }
}

fn not_found(interface: &str, instance: &str, reason: &str) -> HidlError {
    HidlError::NotFound {
        interface: interface.to_string(),
        instance: instance.to_string(),
        reason: reason.to_string(),
    }
}

fn lookup(manager: &dyn ServiceManager, interface: &str, instance: &str) -> Result<Arc<dyn IBase>> {
    match manager.get(interface, instance) {
        Ok(Some(base)) => Ok(base),
        Ok(None) => Err(not_found(interface, instance, "no such service")),
        Err(status) => Err(not_found(interface, instance, &format!("get failed: {}", status))),
    }
}

/// The object must implement `interface` somewhere in its chain.
fn check_cast(base: &dyn IBase, interface: &str, instance: &str) -> Result<()> {
    let chain = base.interface_chain().map_err(|status| HidlError::InvalidInterface {
        expected: interface.to_string(),
        actual: format!("interfaceChain failed: {}", status),
    })?;
    if chain.iter().any(|descriptor| descriptor == interface) {
        return Ok(());
    }
    log::debug!("binder: {}/{} chain {:?}", interface, instance, chain);
    Err(HidlError::InvalidInterface {
        expected: interface.to_string(),
        actual: chain.first().cloned().unwrap_or_default(),
    })
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parcel::{NativeHandle, Placement};
    use crate::passthrough::{HidlService, LocalRuntime};
    use crate::runtime::HIDL_BASE_DESCRIPTOR;

    const IFOO: &str = "demo.IFoo@1.0::IFoo";
    const IFOO_V11: &str = "demo.IFoo@1.1::IFoo";

    /// Replies with the int32 it receives, doubled.
    struct DoubleService {
        chain: Vec<String>,
    }

    impl DoubleService {
        fn boxed(chain: &[&str]) -> Box<dyn HidlService> {
            Box::new(Self {
                chain: chain.iter().map(|s| s.to_string()).collect(),
            })
        }
    }

    impl HidlService for DoubleService {
        fn interface_chain(&self) -> Vec<String> {
            self.chain.clone()
        }

        fn on_transact(
            &mut self,
            code: u32,
            data: &mut Parcel,
            reply: &mut Parcel,
            _flags: TransactionFlags,
        ) -> std::result::Result<(), Status> {
            match code {
                1 => {
                    data.enforce_interface(IFOO).map_err(|e| e.status())?;
                    let value = data.read_i32().map_err(|e| e.status())?;
                    reply.write_i32(value * 2).map_err(|e| e.status())
                }
                2 => Err(Status::BAD_VALUE),
                _ => Err(Status::UNKNOWN_TRANSACTION),
            }
        }
    }

    fn passthrough_runtime() -> LocalRuntime {
        let rt = LocalRuntime::new();
        rt.registry()
            .unwrap()
            .declare_transport(IFOO, "default", TransportKind::InProcess);
        rt.passthrough()
            .unwrap()
            .register("default", DoubleService::boxed(&[IFOO, HIDL_BASE_DESCRIPTOR]));
        rt
    }

    fn request(value: i32) -> Parcel {
        let mut p = Parcel::new();
        p.write_interface_token(IFOO).unwrap();
        p.write_i32(value).unwrap();
        p
    }

    #[test]
    fn test_resolve_and_transact() {
        let rt = passthrough_runtime();
        let handle = BinderHandle::resolve(&rt, IFOO, "default").unwrap();
        assert!(handle.is_alive());
        assert_eq!(handle.state(), BinderState::Live);
        assert_eq!(handle.transport(), TransportKind::InProcess);

        let mut reply = handle
            .transact(1, &request(21), TransactionFlags::empty())
            .unwrap();
        assert_eq!(reply.read_i32().unwrap(), 42);
    }

    #[test]
    fn test_resolve_over_registry() {
        let rt = LocalRuntime::new();
        let registry = rt.registry().unwrap();
        registry.declare_transport(IFOO, "default", TransportKind::SharedMemory);
        registry.register("default", DoubleService::boxed(&[IFOO, HIDL_BASE_DESCRIPTOR]));

        let handle = BinderHandle::resolve(&rt, IFOO, "default").unwrap();
        assert_eq!(handle.transport(), TransportKind::SharedMemory);
    }

    #[test]
    fn test_unknown_transport_falls_back_to_passthrough() {
        let rt = LocalRuntime::new();
        rt.passthrough()
            .unwrap()
            .register("default", DoubleService::boxed(&[IFOO, HIDL_BASE_DESCRIPTOR]));
        let handle = BinderHandle::resolve(&rt, IFOO, "default").unwrap();
        assert_eq!(handle.transport(), TransportKind::Unknown);
    }

    #[test]
    fn test_cast_through_derived_interface() {
        let rt = LocalRuntime::new();
        rt.passthrough()
            .unwrap()
            .register("default", DoubleService::boxed(&[IFOO_V11, IFOO, HIDL_BASE_DESCRIPTOR]));
        // Registered under every descriptor, and the chain contains IFOO.
        assert!(BinderHandle::resolve(&rt, IFOO, "default").is_ok());
    }

    #[test]
    fn test_not_found() {
        let rt = passthrough_runtime();
        let err = BinderHandle::resolve(&rt, IFOO, "missing").unwrap_err();
        assert!(matches!(err, HidlError::NotFound { .. }));
        assert!(BinderHandle::query(&rt, IFOO, "missing").unwrap().is_none());
    }

    #[test]
    fn test_missing_passthrough_manager() {
        let rt = LocalRuntime::without_passthrough();
        let err = BinderHandle::resolve(&rt, IFOO, "default").unwrap_err();
        assert!(matches!(err, HidlError::NotFound { .. }));
    }

    #[test]
    fn test_cast_failure() {
        let rt = LocalRuntime::new();
        let sm = rt.passthrough().unwrap();
        sm.register("default", DoubleService::boxed(&["demo.IBar@1.0::IBar", HIDL_BASE_DESCRIPTOR]));
        // Reachable by base descriptor, but does not implement IFoo.
        assert!(BinderHandle::resolve(&rt, HIDL_BASE_DESCRIPTOR, "default").is_ok());
        let base = sm.service(HIDL_BASE_DESCRIPTOR, "default").unwrap();
        let err = check_cast(base.as_ref(), IFOO, "default").unwrap_err();
        assert_eq!(
            err,
            HidlError::InvalidInterface {
                expected: IFOO.into(),
                actual: "demo.IBar@1.0::IBar".into(),
            }
        );
    }

    #[test]
    fn test_registry_unreachable() {
        let rt = LocalRuntime::without_registry();
        let err = BinderHandle::query(&rt, IFOO, "default").unwrap_err();
        assert!(matches!(err, HidlError::TransportUnavailable { .. }));
    }

    #[test]
    fn test_death_marks_handle_dead() {
        let rt = passthrough_runtime();
        let handle = BinderHandle::resolve(&rt, IFOO, "default").unwrap();
        assert!(rt.passthrough().unwrap().unregister(IFOO, "default"));

        assert!(!handle.is_alive());
        assert_eq!(handle.state(), BinderState::Dead);

        let mut reply = Parcel::new();
        reply.write_i32(99).unwrap();
        let err = handle
            .transact_into(1, &request(1), &mut reply, TransactionFlags::empty())
            .unwrap_err();
        assert!(matches!(err, HidlError::RemoteGone { code: 1, .. }));
        // Reply untouched.
        reply.set_data_position(0);
        assert_eq!(reply.read_i32().unwrap(), 99);
    }

    #[test]
    fn test_death_from_another_thread() {
        let rt = passthrough_runtime();
        let handle = Arc::new(BinderHandle::resolve(&rt, IFOO, "default").unwrap());
        let manager = Arc::clone(rt.passthrough().unwrap());

        let watcher = {
            let handle = Arc::clone(&handle);
            std::thread::spawn(move || {
                while handle.is_alive() {
                    std::thread::yield_now();
                }
            })
        };
        let killer = std::thread::spawn(move || manager.unregister(IFOO, "default"));

        assert!(killer.join().unwrap());
        watcher.join().unwrap();
        assert!(!handle.is_alive());
        assert_eq!(handle.state(), BinderState::Dead);
    }

    #[test]
    fn test_release_unlinks_and_is_idempotent() {
        let rt = passthrough_runtime();
        let handle = BinderHandle::resolve(&rt, IFOO, "default").unwrap();
        let binder = rt.passthrough().unwrap().service(IFOO, "default").unwrap();
        assert_eq!(binder.death_link_count(), 1);

        handle.release();
        assert_eq!(binder.death_link_count(), 0);
        assert_eq!(handle.state(), BinderState::Released);
        handle.release();

        let err = handle
            .transact(1, &request(1), TransactionFlags::empty())
            .unwrap_err();
        assert!(matches!(err, HidlError::RemoteGone { .. }));
    }

    #[test]
    fn test_drop_unlinks() {
        let rt = passthrough_runtime();
        let binder = rt.passthrough().unwrap().service(IFOO, "default").unwrap();
        {
            let _handle = BinderHandle::resolve(&rt, IFOO, "default").unwrap();
            assert_eq!(binder.death_link_count(), 1);
        }
        assert_eq!(binder.death_link_count(), 0);
        // A later death has nobody to notify.
        binder.kill();
    }

    #[test]
    fn test_transport_error_status() {
        let rt = passthrough_runtime();
        let handle = BinderHandle::resolve(&rt, IFOO, "default").unwrap();
        let err = handle
            .transact(2, &request(1), TransactionFlags::empty())
            .unwrap_err();
        assert_eq!(err.status(), Status::BAD_VALUE);
        assert!(handle.is_alive());
    }

    #[test]
    fn test_oneway_reply_is_empty() {
        let rt = passthrough_runtime();
        let handle = BinderHandle::resolve(&rt, IFOO, "default").unwrap();
        let reply = handle
            .transact(1, &request(4), TransactionFlags::ONEWAY)
            .unwrap();
        assert_eq!(reply.data_size(), 0);
    }

    /// Endpoint that cannot carry descriptors across.
    struct NoFdBinder;

    impl IBinder for NoFdBinder {
        fn transact(&self, _: u32, _: &[u8], _: u32) -> std::result::Result<Vec<u8>, Status> {
            Ok(Parcel::new().serialize())
        }

        fn supports_fd_transfer(&self) -> bool {
            false
        }
    }

    struct NoFdRuntime(LocalRuntime);

    impl HidlRuntime for NoFdRuntime {
        fn default_service_manager(&self) -> Option<Arc<dyn ServiceManager>> {
            self.0.default_service_manager()
        }

        fn passthrough_service_manager(&self) -> Option<Arc<dyn ServiceManager>> {
            self.0.passthrough_service_manager()
        }

        fn to_binder(&self, _: &Arc<dyn IBase>) -> Option<Arc<dyn IBinder>> {
            Some(Arc::new(NoFdBinder))
        }
    }

    #[test]
    fn test_fd_transfer_unsupported() {
        let rt = NoFdRuntime(passthrough_runtime());
        let handle = BinderHandle::resolve(&rt, IFOO, "default").unwrap();

        let mut data = request(1);
        let fds = NativeHandle::new(vec![5], vec![]);
        data.write_native_handle_no_dup(Some(&fds), Placement::TopLevel)
            .unwrap();
        let err = handle
            .transact(1, &data, TransactionFlags::empty())
            .unwrap_err();
        assert!(matches!(err, HidlError::FdTransferUnsupported { .. }));

        // Without descriptors the same endpoint works.
        assert!(handle
            .transact(1, &request(1), TransactionFlags::empty())
            .is_ok());
    }
}
