// SPDX-FileCopyrightText: 2025 hwbridge contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! In-process HIDL runtime.
//!
//! [`LocalServiceManager`] maps `(descriptor, instance)` pairs to
//! [`LocalBinder`]s wrapping [`HidlService`] implementations and keeps a
//! transport manifest. [`LocalRuntime`] ties a registry and a passthrough
//! manager together behind [`HidlRuntime`].

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hwbridge_common::Status;
use parking_lot::{Mutex, RwLock};

use crate::binder::TransactionFlags;
use crate::death::DeathRecipient;
use crate::parcel::Parcel;
use crate::runtime::{self, HidlRuntime, IBase, IBinder, ServiceManager};
use crate::transport::TransportKind;

// ── Service trait ────────────────────────────────────────────────────────────

/// Trait implemented by every in-process HIDL service.
pub trait HidlService: Send + Sync {
    /// Descriptors from the most derived interface down to
    /// [`runtime::HIDL_BASE_DESCRIPTOR`].
    fn interface_chain(&self) -> Vec<String>;

    /// Dispatch one transaction. `data` is positioned at the interface token.
    fn on_transact(
        &mut self,
        code: u32,
        data: &mut Parcel,
        reply: &mut Parcel,
        flags: TransactionFlags,
    ) -> Result<(), Status>;
}

// ── Local binder ─────────────────────────────────────────────────────────────

/// A service object living in this process.
pub struct LocalBinder {
    descriptor: String,
    instance: String,
    service: RwLock<Box<dyn HidlService>>,
    dead: AtomicBool,
    recipients: Mutex<Vec<(Arc<dyn DeathRecipient>, u64)>>,
}

impl LocalBinder {
    pub fn new(instance: &str, service: Box<dyn HidlService>) -> Arc<Self> {
        let descriptor = service
            .interface_chain()
            .into_iter()
            .next()
            .unwrap_or_else(|| runtime::HIDL_BASE_DESCRIPTOR.to_string());
        Arc::new(Self {
            descriptor,
            instance: instance.to_string(),
            service: RwLock::new(service),
            dead: AtomicBool::new(false),
            recipients: Mutex::new(Vec::new()),
        })
    }

    /// Most derived interface descriptor.
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    /// Number of currently linked death recipients.
    pub fn death_link_count(&self) -> usize {
        self.recipients.lock().len()
    }

    /// Mark the object dead and notify every linked recipient once.
    pub fn kill(&self) {
        if self.dead.swap(true, Ordering::AcqRel) {
            return;
        }
        let recipients = std::mem::take(&mut *self.recipients.lock());
        log::info!(
            "passthrough: {}/{} died, notifying {} recipient(s)",
            self.descriptor,
            self.instance,
            recipients.len()
        );
        for (recipient, cookie) in recipients {
            recipient.service_died(cookie);
        }
    }
}

impl IBase for LocalBinder {
    fn interface_chain(&self) -> Result<Vec<String>, Status> {
        if self.is_dead() {
            return Err(Status::DEAD_OBJECT);
        }
        Ok(self.service.read().interface_chain())
    }

    fn link_to_death(&self, recipient: Arc<dyn DeathRecipient>, cookie: u64) -> Result<(), Status> {
        let mut recipients = self.recipients.lock();
        // Checked under the lock so kill() cannot miss a new link.
        if self.is_dead() {
            return Err(Status::DEAD_OBJECT);
        }
        recipients.push((recipient, cookie));
        Ok(())
    }

    fn unlink_to_death(&self, recipient: &Arc<dyn DeathRecipient>) -> Result<(), Status> {
        let mut recipients = self.recipients.lock();
        match recipients.iter().position(|(r, _)| Arc::ptr_eq(r, recipient)) {
            Some(index) => {
                recipients.remove(index);
                Ok(())
            }
            None => Err(Status::NAME_NOT_FOUND),
        }
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl IBinder for LocalBinder {
    fn transact(&self, code: u32, data: &[u8], flags: u32) -> Result<Vec<u8>, Status> {
        if self.is_dead() {
            return Err(Status::DEAD_OBJECT);
        }
        let flags = TransactionFlags::from_bits_truncate(flags);
        let mut request = Parcel::from_bytes(data).map_err(|e| {
            log::warn!("passthrough: {}: malformed request: {}", self.descriptor, e);
            e.status()
        })?;
        let mut reply = Parcel::new();

        log::debug!(
            "passthrough: {}/{} code={} flags={:?}",
            self.descriptor,
            self.instance,
            code,
            flags
        );
        self.service
            .write()
            .on_transact(code, &mut request, &mut reply, flags)?;

        if flags.contains(TransactionFlags::ONEWAY) {
            Ok(Vec::new())
        } else {
            Ok(reply.serialize())
        }
    }
}

// ── Service manager ──────────────────────────────────────────────────────────

type ServiceKey = (String, String);

fn key(interface: &str, instance: &str) -> ServiceKey {
    (interface.to_string(), instance.to_string())
}

/// Registry that owns local service objects and a transport manifest.
pub struct LocalServiceManager {
    services: RwLock<HashMap<ServiceKey, Arc<LocalBinder>>>,
    manifest: RwLock<HashMap<ServiceKey, TransportKind>>,
}

impl LocalServiceManager {
    pub fn new() -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
            manifest: RwLock::new(HashMap::new()),
        }
    }

    /// Register a service under every descriptor in its interface chain.
    ///
    /// An existing registration for the same pair is replaced.
    pub fn register(&self, instance: &str, service: Box<dyn HidlService>) -> Arc<LocalBinder> {
        let chain = service.interface_chain();
        let binder = LocalBinder::new(instance, service);
        log::info!("passthrough: registering {}/{}", binder.descriptor(), instance);

        let mut services = self.services.write();
        for descriptor in chain {
            services.insert(key(&descriptor, instance), binder.clone());
        }
        binder
    }

    /// Remove the service registered for `interface/instance` and kill it.
    pub fn unregister(&self, interface: &str, instance: &str) -> bool {
        let binder = {
            let mut services = self.services.write();
            let Some(binder) = services.remove(&key(interface, instance)) else {
                return false;
            };
            services.retain(|_, other| !Arc::ptr_eq(other, &binder));
            binder
        };
        log::info!("passthrough: unregistered {}/{}", interface, instance);
        binder.kill();
        true
    }

    /// Record the manifest transport for `interface/instance`.
    pub fn declare_transport(&self, interface: &str, instance: &str, kind: TransportKind) {
        self.manifest.write().insert(key(interface, instance), kind);
    }

    pub fn has_service(&self, interface: &str, instance: &str) -> bool {
        self.services.read().contains_key(&key(interface, instance))
    }

    pub fn service(&self, interface: &str, instance: &str) -> Option<Arc<LocalBinder>> {
        self.services.read().get(&key(interface, instance)).cloned()
    }

    /// Number of registered `(descriptor, instance)` pairs.
    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }
}

impl Default for LocalServiceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceManager for LocalServiceManager {
    fn get_transport(&self, interface: &str, instance: &str) -> Result<u8, Status> {
        Ok(self
            .manifest
            .read()
            .get(&key(interface, instance))
            .map_or(runtime::manifest::EMPTY, |kind| kind.raw()))
    }

    fn get(&self, interface: &str, instance: &str) -> Result<Option<Arc<dyn IBase>>, Status> {
        Ok(self
            .service(interface, instance)
            .map(|binder| binder as Arc<dyn IBase>))
    }
}

// ── Runtime ──────────────────────────────────────────────────────────────────

/// [`HidlRuntime`] backed by local service managers.
pub struct LocalRuntime {
    registry: Option<Arc<LocalServiceManager>>,
    passthrough: Option<Arc<LocalServiceManager>>,
}

impl LocalRuntime {
    pub fn new() -> Self {
        Self {
            registry: Some(Arc::new(LocalServiceManager::new())),
            passthrough: Some(Arc::new(LocalServiceManager::new())),
        }
    }

    /// A runtime whose central registry cannot be reached.
    pub fn without_registry() -> Self {
        Self {
            registry: None,
            ..Self::new()
        }
    }

    /// A runtime without in-process implementations.
    pub fn without_passthrough() -> Self {
        Self {
            passthrough: None,
            ..Self::new()
        }
    }

    pub fn registry(&self) -> Option<&Arc<LocalServiceManager>> {
        self.registry.as_ref()
    }

    pub fn passthrough(&self) -> Option<&Arc<LocalServiceManager>> {
        self.passthrough.as_ref()
    }
}

impl Default for LocalRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl HidlRuntime for LocalRuntime {
    fn default_service_manager(&self) -> Option<Arc<dyn ServiceManager>> {
        self.registry
            .clone()
            .map(|manager| manager as Arc<dyn ServiceManager>)
    }

    fn passthrough_service_manager(&self) -> Option<Arc<dyn ServiceManager>> {
        self.passthrough
            .clone()
            .map(|manager| manager as Arc<dyn ServiceManager>)
    }

    fn to_binder(&self, object: &Arc<dyn IBase>) -> Option<Arc<dyn IBinder>> {
        object
            .clone()
            .into_any()
            .downcast::<LocalBinder>()
            .ok()
            .map(|binder| binder as Arc<dyn IBinder>)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const IFOO: &str = "demo.IFoo@1.0";

    /// Echoes the int32 after the token, plus one.
    struct IncrementService;

    impl HidlService for IncrementService {
        fn interface_chain(&self) -> Vec<String> {
            vec![IFOO.to_string(), runtime::HIDL_BASE_DESCRIPTOR.to_string()]
        }

        fn on_transact(
            &mut self,
            code: u32,
            data: &mut Parcel,
            reply: &mut Parcel,
            _flags: TransactionFlags,
        ) -> Result<(), Status> {
            if code != 1 {
                return Err(Status::UNKNOWN_TRANSACTION);
            }
            data.enforce_interface(IFOO).map_err(|e| e.status())?;
            let value = data.read_i32().map_err(|e| e.status())?;
            reply.write_i32(value + 1).map_err(|e| e.status())
        }
    }

    struct CountingRecipient(AtomicBool);

    impl DeathRecipient for CountingRecipient {
        fn service_died(&self, _cookie: u64) {
            self.0.store(true, Ordering::Release);
        }
    }

    fn request(value: i32) -> Vec<u8> {
        let mut p = Parcel::new();
        p.write_interface_token(IFOO).unwrap();
        p.write_i32(value).unwrap();
        p.serialize()
    }

    #[test]
    fn test_register_under_whole_chain() {
        let sm = LocalServiceManager::new();
        sm.register("default", Box::new(IncrementService));
        assert!(sm.has_service(IFOO, "default"));
        assert!(sm.has_service(runtime::HIDL_BASE_DESCRIPTOR, "default"));
        assert!(!sm.has_service(IFOO, "other"));
        assert_eq!(sm.len(), 2);
    }

    #[test]
    fn test_transact_dispatch() {
        let sm = LocalServiceManager::new();
        let binder = sm.register("default", Box::new(IncrementService));
        let raw = binder.transact(1, &request(41), 0).unwrap();
        let mut reply = Parcel::from_bytes(&raw).unwrap();
        assert_eq!(reply.read_i32().unwrap(), 42);

        assert_eq!(binder.transact(9, &request(0), 0), Err(Status::UNKNOWN_TRANSACTION));
        assert_eq!(binder.transact(1, &request(0), TransactionFlags::ONEWAY.bits()), Ok(Vec::new()));
    }

    #[test]
    fn test_malformed_request() {
        let sm = LocalServiceManager::new();
        let binder = sm.register("default", Box::new(IncrementService));
        assert_eq!(binder.transact(1, &[1, 2], 0), Err(Status::NOT_ENOUGH_DATA));
    }

    #[test]
    fn test_unregister_kills_and_notifies() {
        let sm = LocalServiceManager::new();
        let binder = sm.register("default", Box::new(IncrementService));
        let recipient = Arc::new(CountingRecipient(AtomicBool::new(false)));
        binder.link_to_death(recipient.clone(), 0).unwrap();
        assert_eq!(binder.death_link_count(), 1);

        assert!(sm.unregister(IFOO, "default"));
        assert!(sm.is_empty());
        assert!(binder.is_dead());
        assert!(recipient.0.load(Ordering::Acquire));
        assert_eq!(binder.transact(1, &request(1), 0), Err(Status::DEAD_OBJECT));
        assert!(binder.link_to_death(recipient, 0).is_err());
        assert!(!sm.unregister(IFOO, "default"));
    }

    #[test]
    fn test_unlink() {
        let sm = LocalServiceManager::new();
        let binder = sm.register("default", Box::new(IncrementService));
        let recipient: Arc<dyn DeathRecipient> = Arc::new(CountingRecipient(AtomicBool::new(false)));
        binder.link_to_death(recipient.clone(), 5).unwrap();
        assert!(binder.unlink_to_death(&recipient).is_ok());
        assert_eq!(binder.unlink_to_death(&recipient), Err(Status::NAME_NOT_FOUND));
    }

    #[test]
    fn test_manifest() {
        let sm = LocalServiceManager::new();
        assert_eq!(sm.get_transport(IFOO, "default"), Ok(runtime::manifest::EMPTY));
        sm.declare_transport(IFOO, "default", TransportKind::InProcess);
        assert_eq!(sm.get_transport(IFOO, "default"), Ok(runtime::manifest::PASSTHROUGH));
    }

    #[test]
    fn test_runtime_to_binder() {
        let rt = LocalRuntime::new();
        let passthrough = rt.passthrough().unwrap();
        passthrough.register("default", Box::new(IncrementService));
        let base = passthrough.get(IFOO, "default").unwrap().unwrap();
        assert!(rt.to_binder(&base).is_some());
        assert!(LocalRuntime::without_registry().default_service_manager().is_none());
    }
}
