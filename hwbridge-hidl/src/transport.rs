// SPDX-FileCopyrightText: 2025 hwbridge contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Transport resolution: which registry serves `interface/instance`.

use std::sync::Arc;

use hwbridge_common::{HidlError, Result};

use crate::runtime::{manifest, HidlRuntime, ServiceManager};

/// How an interface implementation is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Cross-process over hwbinder.
    SharedMemory,
    /// Loaded into the caller's process.
    InProcess,
    /// The manifest declares neither; resolution continues in-process.
    Unknown,
}

impl TransportKind {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            manifest::HWBINDER => Self::SharedMemory,
            manifest::PASSTHROUGH => Self::InProcess,
            _ => Self::Unknown,
        }
    }

    pub fn raw(self) -> u8 {
        match self {
            Self::SharedMemory => manifest::HWBINDER,
            Self::InProcess => manifest::PASSTHROUGH,
            Self::Unknown => manifest::EMPTY,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::SharedMemory => "hwbinder",
            Self::InProcess => "passthrough",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// The central registry, or [`HidlError::TransportUnavailable`].
pub fn registry(
    runtime: &dyn HidlRuntime,
    interface: &str,
    instance: &str,
) -> Result<Arc<dyn ServiceManager>> {
    runtime.default_service_manager().ok_or_else(|| {
        log::error!("transport: service registry unreachable");
        HidlError::TransportUnavailable {
            interface: interface.to_string(),
            instance: instance.to_string(),
        }
    })
}

/// Ask `registry` for the manifest transport of `interface/instance`.
pub fn query_transport(
    registry: &dyn ServiceManager,
    interface: &str,
    instance: &str,
) -> Result<TransportKind> {
    let raw = registry.get_transport(interface, instance).map_err(|status| {
        HidlError::NotFound {
            interface: interface.to_string(),
            instance: instance.to_string(),
            reason: format!("getTransport failed: {}", status),
        }
    })?;

    let kind = TransportKind::from_raw(raw);
    if kind == TransportKind::Unknown {
        log::warn!(
            "transport: {}/{} declares neither hwbinder nor passthrough (raw {}), trying passthrough",
            interface,
            instance,
            raw
        );
    } else {
        log::debug!("transport: {}/{} uses {}", interface, instance, kind);
    }
    Ok(kind)
}

/// Resolve the transport kind through the runtime's registry.
pub fn resolve_transport(
    runtime: &dyn HidlRuntime,
    interface: &str,
    instance: &str,
) -> Result<TransportKind> {
    let registry = registry(runtime, interface, instance)?;
    query_transport(registry.as_ref(), interface, instance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passthrough::LocalRuntime;
    use crate::runtime::IBase;
    use hwbridge_common::Status;

    struct BrokenRegistry;

    impl ServiceManager for BrokenRegistry {
        fn get_transport(&self, _: &str, _: &str) -> std::result::Result<u8, Status> {
            Err(Status::FAILED_TRANSACTION)
        }

        fn get(&self, _: &str, _: &str) -> std::result::Result<Option<Arc<dyn IBase>>, Status> {
            Err(Status::FAILED_TRANSACTION)
        }
    }

    #[test]
    fn test_raw_values() {
        assert_eq!(TransportKind::from_raw(1), TransportKind::SharedMemory);
        assert_eq!(TransportKind::from_raw(2), TransportKind::InProcess);
        assert_eq!(TransportKind::from_raw(0), TransportKind::Unknown);
        assert_eq!(TransportKind::from_raw(77), TransportKind::Unknown);
        assert_eq!(TransportKind::InProcess.raw(), 2);
    }

    #[test]
    fn test_declared_transport() {
        let rt = LocalRuntime::new();
        let registry = rt.registry().unwrap();
        registry.declare_transport("demo.IFoo@1.0", "default", TransportKind::SharedMemory);
        assert_eq!(
            resolve_transport(&rt, "demo.IFoo@1.0", "default").unwrap(),
            TransportKind::SharedMemory
        );
        // Undeclared pairs warn and continue.
        assert_eq!(
            resolve_transport(&rt, "demo.IFoo@1.0", "other").unwrap(),
            TransportKind::Unknown
        );
    }

    #[test]
    fn test_registry_unreachable_is_fatal() {
        let rt = LocalRuntime::without_registry();
        let err = resolve_transport(&rt, "demo.IFoo@1.0", "default").unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_query_failure_is_not_found() {
        let err = query_transport(&BrokenRegistry, "demo.IFoo@1.0", "default").unwrap_err();
        assert!(matches!(err, HidlError::NotFound { .. }));
        assert!(!err.is_fatal());
    }
}
