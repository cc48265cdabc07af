// SPDX-FileCopyrightText: 2025 hwbridge contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use thiserror::Error;

use crate::types::BufferHandle;

/// Android `status_t`: 0 is success, errors are negative errno values or
/// offsets from `UNKNOWN_ERROR`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(pub i32);

impl Status {
    pub const OK: Self = Self(0);
    pub const UNKNOWN_ERROR: Self = Self(i32::MIN);
    pub const PERMISSION_DENIED: Self = Self(-1);
    pub const NAME_NOT_FOUND: Self = Self(-2);
    pub const WOULD_BLOCK: Self = Self(-11);
    pub const NO_MEMORY: Self = Self(-12);
    pub const ALREADY_EXISTS: Self = Self(-17);
    pub const NO_INIT: Self = Self(-19);
    pub const BAD_VALUE: Self = Self(-22);
    pub const DEAD_OBJECT: Self = Self(-32);
    pub const INVALID_OPERATION: Self = Self(-38);
    pub const NOT_ENOUGH_DATA: Self = Self(-61);
    pub const UNKNOWN_TRANSACTION: Self = Self(-74);
    pub const BAD_INDEX: Self = Self(-75);
    pub const TIMED_OUT: Self = Self(-110);
    pub const BAD_TYPE: Self = Self(i32::MIN + 1);
    pub const FAILED_TRANSACTION: Self = Self(i32::MIN + 2);
    pub const FDS_NOT_ALLOWED: Self = Self(i32::MIN + 7);

    #[inline]
    pub const fn is_ok(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_error(self) -> bool {
        self.0 != 0
    }

    #[inline]
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Symbolic name, if this is one of the well-known codes.
    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::OK => "OK",
            Self::UNKNOWN_ERROR => "UNKNOWN_ERROR",
            Self::PERMISSION_DENIED => "PERMISSION_DENIED",
            Self::NAME_NOT_FOUND => "NAME_NOT_FOUND",
            Self::WOULD_BLOCK => "WOULD_BLOCK",
            Self::NO_MEMORY => "NO_MEMORY",
            Self::ALREADY_EXISTS => "ALREADY_EXISTS",
            Self::NO_INIT => "NO_INIT",
            Self::BAD_VALUE => "BAD_VALUE",
            Self::DEAD_OBJECT => "DEAD_OBJECT",
            Self::INVALID_OPERATION => "INVALID_OPERATION",
            Self::NOT_ENOUGH_DATA => "NOT_ENOUGH_DATA",
            Self::UNKNOWN_TRANSACTION => "UNKNOWN_TRANSACTION",
            Self::BAD_INDEX => "BAD_INDEX",
            Self::TIMED_OUT => "TIMED_OUT",
            Self::BAD_TYPE => "BAD_TYPE",
            Self::FAILED_TRANSACTION => "FAILED_TRANSACTION",
            Self::FDS_NOT_ALLOWED => "FDS_NOT_ALLOWED",
            _ => return None,
        };
        Some(name)
    }
}

impl std::fmt::Debug for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(name) => write!(f, "Status::{}", name),
            None => write!(f, "Status({})", self.0),
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({})", name, self.0),
            None => write!(f, "status {}", self.0),
        }
    }
}

impl std::error::Error for Status {}

/// Errors surfaced by the parcel and binder layers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HidlError {
    /// Buffer exhausted on read, or storage could not grow on write.
    #[error("parcel {op}: {detail}")]
    Io { op: &'static str, detail: String },

    #[error("buffer length mismatch: expected {expected} bytes, found {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("interface mismatch: expected {expected:?}, found {actual:?}")]
    InvalidInterface { expected: String, actual: String },

    /// An embedded buffer names a parent that is not a committed buffer, or
    /// an offset outside of it.
    #[error("embedded buffer parent {parent} at offset {offset} is not a committed buffer region")]
    BadParent { parent: BufferHandle, offset: usize },

    #[error("{interface}/{instance} not found: {reason}")]
    NotFound {
        interface: String,
        instance: String,
        reason: String,
    },

    /// The central registry cannot be reached. Nothing can be resolved.
    #[error("service registry unreachable while resolving {interface}/{instance}")]
    TransportUnavailable { interface: String, instance: String },

    #[error("{interface}/{instance} is gone (transact code {code})")]
    RemoteGone {
        interface: String,
        instance: String,
        code: u32,
    },

    #[error("transact code {code} on {interface}/{instance} failed: {status}")]
    Transport {
        interface: String,
        instance: String,
        code: u32,
        status: Status,
    },

    #[error("transport for {interface}/{instance} cannot duplicate file descriptors")]
    FdTransferUnsupported { interface: String, instance: String },
}

impl HidlError {
    pub fn io(op: &'static str, detail: impl Into<String>) -> Self {
        Self::Io {
            op,
            detail: detail.into(),
        }
    }

    /// Errors this layer cannot recover from.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::TransportUnavailable { .. })
    }

    /// Status to report back over a transaction.
    pub fn status(&self) -> Status {
        match self {
            Self::Io { .. } => Status::NOT_ENOUGH_DATA,
            Self::LengthMismatch { .. } | Self::BadParent { .. } => Status::BAD_VALUE,
            Self::InvalidInterface { .. } => Status::BAD_TYPE,
            Self::NotFound { .. } => Status::NAME_NOT_FOUND,
            Self::TransportUnavailable { .. } => Status::NO_INIT,
            Self::RemoteGone { .. } => Status::DEAD_OBJECT,
            Self::Transport { status, .. } => *status,
            Self::FdTransferUnsupported { .. } => Status::FDS_NOT_ALLOWED,
        }
    }
}

pub type Result<T, E = HidlError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_names() {
        assert!(Status::OK.is_ok());
        assert!(Status::DEAD_OBJECT.is_error());
        assert_eq!(Status::DEAD_OBJECT.name(), Some("DEAD_OBJECT"));
        assert_eq!(Status(-4242).name(), None);
        assert_eq!(format!("{:?}", Status::BAD_TYPE), "Status::BAD_TYPE");
        assert_eq!(format!("{}", Status(-4242)), "status -4242");
    }

    #[test]
    fn test_only_registry_loss_is_fatal() {
        let fatal = HidlError::TransportUnavailable {
            interface: "a.b@1.0::IFoo".into(),
            instance: "default".into(),
        };
        assert!(fatal.is_fatal());
        assert_eq!(fatal.status(), Status::NO_INIT);

        let gone = HidlError::RemoteGone {
            interface: "a.b@1.0::IFoo".into(),
            instance: "default".into(),
            code: 3,
        };
        assert!(!gone.is_fatal());
        assert_eq!(gone.status(), Status::DEAD_OBJECT);
    }

    #[test]
    fn test_messages_carry_context() {
        let err = HidlError::NotFound {
            interface: "a.b@1.0::IFoo".into(),
            instance: "slot1".into(),
            reason: "no such instance".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("a.b@1.0::IFoo"));
        assert!(msg.contains("slot1"));
    }
}
