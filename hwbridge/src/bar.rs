// SPDX-FileCopyrightText: 2025 hwbridge contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! `kaios.test.bar@1.0::IBar` -- demo service and typed client.
//!
//! Transaction codes:
//!   1 = ping() generates (uint32 count)   (one-way when requested)
//!   2 = add(int32 a, int32 b) generates (int32 sum)
//!   3 = echo(string msg) generates (string msg)
//!   4 = move(Position p, int32 dx, int32 dy) generates (Position p)
//!
//! Every reply starts with an int32 status, 0 on success.

use std::sync::Arc;

use hwbridge_common::settings::DEFAULT_INSTANCE;
use hwbridge_common::{BufferHandle, HidlError, Result, Status};
use hwbridge_hidl::passthrough::{HidlService, LocalBinder, LocalRuntime};
use hwbridge_hidl::runtime::HIDL_BASE_DESCRIPTOR;
use hwbridge_hidl::{BinderHandle, Embedded, Parcel, ParcelExt, TransactionFlags, TransportKind};

pub const IBAR: &str = "kaios.test.bar@1.0::IBar";

pub mod code {
    pub const PING: u32 = 1;
    pub const ADD: u32 = 2;
    pub const ECHO: u32 = 3;
    pub const MOVE: u32 = 4;
}

// ── Position ─────────────────────────────────────────────────────────────────

/// `struct Position { int32 x; int32 y; string msg1; string msg2; }`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Position {
    pub x: i32,
    pub y: i32,
    pub msg1: String,
    pub msg2: String,
}

impl Embedded for Position {
    const INLINE_SIZE: usize = 40;

    fn write_inline(&self, out: &mut [u8]) {
        self.x.write_inline(&mut out[0..4]);
        self.y.write_inline(&mut out[4..8]);
        self.msg1.write_inline(&mut out[8..24]);
        self.msg2.write_inline(&mut out[24..40]);
    }

    fn write_embedded(&self, parcel: &mut Parcel, parent: BufferHandle, offset: usize) -> Result<()> {
        parcel.write_embedded(&self.msg1, parent, offset + 8)?;
        parcel.write_embedded(&self.msg2, parent, offset + 24)
    }

    fn read_embedded(inline: &[u8], parcel: &mut Parcel, parent: BufferHandle, offset: usize) -> Result<Self> {
        Ok(Self {
            x: i32::read_embedded(&inline[0..4], parcel, parent, offset)?,
            y: i32::read_embedded(&inline[4..8], parcel, parent, offset + 4)?,
            msg1: parcel.read_embedded(&inline[8..24], parent, offset + 8)?,
            msg2: parcel.read_embedded(&inline[24..40], parent, offset + 24)?,
        })
    }
}

// ── Service ──────────────────────────────────────────────────────────────────

/// In-process IBar implementation.
pub struct BarService {
    pings: u32,
}

impl BarService {
    pub fn new() -> Self {
        Self { pings: 0 }
    }

    fn dispatch(&mut self, code: u32, data: &mut Parcel, reply: &mut Parcel) -> Result<(), Status> {
        data.enforce_interface(IBAR).map_err(|e| e.status())?;

        match code {
            code::PING => {
                self.pings += 1;
                log::debug!("bar: ping #{}", self.pings);
                reply.write_i32(0).map_err(|e| e.status())?;
                reply.write_u32(self.pings).map_err(|e| e.status())
            }

            code::ADD => {
                let a = data.read_i32().map_err(|e| e.status())?;
                let b = data.read_i32().map_err(|e| e.status())?;
                log::debug!("bar: add({}, {})", a, b);
                reply.write_i32(0).map_err(|e| e.status())?;
                reply.write_i32(a.wrapping_add(b)).map_err(|e| e.status())
            }

            code::ECHO => {
                let msg = data.read_hidl_string().map_err(|e| e.status())?;
                log::debug!("bar: echo({:?})", msg);
                reply.write_i32(0).map_err(|e| e.status())?;
                reply.write_hidl_string(&msg).map_err(|e| e.status())?;
                Ok(())
            }

            code::MOVE => {
                let mut pos = data.read_hidl::<Position>().map_err(|e| e.status())?;
                let dx = data.read_i32().map_err(|e| e.status())?;
                let dy = data.read_i32().map_err(|e| e.status())?;
                pos.x = pos.x.wrapping_add(dx);
                pos.y = pos.y.wrapping_add(dy);
                pos.msg2 = format!("moved by ({}, {})", dx, dy);
                reply.write_i32(0).map_err(|e| e.status())?;
                reply.write_hidl(&pos).map_err(|e| e.status())?;
                Ok(())
            }

            _ => {
                log::warn!("bar: unhandled code={}", code);
                Err(Status::UNKNOWN_TRANSACTION)
            }
        }
    }
}

impl Default for BarService {
    fn default() -> Self {
        Self::new()
    }
}

impl HidlService for BarService {
    fn interface_chain(&self) -> Vec<String> {
        vec![IBAR.to_string(), HIDL_BASE_DESCRIPTOR.to_string()]
    }

    fn on_transact(
        &mut self,
        code: u32,
        data: &mut Parcel,
        reply: &mut Parcel,
        _flags: TransactionFlags,
    ) -> Result<(), Status> {
        self.dispatch(code, data, reply)
    }
}

/// Register the demo service as a passthrough implementation and declare it
/// in the registry's manifest.
pub fn install(runtime: &LocalRuntime) -> Option<Arc<LocalBinder>> {
    let registry = runtime.registry()?;
    let passthrough = runtime.passthrough()?;
    registry.declare_transport(IBAR, DEFAULT_INSTANCE, TransportKind::InProcess);
    Some(passthrough.register(DEFAULT_INSTANCE, Box::new(BarService::new())))
}

// ── Client ───────────────────────────────────────────────────────────────────

/// Typed IBar proxy over a [`BinderHandle`].
pub struct BarClient {
    handle: BinderHandle,
    oneway_ping: bool,
}

impl BarClient {
    pub fn new(handle: BinderHandle, oneway_ping: bool) -> Self {
        Self {
            handle,
            oneway_ping,
        }
    }

    pub fn handle(&self) -> &BinderHandle {
        &self.handle
    }

    pub fn is_alive(&self) -> bool {
        self.handle.is_alive()
    }

    fn request(&self) -> Result<Parcel> {
        let mut data = Parcel::new();
        data.write_interface_token(IBAR)?;
        Ok(data)
    }

    fn call(&self, code: u32, data: &Parcel) -> Result<Parcel> {
        let mut reply = self.handle.transact(code, data, TransactionFlags::empty())?;
        let status = reply.read_i32()?;
        if status != 0 {
            return Err(HidlError::Transport {
                interface: self.handle.interface().to_string(),
                instance: self.handle.instance().to_string(),
                code,
                status: Status(status),
            });
        }
        Ok(reply)
    }

    /// Returns the service's ping count, or `None` for a one-way ping.
    pub fn ping(&self) -> Result<Option<u32>> {
        let data = self.request()?;
        if self.oneway_ping {
            self.handle
                .transact(code::PING, &data, TransactionFlags::ONEWAY)?;
            return Ok(None);
        }
        let mut reply = self.call(code::PING, &data)?;
        Ok(Some(reply.read_u32()?))
    }

    pub fn add(&self, a: i32, b: i32) -> Result<i32> {
        let mut data = self.request()?;
        data.write_i32(a)?;
        data.write_i32(b)?;
        self.call(code::ADD, &data)?.read_i32()
    }

    pub fn echo(&self, msg: &str) -> Result<String> {
        let mut data = self.request()?;
        data.write_hidl_string(msg)?;
        self.call(code::ECHO, &data)?.read_hidl_string()
    }

    pub fn move_position(&self, pos: &Position, dx: i32, dy: i32) -> Result<Position> {
        let mut data = self.request()?;
        data.write_hidl(pos)?;
        data.write_i32(dx)?;
        data.write_i32(dy)?;
        self.call(code::MOVE, &data)?.read_hidl()
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn client(oneway_ping: bool) -> (LocalRuntime, BarClient) {
        let rt = LocalRuntime::new();
        install(&rt).unwrap();
        let handle = BinderHandle::query(&rt, IBAR, DEFAULT_INSTANCE)
            .unwrap()
            .unwrap();
        (rt, BarClient::new(handle, oneway_ping))
    }

    #[test]
    fn test_calls() {
        let (_rt, bar) = client(false);
        assert_eq!(bar.ping().unwrap(), Some(1));
        assert_eq!(bar.ping().unwrap(), Some(2));
        assert_eq!(bar.add(20, 22).unwrap(), 42);
        assert_eq!(bar.echo("hello").unwrap(), "hello");
    }

    #[test]
    fn test_move_position() {
        let (_rt, bar) = client(false);
        let pos = Position {
            x: 1,
            y: 2,
            msg1: "origin".into(),
            msg2: String::new(),
        };
        let moved = bar.move_position(&pos, 3, -4).unwrap();
        assert_eq!(moved.x, 4);
        assert_eq!(moved.y, -2);
        assert_eq!(moved.msg1, "origin");
        assert_eq!(moved.msg2, "moved by (3, -4)");
    }

    #[test]
    fn test_oneway_ping() {
        let (_rt, bar) = client(true);
        assert_eq!(bar.ping().unwrap(), None);
    }

    #[test]
    fn test_unknown_code() {
        let (_rt, bar) = client(false);
        let data = bar.request().unwrap();
        let err = bar.call(99, &data).unwrap_err();
        assert_eq!(err.status(), Status::UNKNOWN_TRANSACTION);
    }

    #[test]
    fn test_calls_after_unregister() {
        let (rt, bar) = client(false);
        assert!(rt.passthrough().unwrap().unregister(IBAR, DEFAULT_INSTANCE));
        assert!(!bar.is_alive());
        assert!(matches!(bar.add(1, 1), Err(HidlError::RemoteGone { .. })));
    }
}
