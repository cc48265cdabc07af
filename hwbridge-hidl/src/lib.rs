// SPDX-FileCopyrightText: 2025 hwbridge contributors
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod parcel;
pub mod hidl;
pub mod runtime;
pub mod death;
pub mod transport;
pub mod binder;
pub mod passthrough;

pub use binder::{BinderHandle, BinderState, TransactionFlags};
pub use hidl::{Embedded, ParcelExt};
pub use parcel::{NativeHandle, Parcel, Placement};
pub use transport::TransportKind;
