// SPDX-FileCopyrightText: 2025 hwbridge contributors
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod error;
pub mod settings;
pub mod types;

pub use error::{HidlError, Result, Status};
pub use types::*;
