// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Native status codes, version decoding and error interpretation.

use std::fmt::{self, Display, Formatter};

/// Size of the native unique id blob exchanged during bootstrap.
pub const UNIQUE_ID_BYTES: usize = 128;

/// Status code returned by every native call.
///
/// Mirrors the native library's result enumeration. `InProgress` is only
/// produced in nonblocking mode and is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeResult {
    Success,
    UnhandledCudaError,
    SystemError,
    InternalError,
    InvalidArgument,
    InvalidUsage,
    RemoteError,
    InProgress,
    Unknown(i32),
}

impl NativeResult {
    /// Decode a raw native status code.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Success,
            1 => Self::UnhandledCudaError,
            2 => Self::SystemError,
            3 => Self::InternalError,
            4 => Self::InvalidArgument,
            5 => Self::InvalidUsage,
            6 => Self::RemoteError,
            7 => Self::InProgress,
            other => Self::Unknown(other),
        }
    }

    /// Raw native status code.
    pub fn code(&self) -> i32 {
        match self {
            Self::Success => 0,
            Self::UnhandledCudaError => 1,
            Self::SystemError => 2,
            Self::InternalError => 3,
            Self::InvalidArgument => 4,
            Self::InvalidUsage => 5,
            Self::RemoteError => 6,
            Self::InProgress => 7,
            Self::Unknown(code) => *code,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::InProgress)
    }

    /// Short human-readable error string for this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "no error",
            Self::UnhandledCudaError => "unhandled cuda error",
            Self::SystemError => "unhandled system error",
            Self::InternalError => "internal error",
            Self::InvalidArgument => "invalid argument",
            Self::InvalidUsage => "invalid usage",
            Self::RemoteError => "remote process exited or there was a network error",
            Self::InProgress => "operation in progress",
            Self::Unknown(_) => "unknown result code",
        }
    }

    fn interpretation(&self) -> &'static str {
        match self {
            Self::UnhandledCudaError => "UnhandledCudaError: Call to CUDA function failed.",
            Self::SystemError => {
                "SystemError: System call (e.g. socket, malloc) or external library call failed or device error."
            }
            Self::InternalError => "InternalError: Internal check failed.",
            Self::InvalidArgument => "InvalidArgument: Invalid value for an argument.",
            Self::InvalidUsage => {
                "InvalidUsage: This usually reflects invalid usage of the communication library."
            }
            Self::RemoteError => {
                "RemoteError: A call failed possibly due to a network error or a remote process exiting prematurely."
            }
            _ => "Unknown communication library error!",
        }
    }
}

impl Display for NativeResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(code) => write!(f, "{} ({})", self.as_str(), code),
            _ => f.write_str(self.as_str()),
        }
    }
}

/// Build the detail line attached to every native error.
///
/// A failure reason supplied by the owner (e.g. "collective timed out") takes
/// priority over the interpretation of the code, since the owner may have
/// aborted the communicator itself.
pub fn error_detail(
    result: NativeResult,
    failure_reason: Option<&str>,
    last_error: Option<&str>,
) -> String {
    if let Some(reason) = failure_reason {
        return reason.to_string();
    }
    let last = match last_error {
        Some(err) if !err.is_empty() => format!("\nLast error:\n{err}"),
        _ => "\nLast error: Unknown error\n".to_string(),
    };
    format!("{}{}", result.interpretation(), last)
}

/// Decode the library's integer version into `major.minor.patch`.
///
/// The encoding changed at 2.9: older releases use a major base of 1000,
/// newer ones 10000.
pub fn format_version(code: Option<i32>) -> String {
    let code = match code {
        Some(code) if code >= 100 => code,
        _ => return "Unknown version".to_string(),
    };
    let major_base = if code < 2900 { 1000 } else { 10000 };
    let minor_base = 100;
    let major = code / major_base;
    let minor = (code % major_base) / minor_base;
    let patch = code % (major * major_base + minor * minor_base);
    format!("{major}.{minor}.{patch}")
}

/// Opaque identity shared by every rank of one communicator.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniqueId([u8; UNIQUE_ID_BYTES]);

impl UniqueId {
    pub fn from_bytes(bytes: [u8; UNIQUE_ID_BYTES]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; UNIQUE_ID_BYTES] {
        &self.0
    }
}

impl Display for UniqueId {
    /// Hex of the first 16 bytes; enough to tell communicators apart in dumps.
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..16] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for UniqueId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "UniqueId({self})")
    }
}
