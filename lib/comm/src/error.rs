// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for communicator operations.
//!
//! Communication-library failures are never assumed transient: every variant
//! is surfaced to the caller and nothing here is retried.

use std::time::Duration;

use thiserror::Error;

use crate::native::NativeResult;

/// Errors returned by [`CommunicatorHandle`](crate::CommunicatorHandle) operations.
#[derive(Debug, Error)]
pub enum CommError {
    /// The native library returned a non-success status.
    #[error("{operation} failed: {code}, library version {version}\n{detail}")]
    Native {
        operation: &'static str,
        code: NativeResult,
        version: String,
        detail: String,
    },

    /// A bounded wait (initialization or abort) exceeded its deadline.
    ///
    /// Distinct from [`CommError::Native`]: the operation may still succeed
    /// if the caller waits longer.
    #[error("timeout in {operation} after {elapsed:?} (limit {limit:?})")]
    Timeout {
        operation: &'static str,
        elapsed: Duration,
        limit: Duration,
    },

    /// The handle was already aborted; its native handle is gone.
    #[error("communicator was aborted on rank {rank}.{}", reason_suffix(.reason))]
    Aborted { rank: i32, reason: Option<String> },

    #[error("segment with ptr {ptr:#x} has already been registered on communicator {comm_id}")]
    DuplicateRegistration { ptr: usize, comm_id: String },

    #[error("segment with ptr {ptr:#x} is not registered on communicator {comm_id}")]
    NotRegistered { ptr: usize, comm_id: String },

    /// The native library lacks the requested capability.
    #[error("{0} is not supported by the native communication library")]
    Unsupported(&'static str),

    #[error("rank {rank} is invalid for world size {world_size}")]
    InvalidRank { rank: i32, world_size: i32 },

    #[error("invalid bootstrap data: {0}")]
    InvalidBootstrap(String),
}

fn reason_suffix(reason: &Option<String>) -> String {
    match reason {
        Some(reason) => format!(" Original reason for failure was: {reason}"),
        None => String::new(),
    }
}

impl CommError {
    /// `true` when the error came from a bounded wait and may clear with time.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }

    /// The native status code, when the error came from the library.
    pub fn native_code(&self) -> Option<NativeResult> {
        match self {
            Self::Native { code, .. } => Some(*code),
            _ => None,
        }
    }
}

pub type Result<T, E = CommError> = std::result::Result<T, E>;
