// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Seam between [`CommunicatorHandle`](crate::CommunicatorHandle) and the
//! native collective-communication library.

use std::collections::HashMap;
use std::fmt;

use derive_builder::Builder;

use crate::native::{NativeResult, UniqueId};

/// Opaque native communicator handle.
///
/// Stored as `usize` so owners stay `Send`; only a [`CommBackend`] knows how
/// to turn it back into a native pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawComm(usize);

impl RawComm {
    pub fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> usize {
        self.0
    }
}

/// Opaque native handle for a registered memory segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentHandle(usize);

impl SegmentHandle {
    pub fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> usize {
        self.0
    }
}

/// Per-communicator creation options forwarded to the native library.
///
/// `blocking` is overwritten by the handle from the nonblocking setting; the
/// remaining fields are passed through untouched and `None` leaves the
/// library default in place.
#[derive(Debug, Clone, Builder, PartialEq, Eq)]
#[builder(pattern = "owned")]
pub struct CommInitConfig {
    #[builder(default = "true")]
    pub blocking: bool,

    #[builder(default, setter(strip_option))]
    pub cga_cluster_size: Option<i32>,

    #[builder(default, setter(strip_option))]
    pub min_ctas: Option<i32>,

    #[builder(default, setter(strip_option))]
    pub max_ctas: Option<i32>,

    #[builder(default, setter(strip_option, into))]
    pub net_name: Option<String>,

    /// Let split children share resources with their parent.
    #[builder(default)]
    pub split_share: bool,
}

impl Default for CommInitConfig {
    fn default() -> Self {
        Self {
            blocking: true,
            cga_cluster_size: None,
            min_ctas: None,
            max_ctas: None,
            net_name: None,
            split_share: false,
        }
    }
}

impl CommInitConfig {
    pub fn builder() -> CommInitConfigBuilder {
        CommInitConfigBuilder::default()
    }
}

/// Raw native collective-communication API.
///
/// Implementations translate these calls one-to-one onto the library and
/// return its status codes unchanged; all policy (locking, timeouts, abort
/// ordering, error text) lives in [`CommunicatorHandle`](crate::CommunicatorHandle).
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`. The handle serializes calls that
/// touch one communicator behind its own lock, so a backend only needs to be
/// safe for concurrent calls on *different* communicators.
pub trait CommBackend: Send + Sync + fmt::Debug {
    /// Library version as its integer code, `None` if it cannot be queried.
    fn version_code(&self) -> Option<i32>;

    /// Generate a fresh unique id (rank 0 of a new communicator).
    fn unique_id(&self) -> Result<UniqueId, NativeResult>;

    /// Initialize this rank's communicator.
    ///
    /// In nonblocking mode (`config.blocking == false`) the library may
    /// return before initialization completes; implementations return the
    /// allocated handle for both `Success` and `InProgress`.
    fn init_rank(
        &self,
        world_size: i32,
        rank: i32,
        id: &UniqueId,
        config: &CommInitConfig,
    ) -> Result<RawComm, NativeResult>;

    /// Split `parent` into a child communicator for ranks sharing `color`.
    fn split(
        &self,
        parent: RawComm,
        color: i32,
        key: i32,
        config: &CommInitConfig,
    ) -> Result<RawComm, NativeResult>;

    /// Query the asynchronous error state. The outer error reports a failure
    /// of the query itself.
    fn async_error(&self, comm: RawComm) -> Result<NativeResult, NativeResult>;

    /// Abort outstanding work and release the communicator. Never waits for
    /// in-flight operations; may return `InProgress` in nonblocking mode.
    fn abort(&self, comm: RawComm) -> NativeResult;

    /// Whether [`register_segment`](Self::register_segment) is available.
    fn supports_registration(&self) -> bool;

    fn register_segment(
        &self,
        comm: RawComm,
        ptr: usize,
        size: usize,
    ) -> Result<SegmentHandle, NativeResult>;

    fn deregister_segment(&self, comm: RawComm, handle: SegmentHandle) -> NativeResult;

    /// Most recent human-readable error recorded by the library.
    fn last_error(&self, comm: Option<RawComm>) -> Option<String>;

    /// Library-level diagnostic key/value state for one communicator.
    ///
    /// Libraries without a dump facility report an empty map.
    fn dump(&self, _comm: RawComm) -> Result<HashMap<String, String>, NativeResult> {
        Ok(HashMap::new())
    }
}
