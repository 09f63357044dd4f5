// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Communicator lifecycle management.
//!
//! This crate wraps one native collective-communication context per rank in a
//! [`CommunicatorHandle`] with RAII teardown and explicit abort semantics:
//!
//! - [`CommBackend`]: the seam to the native library (NCCL behind the `nccl`
//!   feature, an in-process double behind the `testing` feature)
//! - [`CommunicatorHandle`]: create/split, nonblocking initialization polling,
//!   idempotent abort, async error checks and segment registration
//! - [`CommBootstrap`]: rank 0 generates the unique id and ships it to peers
//!
//! ```text
//! rank 0: CommBootstrap::generate ──serialize──► ranks 1..N: CommBootstrap::deserialize
//!    │                                                 │
//!    └──────── init_communicator(rank) ◄───────────────┘   (collective)
//! ```

mod backend;
mod bootstrap;
mod comm;
mod config;
mod error;
mod native;

#[cfg(feature = "nccl")]
mod nccl;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use backend::{CommBackend, CommInitConfig, CommInitConfigBuilder, RawComm, SegmentHandle};
pub use bootstrap::CommBootstrap;
pub use comm::{CommunicatorHandle, INIT_POLL_INTERVAL};
pub use config::{CommConfig, ConfigError};
pub use error::{CommError, Result};
pub use native::{NativeResult, UniqueId, error_detail, format_version};

#[cfg(feature = "nccl")]
pub use nccl::NcclBackend;
