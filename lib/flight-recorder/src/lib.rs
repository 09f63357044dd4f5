// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Collective flight recorder.
//!
//! A bounded ring buffer of every collective and point-to-point operation a
//! rank issued, kept so that a hung or crashed job can be diagnosed after
//! the fact: which collective never completed, which rank fell behind.
//!
//! ```text
//!  issuing thread ── record() ──►┌──────────────┐◄── dump_entries() ── watchdog
//!                                │ TraceRecorder │
//!  work completion ─ retire() ──►└──────┬───────┘
//!                                       │ dump() / dump_json()
//!                     ┌─────────────────┼──────────────────┐
//!                     ▼                 ▼                  ▼
//!              DebugInfoWriter   control-plane handlers   caller
//! ```
//!
//! Recording, retiring and dumping never fail: a disabled recorder returns
//! `None`, a stale retire is logged and dropped, and encoding failures
//! produce an empty payload. They run on watchdog and crash paths where an
//! error would only make things worse.

mod config;
mod entry;
mod marker;
mod recorder;
mod status;

pub mod control_plane;
pub mod dump;
pub mod logging;
pub mod registry;
pub mod traceback;
pub mod writer;

pub use config::{ConfigError, RecorderConfig};
pub use entry::{Entry, EntryState, GroupName, TensorMeta, TensorShape};
pub use marker::{CompletionMarker, DurationProbe, HostMarker, ProbeError};
pub use recorder::{RecordOp, TraceRecorder};
pub use registry::{CommRegistry, NativeDumpSource, dump_debug_info};
pub use status::{GroupStatus, GroupStatusSnapshot};
