// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! RAII wrapper around one native communicator.
//!
//! All mutable state lives behind a single `parking_lot::Mutex`. The only
//! operations that intentionally block are [`CommunicatorHandle::wait_until_initialized`]
//! (bounded by its timeout) and [`CommunicatorHandle::abort`] (native abort,
//! bounded by the configured timeout in nonblocking mode).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::backend::{CommBackend, CommInitConfig, RawComm, SegmentHandle};
use crate::config::CommConfig;
use crate::error::{CommError, Result};
use crate::native::{NativeResult, UniqueId, error_detail, format_version};

/// Interval between native async-error polls while waiting on a nonblocking
/// init or abort.
pub const INIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug)]
struct CommState {
    /// `None` once aborted.
    raw: Option<RawComm>,
    initialized: bool,
    aborted: bool,
    async_error: NativeResult,
    failure_reason: Option<String>,
    /// ptr -> native registration handle
    segments: HashMap<usize, SegmentHandle>,
}

/// Owned handle to a native communicator for one rank.
///
/// Not `Clone`: the owning process group holds it (typically in an `Arc`)
/// and is the only party allowed to drop it. Dropping a live, initialized
/// handle issues one native abort; it never waits for in-flight work.
pub struct CommunicatorHandle {
    backend: Arc<dyn CommBackend>,
    settings: CommConfig,
    unique_id: Option<UniqueId>,
    comm_id: String,
    rank: i32,
    split_counter: AtomicU64,
    state: Mutex<CommState>,
}

impl CommunicatorHandle {
    /// Blocking creation.
    pub fn create(
        backend: Arc<dyn CommBackend>,
        world_size: i32,
        rank: i32,
        unique_id: UniqueId,
    ) -> Result<Self> {
        Self::create_with_config(
            backend,
            &CommConfig::blocking(),
            world_size,
            rank,
            unique_id,
            None,
        )
    }

    /// Create with explicit settings.
    ///
    /// In nonblocking mode this returns as soon as the library accepts the
    /// request; the handle stays uninitialized until
    /// [`wait_until_initialized`](Self::wait_until_initialized) observes success.
    pub fn create_with_config(
        backend: Arc<dyn CommBackend>,
        settings: &CommConfig,
        world_size: i32,
        rank: i32,
        unique_id: UniqueId,
        init_config: Option<CommInitConfig>,
    ) -> Result<Self> {
        if rank < 0 || rank >= world_size {
            return Err(CommError::InvalidRank { rank, world_size });
        }

        let mut init_config = init_config.unwrap_or_default();
        init_config.blocking = !settings.nonblocking;

        let raw = backend
            .init_rank(world_size, rank, &unique_id, &init_config)
            .map_err(|code| native_error(backend.as_ref(), "communicator init", code, None, None))?;

        let comm_id = unique_id.to_string();
        if settings.nonblocking {
            tracing::info!(rank, world_size, comm_id = %comm_id, "communicator initialization requested in nonblocking mode");
        } else {
            tracing::debug!(rank, world_size, comm_id = %comm_id, "communicator initialized");
        }

        Ok(Self::from_parts(
            backend,
            settings.clone(),
            Some(unique_id),
            comm_id,
            rank,
            raw,
        ))
    }

    fn from_parts(
        backend: Arc<dyn CommBackend>,
        settings: CommConfig,
        unique_id: Option<UniqueId>,
        comm_id: String,
        rank: i32,
        raw: RawComm,
    ) -> Self {
        let initialized = !settings.nonblocking;
        Self {
            backend,
            settings,
            unique_id,
            comm_id,
            rank,
            split_counter: AtomicU64::new(0),
            state: Mutex::new(CommState {
                raw: Some(raw),
                initialized,
                aborted: false,
                async_error: NativeResult::Success,
                failure_reason: None,
                segments: HashMap::new(),
            }),
        }
    }

    /// Split into a child communicator containing the ranks that pass the
    /// same `color`; `rank` orders ranks within the child.
    ///
    /// The parent must be usable: an aborted parent fails with
    /// [`CommError::Aborted`], an uninitialized nonblocking parent is waited on.
    pub fn split(
        &self,
        color: i32,
        rank: i32,
        init_config: Option<CommInitConfig>,
    ) -> Result<CommunicatorHandle> {
        let parent = self.native_handle()?;

        let mut init_config = init_config.unwrap_or_default();
        init_config.blocking = !self.settings.nonblocking;

        let raw = {
            let state = self.state.lock();
            if state.aborted {
                return Err(self.aborted_error(&state));
            }
            self.backend
                .split(parent, color, rank, &init_config)
                .map_err(|code| {
                    native_error(
                        self.backend.as_ref(),
                        "communicator split",
                        code,
                        Some(parent),
                        state.failure_reason.as_deref(),
                    )
                })?
        };

        let index = self.split_counter.fetch_add(1, Ordering::SeqCst);
        let comm_id = format!("{}/split{}", self.comm_id, index);
        tracing::debug!(parent = %self.comm_id, child = %comm_id, color, rank, "split communicator");

        Ok(Self::from_parts(
            self.backend.clone(),
            self.settings.clone(),
            None,
            comm_id,
            rank,
            raw,
        ))
    }

    /// Poll the native async-error state every [`INIT_POLL_INTERVAL`] until
    /// initialization completes or `timeout` elapses.
    ///
    /// A native error other than `InProgress` is returned immediately.
    pub fn wait_until_initialized(&self, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        loop {
            {
                let mut state = self.state.lock();
                if state.initialized {
                    return Ok(());
                }
                let raw = match (state.aborted, state.raw) {
                    (false, Some(raw)) => raw,
                    _ => return Err(self.aborted_error(&state)),
                };
                match self.backend.async_error(raw) {
                    Ok(NativeResult::Success) => {
                        state.initialized = true;
                        tracing::info!(
                            rank = self.rank,
                            comm_id = %self.comm_id,
                            elapsed_ms = start.elapsed().as_millis() as u64,
                            "communicator initialized"
                        );
                        return Ok(());
                    }
                    Ok(NativeResult::InProgress) => {}
                    Ok(code) | Err(code) => {
                        state.async_error = code;
                        return Err(native_error(
                            self.backend.as_ref(),
                            "communicator initialization",
                            code,
                            Some(raw),
                            state.failure_reason.as_deref(),
                        ));
                    }
                }
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(CommError::Timeout {
                    operation: "communicator initialization",
                    elapsed,
                    limit: timeout,
                });
            }
            std::thread::sleep(INIT_POLL_INTERVAL.min(timeout - elapsed));
        }
    }

    /// Abort the communicator. Idempotent.
    ///
    /// Deregisters every segment, then issues the native abort. In nonblocking
    /// mode the abort is polled to completion within the configured timeout.
    /// The handle is marked aborted even when the native call reports failure.
    pub fn abort(&self, reason: Option<&str>) -> Result<()> {
        let mut state = self.state.lock();
        if state.aborted {
            return Ok(());
        }
        let Some(raw) = state.raw else {
            state.aborted = true;
            return Ok(());
        };

        for (ptr, handle) in state.segments.drain() {
            let result = self.backend.deregister_segment(raw, handle);
            if !result.is_success() {
                tracing::warn!(
                    comm_id = %self.comm_id,
                    ptr = format_args!("{ptr:#x}"),
                    error = %result,
                    "failed to deregister segment during abort"
                );
            }
        }

        let result = self.backend.abort(raw);
        let outcome = if !result.is_success() && !result.is_in_progress() {
            Err(native_error(
                self.backend.as_ref(),
                "communicator abort",
                result,
                Some(raw),
                reason.or(state.failure_reason.as_deref()),
            ))
        } else if self.settings.nonblocking {
            self.wait_for_abort(raw)
        } else {
            Ok(())
        };

        state.aborted = true;
        state.raw = None;
        if let Some(reason) = reason {
            state.failure_reason = Some(reason.to_string());
        }
        if state.async_error.is_success() || state.async_error.is_in_progress() {
            state.async_error = NativeResult::SystemError;
        }

        tracing::warn!(
            rank = self.rank,
            comm_id = %self.comm_id,
            reason = state.failure_reason.as_deref().unwrap_or("unspecified"),
            "communicator aborted"
        );

        outcome
    }

    fn wait_for_abort(&self, raw: RawComm) -> Result<()> {
        let limit = self.settings.init_timeout();
        let start = Instant::now();
        loop {
            match self.backend.async_error(raw) {
                Ok(NativeResult::InProgress) => {}
                _ => return Ok(()),
            }
            let elapsed = start.elapsed();
            if elapsed >= limit {
                return Err(CommError::Timeout {
                    operation: "communicator abort",
                    elapsed,
                    limit,
                });
            }
            std::thread::sleep(INIT_POLL_INTERVAL.min(limit - elapsed));
        }
    }

    /// Cached error if one was observed, otherwise a fresh native query.
    ///
    /// Never blocks. `InProgress` is reported but not cached.
    pub fn check_for_error(&self) -> NativeResult {
        let mut state = self.state.lock();
        if !state.async_error.is_success() {
            return state.async_error;
        }
        let Some(raw) = state.raw else {
            return state.async_error;
        };
        let code = match self.backend.async_error(raw) {
            Ok(code) | Err(code) => code,
        };
        if !code.is_success() && !code.is_in_progress() {
            tracing::debug!(comm_id = %self.comm_id, error = %code, "communicator reported async error");
            state.async_error = code;
        }
        code
    }

    /// Register a memory segment with the communicator.
    pub fn register_segment(&self, ptr: usize, size: usize) -> Result<()> {
        let mut state = self.state.lock();
        let raw = self.live_raw(&state)?;
        if !self.backend.supports_registration() {
            return Err(CommError::Unsupported("segment registration"));
        }
        if state.segments.contains_key(&ptr) {
            return Err(CommError::DuplicateRegistration {
                ptr,
                comm_id: self.comm_id.clone(),
            });
        }

        let handle = self
            .backend
            .register_segment(raw, ptr, size)
            .map_err(|code| {
                native_error(
                    self.backend.as_ref(),
                    "segment registration",
                    code,
                    Some(raw),
                    None,
                )
            })?;
        state.segments.insert(ptr, handle);
        tracing::debug!(comm_id = %self.comm_id, ptr = format_args!("{ptr:#x}"), size, "registered segment");
        Ok(())
    }

    /// Deregister a previously registered segment.
    pub fn deregister_segment(&self, ptr: usize) -> Result<()> {
        let mut state = self.state.lock();
        let raw = self.live_raw(&state)?;
        if !self.backend.supports_registration() {
            return Err(CommError::Unsupported("segment deregistration"));
        }
        let Some(handle) = state.segments.get(&ptr).copied() else {
            return Err(CommError::NotRegistered {
                ptr,
                comm_id: self.comm_id.clone(),
            });
        };

        let result = self.backend.deregister_segment(raw, handle);
        if !result.is_success() {
            return Err(native_error(
                self.backend.as_ref(),
                "segment deregistration",
                result,
                Some(raw),
                None,
            ));
        }
        state.segments.remove(&ptr);
        tracing::debug!(comm_id = %self.comm_id, ptr = format_args!("{ptr:#x}"), "deregistered segment");
        Ok(())
    }

    /// The live native handle.
    ///
    /// Fails with [`CommError::Aborted`] after abort. In nonblocking mode an
    /// uninitialized handle is first waited on with the configured timeout.
    pub fn native_handle(&self) -> Result<RawComm> {
        {
            let state = self.state.lock();
            let raw = self.live_raw(&state)?;
            if state.initialized || !self.settings.nonblocking {
                return Ok(raw);
            }
        }

        self.wait_until_initialized(self.settings.init_timeout())?;

        let state = self.state.lock();
        self.live_raw(&state)
    }

    /// Native-library diagnostics for this communicator.
    ///
    /// An aborted handle has no native state left and reports an empty map.
    pub fn native_dump(&self) -> Result<HashMap<String, String>> {
        let state = self.state.lock();
        let raw = match (state.aborted, state.raw) {
            (false, Some(raw)) => raw,
            _ => {
                tracing::debug!(comm_id = %self.comm_id, "skipping native dump of aborted communicator");
                return Ok(HashMap::new());
            }
        };
        self.backend.dump(raw).map_err(|code| {
            native_error(
                self.backend.as_ref(),
                "communicator dump",
                code,
                Some(raw),
                state.failure_reason.as_deref(),
            )
        })
    }

    pub fn comm_id(&self) -> &str {
        &self.comm_id
    }

    pub fn rank(&self) -> i32 {
        self.rank
    }

    /// Unique id this communicator was created from; `None` for split children.
    pub fn unique_id(&self) -> Option<&UniqueId> {
        self.unique_id.as_ref()
    }

    /// Number of children split off this communicator.
    pub fn split_counter(&self) -> u64 {
        self.split_counter.load(Ordering::SeqCst)
    }

    pub fn failure_reason(&self) -> Option<String> {
        self.state.lock().failure_reason.clone()
    }

    /// Record why the owner is about to give up on this communicator.
    pub fn set_failure_reason(&self, reason: impl Into<String>) {
        self.state.lock().failure_reason = Some(reason.into());
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    pub fn is_aborted(&self) -> bool {
        self.state.lock().aborted
    }

    pub fn registered_segments(&self) -> usize {
        self.state.lock().segments.len()
    }

    pub fn settings(&self) -> &CommConfig {
        &self.settings
    }

    fn live_raw(&self, state: &CommState) -> Result<RawComm> {
        match (state.aborted, state.raw) {
            (false, Some(raw)) => Ok(raw),
            _ => Err(self.aborted_error(state)),
        }
    }

    fn aborted_error(&self, state: &CommState) -> CommError {
        CommError::Aborted {
            rank: self.rank,
            reason: state.failure_reason.clone(),
        }
    }
}

fn native_error(
    backend: &dyn CommBackend,
    operation: &'static str,
    code: NativeResult,
    raw: Option<RawComm>,
    failure_reason: Option<&str>,
) -> CommError {
    let last_error = backend.last_error(raw);
    CommError::Native {
        operation,
        code,
        version: format_version(backend.version_code()),
        detail: error_detail(code, failure_reason, last_error.as_deref()),
    }
}

impl Drop for CommunicatorHandle {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if !state.initialized || state.aborted {
            return;
        }
        let Some(raw) = state.raw.take() else {
            return;
        };
        state.aborted = true;

        // abort, never destroy: destroy waits on in-flight work
        let result = self.backend.abort(raw);
        if !result.is_success() && !result.is_in_progress() {
            tracing::error!(
                rank = self.rank,
                comm_id = %self.comm_id,
                error = %result,
                "failed to abort communicator on drop"
            );
        }
    }
}

impl fmt::Debug for CommunicatorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CommunicatorHandle")
            .field("comm_id", &self.comm_id)
            .field("rank", &self.rank)
            .field("initialized", &state.initialized)
            .field("aborted", &state.aborted)
            .field("nonblocking", &self.settings.nonblocking)
            .finish()
    }
}
