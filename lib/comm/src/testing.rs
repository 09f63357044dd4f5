// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! In-process [`CommBackend`] double.
//!
//! Counts every native call and lets tests script initialization progress,
//! init failures and abort results without a GPU or a real library.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::backend::{CommBackend, CommInitConfig, RawComm, SegmentHandle};
use crate::native::{NativeResult, UNIQUE_ID_BYTES, UniqueId};

/// Pending-poll count that never resolves.
pub const NEVER: usize = usize::MAX;

#[derive(Debug, Default)]
struct MockComm {
    /// Remaining `async_error` polls that report `InProgress`.
    pending_polls: usize,
    error: Option<NativeResult>,
    aborted: bool,
    segments: HashMap<usize, usize>,
}

/// Scripted native backend for tests.
#[derive(Debug)]
pub struct MockBackend {
    version: Option<i32>,
    init_pending_polls: Mutex<usize>,
    init_failure: Mutex<Option<NativeResult>>,
    abort_result: Mutex<NativeResult>,
    abort_pending_polls: Mutex<usize>,
    registration: bool,
    dump: Mutex<HashMap<String, String>>,
    last_error: Mutex<Option<String>>,

    comms: Mutex<HashMap<usize, MockComm>>,
    next_handle: AtomicUsize,

    pub init_calls: AtomicUsize,
    pub split_calls: AtomicUsize,
    pub abort_calls: AtomicUsize,
    pub async_error_calls: AtomicUsize,
    pub register_calls: AtomicUsize,
    pub deregister_calls: AtomicUsize,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self {
            version: Some(21803),
            init_pending_polls: Mutex::new(0),
            init_failure: Mutex::new(None),
            abort_result: Mutex::new(NativeResult::Success),
            abort_pending_polls: Mutex::new(0),
            registration: true,
            dump: Mutex::new(HashMap::new()),
            last_error: Mutex::new(None),
            comms: Mutex::new(HashMap::new()),
            next_handle: AtomicUsize::new(0x1000),
            init_calls: AtomicUsize::new(0),
            split_calls: AtomicUsize::new(0),
            abort_calls: AtomicUsize::new(0),
            async_error_calls: AtomicUsize::new(0),
            register_calls: AtomicUsize::new(0),
            deregister_calls: AtomicUsize::new(0),
        }
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend without segment registration support.
    pub fn without_registration() -> Self {
        Self {
            registration: false,
            ..Self::default()
        }
    }

    /// Nonblocking inits report `InProgress` for `polls` async-error queries
    /// before succeeding. [`NEVER`] keeps them pending forever.
    pub fn set_init_pending_polls(&self, polls: usize) {
        *self.init_pending_polls.lock() = polls;
    }

    /// Fail every subsequent init and split with `result`.
    pub fn fail_init(&self, result: NativeResult) {
        *self.init_failure.lock() = Some(result);
    }

    /// Status returned by subsequent abort calls.
    pub fn set_abort_result(&self, result: NativeResult) {
        *self.abort_result.lock() = result;
    }

    /// After abort, report `InProgress` for `polls` async-error queries.
    pub fn set_abort_pending_polls(&self, polls: usize) {
        *self.abort_pending_polls.lock() = polls;
    }

    pub fn set_dump(&self, dump: HashMap<String, String>) {
        *self.dump.lock() = dump;
    }

    pub fn set_last_error(&self, message: impl Into<String>) {
        *self.last_error.lock() = Some(message.into());
    }

    /// Inject an asynchronous error on an initialized communicator.
    pub fn inject_async_error(&self, comm: RawComm, result: NativeResult) {
        if let Some(state) = self.comms.lock().get_mut(&comm.raw()) {
            state.error = Some(result);
        }
    }

    /// Segments currently registered with the library for `comm`.
    pub fn registered_segments(&self, comm: RawComm) -> usize {
        self.comms
            .lock()
            .get(&comm.raw())
            .map(|state| state.segments.len())
            .unwrap_or(0)
    }

    pub fn is_aborted(&self, comm: RawComm) -> bool {
        self.comms
            .lock()
            .get(&comm.raw())
            .map(|state| state.aborted)
            .unwrap_or(false)
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn allocate(&self, config: &CommInitConfig) -> Result<RawComm, NativeResult> {
        if let Some(failure) = *self.init_failure.lock() {
            return Err(failure);
        }
        let handle = self.next_handle.fetch_add(0x10, Ordering::SeqCst);
        let pending_polls = if config.blocking {
            0
        } else {
            *self.init_pending_polls.lock()
        };
        self.comms.lock().insert(
            handle,
            MockComm {
                pending_polls,
                ..MockComm::default()
            },
        );
        Ok(RawComm::from_raw(handle))
    }
}

impl CommBackend for MockBackend {
    fn version_code(&self) -> Option<i32> {
        self.version
    }

    fn unique_id(&self) -> Result<UniqueId, NativeResult> {
        let seed = self.next_handle.fetch_add(1, Ordering::SeqCst);
        let mut bytes = [0u8; UNIQUE_ID_BYTES];
        bytes[..8].copy_from_slice(&(seed as u64).to_le_bytes());
        Ok(UniqueId::from_bytes(bytes))
    }

    fn init_rank(
        &self,
        _world_size: i32,
        _rank: i32,
        _id: &UniqueId,
        config: &CommInitConfig,
    ) -> Result<RawComm, NativeResult> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        self.allocate(config)
    }

    fn split(
        &self,
        parent: RawComm,
        _color: i32,
        _key: i32,
        config: &CommInitConfig,
    ) -> Result<RawComm, NativeResult> {
        self.split_calls.fetch_add(1, Ordering::SeqCst);
        if !self.comms.lock().contains_key(&parent.raw()) {
            return Err(NativeResult::InvalidArgument);
        }
        self.allocate(config)
    }

    fn async_error(&self, comm: RawComm) -> Result<NativeResult, NativeResult> {
        self.async_error_calls.fetch_add(1, Ordering::SeqCst);
        let mut comms = self.comms.lock();
        let state = comms
            .get_mut(&comm.raw())
            .ok_or(NativeResult::InvalidArgument)?;
        if state.pending_polls > 0 {
            if state.pending_polls != NEVER {
                state.pending_polls -= 1;
            }
            return Ok(NativeResult::InProgress);
        }
        Ok(state.error.unwrap_or(NativeResult::Success))
    }

    fn abort(&self, comm: RawComm) -> NativeResult {
        self.abort_calls.fetch_add(1, Ordering::SeqCst);
        let mut comms = self.comms.lock();
        match comms.get_mut(&comm.raw()) {
            Some(state) => {
                state.aborted = true;
                state.pending_polls = *self.abort_pending_polls.lock();
                state.segments.clear();
                *self.abort_result.lock()
            }
            None => NativeResult::InvalidArgument,
        }
    }

    fn supports_registration(&self) -> bool {
        self.registration
    }

    fn register_segment(
        &self,
        comm: RawComm,
        ptr: usize,
        size: usize,
    ) -> Result<SegmentHandle, NativeResult> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        let mut comms = self.comms.lock();
        let state = comms
            .get_mut(&comm.raw())
            .ok_or(NativeResult::InvalidArgument)?;
        state.segments.insert(ptr, size);
        Ok(SegmentHandle::from_raw(ptr ^ 0xfeed))
    }

    fn deregister_segment(&self, comm: RawComm, handle: SegmentHandle) -> NativeResult {
        self.deregister_calls.fetch_add(1, Ordering::SeqCst);
        let mut comms = self.comms.lock();
        match comms.get_mut(&comm.raw()) {
            Some(state) => {
                state.segments.remove(&(handle.raw() ^ 0xfeed));
                NativeResult::Success
            }
            None => NativeResult::InvalidArgument,
        }
    }

    fn last_error(&self, _comm: Option<RawComm>) -> Option<String> {
        self.last_error.lock().clone()
    }

    fn dump(&self, comm: RawComm) -> Result<HashMap<String, String>, NativeResult> {
        if !self.comms.lock().contains_key(&comm.raw()) {
            return Err(NativeResult::InvalidArgument);
        }
        Ok(self.dump.lock().clone())
    }
}
