// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! NCCL backend over cudarc's raw bindings.
//!
//! Nonblocking initialization needs an `ncclConfig_t` built with the
//! library's initializer macro, which the raw bindings do not expose; a
//! nonblocking request is logged and served in blocking mode. Upstream NCCL
//! has no public dump entry point, so native dumps are empty.

use std::ffi::{CStr, c_char, c_void};
use std::mem::MaybeUninit;
use std::ptr;

use cudarc::nccl::sys::{
    ncclComm_t, ncclCommAbort, ncclCommDeregister, ncclCommGetAsyncError, ncclCommInitRank,
    ncclCommRegister, ncclCommSplit, ncclGetLastError, ncclGetUniqueId, ncclGetVersion,
    ncclResult_t, ncclUniqueId,
};

use crate::backend::{CommBackend, CommInitConfig, RawComm, SegmentHandle};
use crate::native::{NativeResult, UNIQUE_ID_BYTES, UniqueId};

fn to_native(result: ncclResult_t) -> NativeResult {
    NativeResult::from_code(result as i32)
}

fn check(result: ncclResult_t) -> Result<(), NativeResult> {
    match to_native(result) {
        NativeResult::Success | NativeResult::InProgress => Ok(()),
        code => Err(code),
    }
}

fn as_comm(raw: RawComm) -> ncclComm_t {
    raw.raw() as ncclComm_t
}

/// [`CommBackend`] backed by the system NCCL library.
#[derive(Debug, Default)]
pub struct NcclBackend {
    _private: (),
}

impl NcclBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

// SAFETY: the backend holds no state; every call takes the communicator it
// acts on, and CommunicatorHandle serializes calls per communicator.
unsafe impl Send for NcclBackend {}
unsafe impl Sync for NcclBackend {}

impl CommBackend for NcclBackend {
    fn version_code(&self) -> Option<i32> {
        let mut version = 0;
        // SAFETY: ncclGetVersion writes one c_int
        let result = unsafe { ncclGetVersion(&mut version) };
        check(result).ok().map(|_| version)
    }

    fn unique_id(&self) -> Result<UniqueId, NativeResult> {
        let mut id = MaybeUninit::<ncclUniqueId>::uninit();
        // SAFETY: ncclGetUniqueId initializes the ncclUniqueId struct
        check(unsafe { ncclGetUniqueId(id.as_mut_ptr()) })?;
        // SAFETY: initialized above
        let id = unsafe { id.assume_init() };

        let mut bytes = [0u8; UNIQUE_ID_BYTES];
        for (dst, &src) in bytes.iter_mut().zip(id.internal.iter()) {
            *dst = src as u8;
        }
        Ok(UniqueId::from_bytes(bytes))
    }

    fn init_rank(
        &self,
        world_size: i32,
        rank: i32,
        id: &UniqueId,
        config: &CommInitConfig,
    ) -> Result<RawComm, NativeResult> {
        if !config.blocking {
            tracing::warn!(rank, "nonblocking NCCL init is unavailable; initializing in blocking mode");
        }

        let mut nccl_id = ncclUniqueId {
            internal: [0 as c_char; UNIQUE_ID_BYTES],
        };
        for (dst, &src) in nccl_id.internal.iter_mut().zip(id.as_bytes().iter()) {
            *dst = src as c_char;
        }

        let mut comm = MaybeUninit::<ncclComm_t>::uninit();
        // SAFETY: collective call; every rank passes the same id
        check(unsafe { ncclCommInitRank(comm.as_mut_ptr(), world_size, nccl_id, rank) })?;
        // SAFETY: initialized above
        let comm = unsafe { comm.assume_init() };
        Ok(RawComm::from_raw(comm as usize))
    }

    fn split(
        &self,
        parent: RawComm,
        color: i32,
        key: i32,
        _config: &CommInitConfig,
    ) -> Result<RawComm, NativeResult> {
        let mut child = MaybeUninit::<ncclComm_t>::uninit();
        // SAFETY: parent is a live communicator owned by the caller; a null
        // config inherits the parent's settings
        check(unsafe {
            ncclCommSplit(
                as_comm(parent),
                color,
                key,
                child.as_mut_ptr(),
                ptr::null_mut(),
            )
        })?;
        // SAFETY: initialized above
        let child = unsafe { child.assume_init() };
        Ok(RawComm::from_raw(child as usize))
    }

    fn async_error(&self, comm: RawComm) -> Result<NativeResult, NativeResult> {
        let mut state = MaybeUninit::<ncclResult_t>::uninit();
        // SAFETY: comm is live; the call writes one ncclResult_t
        check(unsafe { ncclCommGetAsyncError(as_comm(comm), state.as_mut_ptr()) })?;
        // SAFETY: initialized above
        Ok(to_native(unsafe { state.assume_init() }))
    }

    fn abort(&self, comm: RawComm) -> NativeResult {
        // SAFETY: comm is live and never used again by the caller
        to_native(unsafe { ncclCommAbort(as_comm(comm)) })
    }

    fn supports_registration(&self) -> bool {
        // registration arrived in 2.19
        self.version_code().is_some_and(|v| v >= 21900)
    }

    fn register_segment(
        &self,
        comm: RawComm,
        ptr: usize,
        size: usize,
    ) -> Result<SegmentHandle, NativeResult> {
        let mut handle: *mut c_void = ptr::null_mut();
        // SAFETY: ptr/size describe device memory owned by the caller
        check(unsafe { ncclCommRegister(as_comm(comm), ptr as *mut c_void, size, &mut handle) })?;
        Ok(SegmentHandle::from_raw(handle as usize))
    }

    fn deregister_segment(&self, comm: RawComm, handle: SegmentHandle) -> NativeResult {
        // SAFETY: handle came from ncclCommRegister on the same comm
        to_native(unsafe { ncclCommDeregister(as_comm(comm), handle.raw() as *mut c_void) })
    }

    fn last_error(&self, comm: Option<RawComm>) -> Option<String> {
        let comm = comm.map(as_comm).unwrap_or(ptr::null_mut());
        // SAFETY: returns a static NUL-terminated string owned by NCCL
        let msg = unsafe { ncclGetLastError(comm) };
        if msg.is_null() {
            return None;
        }
        // SAFETY: non-null, NUL-terminated
        let msg = unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned();
        (!msg.is_empty()).then_some(msg)
    }
}
