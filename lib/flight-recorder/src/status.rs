// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicI64, Ordering};

/// Progress of one process group, maintained by its owner.
///
/// The recorder only reports these values; it never derives them. `-1`
/// means nothing has reached that stage yet.
#[derive(Debug)]
pub struct GroupStatus {
    last_enqueued_seq: AtomicI64,
    last_started_seq: AtomicI64,
    last_completed_seq: AtomicI64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupStatusSnapshot {
    pub last_enqueued_seq: i64,
    pub last_started_seq: i64,
    pub last_completed_seq: i64,
}

impl Default for GroupStatus {
    fn default() -> Self {
        Self {
            last_enqueued_seq: AtomicI64::new(-1),
            last_started_seq: AtomicI64::new(-1),
            last_completed_seq: AtomicI64::new(-1),
        }
    }
}

impl GroupStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_enqueued(&self, seq: i64) {
        self.last_enqueued_seq.store(seq, Ordering::Relaxed);
    }

    pub fn set_started(&self, seq: i64) {
        self.last_started_seq.store(seq, Ordering::Relaxed);
    }

    pub fn set_completed(&self, seq: i64) {
        self.last_completed_seq.store(seq, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> GroupStatusSnapshot {
        GroupStatusSnapshot {
            last_enqueued_seq: self.last_enqueued_seq.load(Ordering::Relaxed),
            last_started_seq: self.last_started_seq.load(Ordering::Relaxed),
            last_completed_seq: self.last_completed_seq.load(Ordering::Relaxed),
        }
    }
}
