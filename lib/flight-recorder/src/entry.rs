// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Traced operation records.

use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::marker::CompletionMarker;
use crate::traceback::CapturedTraceback;

/// Tensor metadata the recorder needs: concrete sizes and element type.
///
/// Implemented by the caller's own tensor type so that extraction only
/// happens once the recorder is known to be enabled.
pub trait TensorShape {
    fn sizes(&self) -> &[i64];

    /// Element type name, e.g. `"float"` or `"int64"`.
    fn dtype_name(&self) -> &str;
}

/// Owned [`TensorShape`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorMeta {
    pub sizes: Vec<i64>,
    pub dtype: String,
}

impl TensorMeta {
    pub fn new(sizes: impl Into<Vec<i64>>, dtype: impl Into<String>) -> Self {
        Self {
            sizes: sizes.into(),
            dtype: dtype.into(),
        }
    }
}

impl TensorShape for TensorMeta {
    fn sizes(&self) -> &[i64] {
        &self.sizes
    }

    fn dtype_name(&self) -> &str {
        &self.dtype
    }
}

/// Process group name and description.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupName {
    pub name: String,
    pub desc: String,
}

impl GroupName {
    pub fn new(name: impl Into<String>, desc: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            desc: desc.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Neither marker observed.
    Scheduled,
    /// Start observed, end not.
    Started,
    Completed,
}

impl EntryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Started => "started",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One traced operation.
///
/// Snapshots returned by [`TraceRecorder::dump_entries`](crate::TraceRecorder::dump_entries)
/// never carry markers; only `duration_ms` and the two discovered timestamps
/// describe completion.
#[derive(Debug, Clone)]
pub struct Entry {
    /// Monotonic record id; `id % capacity` is the slot.
    pub id: usize,
    pub pg_id: usize,
    pub pg_name: GroupName,
    pub collective_seq_id: usize,
    pub p2p_seq_id: usize,
    pub op_id: usize,
    pub profiling_name: String,
    pub traceback: Option<Arc<CapturedTraceback>>,

    pub start: Option<Arc<dyn CompletionMarker>>,
    pub end: Option<Arc<dyn CompletionMarker>>,

    pub time_created_ns: i64,
    pub timeout_ms: i64,
    pub is_p2p: bool,

    pub duration_ms: Option<f32>,
    pub time_discovered_started_ns: Option<i64>,
    pub time_discovered_completed_ns: Option<i64>,

    pub input_dims: Vec<usize>,
    pub input_dtypes: Vec<String>,
    pub output_dims: Vec<usize>,
    pub output_dtypes: Vec<String>,
    /// Input sizes followed by output sizes, flattened.
    pub sizes: Vec<i64>,

    pub retired: bool,
}

impl Entry {
    pub fn state(&self) -> EntryState {
        if self.time_discovered_completed_ns.is_some() {
            EntryState::Completed
        } else if self.time_discovered_started_ns.is_some() {
            EntryState::Started
        } else {
            EntryState::Scheduled
        }
    }

    /// Poll the markers and stamp first-seen start/completion times.
    pub(crate) fn update_state(&mut self) {
        if self.time_discovered_started_ns.is_none()
            && self.start.as_ref().is_some_and(|m| m.query())
        {
            self.time_discovered_started_ns = Some(now_ns());
        }
        if self.time_discovered_completed_ns.is_none()
            && self.end.as_ref().is_some_and(|m| m.query())
        {
            self.time_discovered_completed_ns = Some(now_ns());
        }
    }

    pub(crate) fn clear_markers(&mut self) {
        self.start = None;
        self.end = None;
    }

    /// Per-input size lists rebuilt from the flattened sizes.
    pub fn input_sizes(&self) -> Vec<Vec<i64>> {
        chunk(&self.sizes, &self.input_dims)
    }

    pub fn output_sizes(&self) -> Vec<Vec<i64>> {
        let consumed: usize = self.input_dims.iter().sum();
        chunk(
            self.sizes.get(consumed..).unwrap_or_default(),
            &self.output_dims,
        )
    }
}

/// Split `sizes` into one list per tensor with `dims[i]` elements each.
/// A short `sizes` yields truncated lists rather than a panic.
fn chunk(sizes: &[i64], dims: &[usize]) -> Vec<Vec<i64>> {
    let mut rest = sizes;
    dims.iter()
        .map(|&dim| {
            let (head, tail) = rest.split_at(dim.min(rest.len()));
            rest = tail;
            head.to_vec()
        })
        .collect()
}

/// Wall-clock nanoseconds since the Unix epoch.
pub(crate) fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marker::HostMarker;

    fn entry_with(sizes: Vec<i64>, input_dims: Vec<usize>, output_dims: Vec<usize>) -> Entry {
        Entry {
            id: 0,
            pg_id: 0,
            pg_name: GroupName::new("0", "default_pg"),
            collective_seq_id: 1,
            p2p_seq_id: 0,
            op_id: 1,
            profiling_name: "nccl:all_reduce".to_string(),
            traceback: None,
            start: None,
            end: None,
            time_created_ns: now_ns(),
            timeout_ms: 600_000,
            is_p2p: false,
            duration_ms: None,
            time_discovered_started_ns: None,
            time_discovered_completed_ns: None,
            input_dtypes: vec!["float".to_string(); input_dims.len()],
            output_dtypes: vec!["float".to_string(); output_dims.len()],
            input_dims,
            output_dims,
            sizes,
            retired: false,
        }
    }

    #[test]
    fn test_sizes_rechunked_by_dims() {
        let entry = entry_with(vec![2, 3, 4, 2, 3], vec![2, 1], vec![2]);
        assert_eq!(entry.input_sizes(), vec![vec![2, 3], vec![4]]);
        assert_eq!(entry.output_sizes(), vec![vec![2, 3]]);
    }

    #[test]
    fn test_scalar_tensor_has_empty_sizes() {
        let entry = entry_with(vec![8], vec![0, 1], vec![]);
        assert_eq!(entry.input_sizes(), vec![vec![], vec![8]]);
        assert!(entry.output_sizes().is_empty());
    }

    #[test]
    fn test_short_sizes_truncate() {
        let entry = entry_with(vec![2], vec![2], vec![1]);
        assert_eq!(entry.input_sizes(), vec![vec![2]]);
        assert_eq!(entry.output_sizes(), vec![Vec::<i64>::new()]);
    }

    #[test]
    fn test_state_follows_markers() {
        let start = Arc::new(HostMarker::new());
        let end = Arc::new(HostMarker::new());
        let mut entry = entry_with(vec![], vec![], vec![]);
        entry.start = Some(start.clone());
        entry.end = Some(end.clone());

        entry.update_state();
        assert_eq!(entry.state(), EntryState::Scheduled);

        start.fire();
        entry.update_state();
        assert_eq!(entry.state(), EntryState::Started);
        let started = entry.time_discovered_started_ns;

        end.fire();
        entry.update_state();
        assert_eq!(entry.state(), EntryState::Completed);
        assert_eq!(entry.time_discovered_started_ns, started);
        assert_eq!(entry.state().to_string(), "completed");
    }
}
