// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The trace ring buffer.
//!
//! One `parking_lot::Mutex` guards the ring and the group tables. Stack
//! capture and tensor metadata extraction happen before the lock is taken;
//! duration queries happen with it released and are committed only if the
//! slot still holds the same id.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::RecorderConfig;
use crate::entry::{Entry, GroupName, TensorMeta, TensorShape, now_ns};
use crate::marker::{CompletionMarker, DurationProbe};
use crate::status::{GroupStatus, GroupStatusSnapshot};
use crate::traceback::CapturedTraceback;

/// Arguments to [`TraceRecorder::record`].
///
/// ```rust,ignore
/// let id = recorder.record(
///     RecordOp::new(pg_id, &pg_name, &status, "nccl:all_reduce")
///         .with_tensors(&inputs, &outputs)
///         .with_markers(Some(start), Some(end))
///         .with_seq(collective_seq, p2p_seq, op_id),
/// );
/// ```
#[derive(Debug)]
pub struct RecordOp<'a, T: TensorShape = TensorMeta> {
    pub pg_id: usize,
    pub pg_name: &'a GroupName,
    pub group_status: &'a Arc<GroupStatus>,
    pub collective_seq_id: usize,
    pub p2p_seq_id: usize,
    pub op_id: usize,
    pub profiling_name: &'a str,
    pub inputs: &'a [T],
    pub outputs: &'a [T],
    pub start: Option<Arc<dyn CompletionMarker>>,
    pub end: Option<Arc<dyn CompletionMarker>>,
    pub timeout: Duration,
    pub is_p2p: bool,
}

impl<'a> RecordOp<'a, TensorMeta> {
    pub fn new(
        pg_id: usize,
        pg_name: &'a GroupName,
        group_status: &'a Arc<GroupStatus>,
        profiling_name: &'a str,
    ) -> Self {
        Self {
            pg_id,
            pg_name,
            group_status,
            collective_seq_id: 0,
            p2p_seq_id: 0,
            op_id: 0,
            profiling_name,
            inputs: &[],
            outputs: &[],
            start: None,
            end: None,
            timeout: Duration::ZERO,
            is_p2p: false,
        }
    }
}

impl<'a, T: TensorShape> RecordOp<'a, T> {
    pub fn with_tensors<U: TensorShape>(
        self,
        inputs: &'a [U],
        outputs: &'a [U],
    ) -> RecordOp<'a, U> {
        RecordOp {
            pg_id: self.pg_id,
            pg_name: self.pg_name,
            group_status: self.group_status,
            collective_seq_id: self.collective_seq_id,
            p2p_seq_id: self.p2p_seq_id,
            op_id: self.op_id,
            profiling_name: self.profiling_name,
            inputs,
            outputs,
            start: self.start,
            end: self.end,
            timeout: self.timeout,
            is_p2p: self.is_p2p,
        }
    }

    pub fn with_seq(mut self, collective_seq_id: usize, p2p_seq_id: usize, op_id: usize) -> Self {
        self.collective_seq_id = collective_seq_id;
        self.p2p_seq_id = p2p_seq_id;
        self.op_id = op_id;
        self
    }

    pub fn with_markers(
        mut self,
        start: Option<Arc<dyn CompletionMarker>>,
        end: Option<Arc<dyn CompletionMarker>>,
    ) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn p2p(mut self, is_p2p: bool) -> Self {
        self.is_p2p = is_p2p;
        self
    }
}

#[derive(Debug, Default)]
struct Ring {
    entries: Vec<Entry>,
    /// Overwrite cursor once `entries` is full.
    next_slot: usize,
    next_id: usize,
    group_status: BTreeMap<usize, Arc<GroupStatus>>,
    group_ranks: BTreeMap<GroupName, Vec<u64>>,
}

/// Bounded, thread-safe record of issued operations.
#[derive(Debug)]
pub struct TraceRecorder {
    capacity: usize,
    capture_native_stack: bool,
    ring: Mutex<Ring>,
}

impl TraceRecorder {
    pub fn new(config: &RecorderConfig) -> Self {
        if config.is_enabled() {
            tracing::debug!(
                capacity = config.buffer_size,
                capture_native_stack = config.capture_native_stack,
                "flight recorder enabled"
            );
        }
        Self {
            capacity: config.buffer_size,
            capture_native_stack: config.capture_native_stack,
            ring: Mutex::new(Ring {
                entries: Vec::with_capacity(config.buffer_size),
                ..Ring::default()
            }),
        }
    }

    /// Process-wide recorder built from [`RecorderConfig::global`].
    ///
    /// Never destructed: it must stay usable from crash and exit paths.
    pub fn global() -> &'static Arc<TraceRecorder> {
        static GLOBAL: OnceLock<Arc<TraceRecorder>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(TraceRecorder::new(RecorderConfig::global())))
    }

    pub fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record an operation and return its id, or `None` when disabled.
    pub fn record<T: TensorShape>(&self, op: RecordOp<'_, T>) -> Option<usize> {
        if !self.is_enabled() {
            return None;
        }

        let traceback = self
            .capture_native_stack
            .then(|| Arc::new(CapturedTraceback::capture()));

        let mut input_dims = Vec::with_capacity(op.inputs.len());
        let mut input_dtypes = Vec::with_capacity(op.inputs.len());
        let mut output_dims = Vec::with_capacity(op.outputs.len());
        let mut output_dtypes = Vec::with_capacity(op.outputs.len());
        let mut sizes = Vec::new();
        for input in op.inputs {
            input_dims.push(input.sizes().len());
            input_dtypes.push(input.dtype_name().to_string());
            sizes.extend_from_slice(input.sizes());
        }
        for output in op.outputs {
            output_dims.push(output.sizes().len());
            output_dtypes.push(output.dtype_name().to_string());
            sizes.extend_from_slice(output.sizes());
        }

        let mut ring = self.ring.lock();
        ring.group_status
            .entry(op.pg_id)
            .or_insert_with(|| op.group_status.clone());

        let id = ring.next_id;
        let entry = Entry {
            id,
            pg_id: op.pg_id,
            pg_name: op.pg_name.clone(),
            collective_seq_id: op.collective_seq_id,
            p2p_seq_id: op.p2p_seq_id,
            op_id: op.op_id,
            profiling_name: op.profiling_name.to_string(),
            traceback,
            start: op.start,
            end: op.end,
            time_created_ns: now_ns(),
            timeout_ms: op.timeout.as_millis() as i64,
            is_p2p: op.is_p2p,
            duration_ms: None,
            time_discovered_started_ns: None,
            time_discovered_completed_ns: None,
            input_dims,
            input_dtypes,
            output_dims,
            output_dtypes,
            sizes,
            retired: false,
        };

        if ring.entries.len() < self.capacity {
            ring.entries.push(entry);
        } else {
            let slot = ring.next_slot;
            ring.entries[slot] = entry;
            ring.next_slot = (slot + 1) % self.capacity;
        }
        ring.next_id += 1;

        Some(id)
    }

    /// Mark an entry retired, optionally computing its duration.
    ///
    /// A no-op for `None`, for a disabled recorder, and for an id whose slot
    /// has since been reused.
    pub fn retire(&self, id: Option<usize>, compute_duration: bool) {
        let Some(id) = id else {
            return;
        };
        if !self.is_enabled() {
            return;
        }

        let markers = {
            let mut ring = self.ring.lock();
            let Some(entry) = ring
                .entries
                .get_mut(id % self.capacity)
                .filter(|entry| entry.id == id)
            else {
                tracing::info!(id, "retire skipped; entry was overwritten");
                return;
            };

            entry.update_state();
            let markers = match (&entry.start, &entry.end) {
                (Some(start), Some(end))
                    if compute_duration && entry.time_discovered_completed_ns.is_some() =>
                {
                    Some((start.clone(), end.clone()))
                }
                _ => None,
            };
            entry.retired = true;
            entry.clear_markers();
            markers
        };

        let Some((start, end)) = markers else {
            return;
        };

        // device timing queries can stall; keep the lock free meanwhile
        let duration = match DurationProbe::duration_ms(start.as_ref(), end.as_ref()) {
            Ok(duration) => duration,
            Err(e) => {
                tracing::debug!(id, error = %e, "could not compute duration");
                return;
            }
        };

        let mut ring = self.ring.lock();
        match ring.entries.get_mut(id % self.capacity) {
            Some(entry) if entry.id == id => entry.duration_ms = Some(duration),
            _ => tracing::info!(
                id,
                "retire abandoned; entry was overwritten while computing duration"
            ),
        }
    }

    /// Snapshot of all entries, oldest first.
    ///
    /// Markers are polled first so the discovered timestamps are current;
    /// the snapshots themselves carry no markers.
    pub fn dump_entries(&self) -> Vec<Entry> {
        if !self.is_enabled() {
            return Vec::new();
        }

        let mut ring = self.ring.lock();
        for entry in ring.entries.iter_mut() {
            entry.update_state();
        }

        let (newer, older) = ring.entries.split_at(ring.next_slot);
        let mut result: Vec<Entry> = older.iter().chain(newer.iter()).cloned().collect();
        for entry in result.iter_mut() {
            entry.clear_markers();
        }
        result
    }

    /// Record the participant ranks of a group. Later calls replace earlier ones.
    pub fn record_group_ranks(&self, pg_name: &GroupName, ranks: Vec<u64>) {
        if !self.is_enabled() {
            return;
        }
        self.ring.lock().group_ranks.insert(pg_name.clone(), ranks);
    }

    pub(crate) fn group_ranks(&self) -> Vec<(GroupName, Vec<u64>)> {
        self.ring
            .lock()
            .group_ranks
            .iter()
            .map(|(name, ranks)| (name.clone(), ranks.clone()))
            .collect()
    }

    pub(crate) fn group_status(&self) -> Vec<(usize, GroupStatusSnapshot)> {
        self.ring
            .lock()
            .group_status
            .iter()
            .map(|(pg_id, status)| (*pg_id, status.snapshot()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marker::HostMarker;

    struct Fixture {
        pg_name: GroupName,
        status: Arc<GroupStatus>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                pg_name: GroupName::new("0", "default_pg"),
                status: Arc::new(GroupStatus::new()),
            }
        }

        fn op(&self) -> RecordOp<'_> {
            RecordOp::new(0, &self.pg_name, &self.status, "nccl:all_reduce")
        }
    }

    fn markers() -> (Arc<HostMarker>, Arc<HostMarker>) {
        (Arc::new(HostMarker::new()), Arc::new(HostMarker::new()))
    }

    #[test]
    fn test_ring_keeps_most_recent_in_order() {
        let recorder = TraceRecorder::new(&RecorderConfig::with_capacity(4));
        let fx = Fixture::new();

        let ids: Vec<_> = (0..11).map(|_| recorder.record(fx.op()).unwrap()).collect();
        assert_eq!(ids, (0..11).collect::<Vec<_>>());

        let dumped: Vec<_> = recorder.dump_entries().iter().map(|e| e.id).collect();
        assert_eq!(dumped, vec![7, 8, 9, 10]);
    }

    #[test]
    fn test_ring_below_capacity() {
        let recorder = TraceRecorder::new(&RecorderConfig::with_capacity(8));
        let fx = Fixture::new();
        for _ in 0..3 {
            recorder.record(fx.op());
        }
        let dumped: Vec<_> = recorder.dump_entries().iter().map(|e| e.id).collect();
        assert_eq!(dumped, vec![0, 1, 2]);
    }

    #[test]
    fn test_disabled_recorder_is_noop() {
        let recorder = TraceRecorder::new(&RecorderConfig::default());
        let fx = Fixture::new();

        assert!(!recorder.is_enabled());
        assert_eq!(recorder.record(fx.op()), None);
        recorder.retire(Some(0), true);
        recorder.record_group_ranks(&fx.pg_name, vec![0, 1]);
        assert!(recorder.dump_entries().is_empty());
        assert!(recorder.group_ranks().is_empty());
        assert!(recorder.group_status().is_empty());
    }

    #[test]
    fn test_retire_computes_duration_once() {
        let recorder = TraceRecorder::new(&RecorderConfig::with_capacity(4));
        let fx = Fixture::new();
        let (start, end) = markers();
        let id = recorder.record(fx.op().with_markers(Some(start.clone()), Some(end.clone())));

        start.fire();
        end.fire();
        recorder.retire(id, true);

        let first = recorder.dump_entries().remove(0);
        assert!(first.retired);
        assert!(first.start.is_none() && first.end.is_none());
        let duration = first.duration_ms;
        assert!(duration.is_some());

        recorder.retire(id, true);
        let second = recorder.dump_entries().remove(0);
        assert_eq!(second.duration_ms, duration);
        assert_eq!(
            second.time_discovered_completed_ns,
            first.time_discovered_completed_ns
        );
    }

    #[test]
    fn test_retire_without_completion_leaves_duration_empty() {
        let recorder = TraceRecorder::new(&RecorderConfig::with_capacity(4));
        let fx = Fixture::new();
        let (start, end) = markers();
        let id = recorder.record(fx.op().with_markers(Some(start.clone()), Some(end)));

        start.fire();
        recorder.retire(id, true);

        let entry = recorder.dump_entries().remove(0);
        assert!(entry.retired);
        assert!(entry.duration_ms.is_none());
        assert_eq!(entry.state().as_str(), "started");
    }

    #[test]
    fn test_stale_retire_leaves_new_occupant_untouched() {
        let recorder = TraceRecorder::new(&RecorderConfig::with_capacity(2));
        let fx = Fixture::new();
        let stale = recorder.record(fx.op());
        recorder.record(fx.op());
        let (start, end) = markers();
        let occupant = recorder
            .record(fx.op().with_markers(Some(start.clone()), Some(end.clone())))
            .unwrap();
        assert_eq!(occupant % 2, stale.unwrap() % 2);

        start.fire();
        end.fire();
        recorder.retire(stale, true);

        let entry = recorder
            .dump_entries()
            .into_iter()
            .find(|e| e.id == occupant)
            .unwrap();
        assert!(!entry.retired);
        assert!(entry.duration_ms.is_none());

        // occupant still owns its markers and can be retired normally
        recorder.retire(Some(occupant), true);
        let entry = recorder
            .dump_entries()
            .into_iter()
            .find(|e| e.id == occupant)
            .unwrap();
        assert!(entry.retired);
        assert!(entry.duration_ms.is_some());
    }

    /// Start marker whose duration query fills the ring before answering.
    #[derive(Debug)]
    struct OverwritingMarker {
        recorder: Arc<TraceRecorder>,
        pg_name: GroupName,
        status: Arc<GroupStatus>,
    }

    impl CompletionMarker for OverwritingMarker {
        fn query(&self) -> bool {
            true
        }

        fn elapsed_ms(&self, _end: &dyn CompletionMarker) -> Result<f32, crate::ProbeError> {
            // deadlocks if retire still holds the ring lock
            for _ in 0..self.recorder.capacity() {
                self.recorder.record(RecordOp::new(
                    0,
                    &self.pg_name,
                    &self.status,
                    "nccl:all_gather",
                ));
            }
            Ok(1.5)
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    #[test]
    fn test_duration_discarded_when_slot_reused_during_query() {
        let recorder = Arc::new(TraceRecorder::new(&RecorderConfig::with_capacity(2)));
        let fx = Fixture::new();
        let start = Arc::new(OverwritingMarker {
            recorder: recorder.clone(),
            pg_name: fx.pg_name.clone(),
            status: fx.status.clone(),
        });
        let end = Arc::new(HostMarker::new());
        end.fire();

        let id = recorder.record(fx.op().with_markers(Some(start), Some(end)));
        recorder.retire(id, true);

        let entries = recorder.dump_entries();
        assert_eq!(entries.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 2]);
        assert!(entries.iter().all(|e| e.duration_ms.is_none()));
        assert!(entries.iter().all(|e| !e.retired));
    }

    #[test]
    fn test_tensor_metadata_captured() {
        let recorder = TraceRecorder::new(&RecorderConfig::with_capacity(2));
        let fx = Fixture::new();
        let inputs = [
            TensorMeta::new([2, 3], "float"),
            TensorMeta::new([4], "int64"),
        ];
        let outputs = [TensorMeta::new([2, 3], "float")];
        recorder.record(
            fx.op()
                .with_tensors(&inputs, &outputs)
                .with_seq(5, 0, 7)
                .with_timeout(Duration::from_secs(600)),
        );

        let entry = recorder.dump_entries().remove(0);
        assert_eq!(entry.input_sizes(), vec![vec![2, 3], vec![4]]);
        assert_eq!(entry.output_sizes(), vec![vec![2, 3]]);
        assert_eq!(entry.input_dtypes, vec!["float", "int64"]);
        assert_eq!(entry.collective_seq_id, 5);
        assert_eq!(entry.op_id, 7);
        assert_eq!(entry.timeout_ms, 600_000);
        assert!(entry.traceback.is_none());
    }

    #[test]
    fn test_native_stack_capture() {
        let config = RecorderConfig {
            capture_native_stack: true,
            ..RecorderConfig::with_capacity(2)
        };
        let recorder = TraceRecorder::new(&config);
        let fx = Fixture::new();
        recorder.record(fx.op());

        let entry = recorder.dump_entries().remove(0);
        assert!(entry.traceback.is_some_and(|tb| !tb.is_empty()));
    }

    #[test]
    fn test_group_tables() {
        let recorder = TraceRecorder::new(&RecorderConfig::with_capacity(2));
        let fx = Fixture::new();
        fx.status.set_enqueued(3);
        recorder.record(fx.op());
        recorder.record_group_ranks(&fx.pg_name, vec![0, 1]);
        recorder.record_group_ranks(&fx.pg_name, vec![0, 1, 2]);

        assert_eq!(recorder.group_ranks(), vec![(fx.pg_name.clone(), vec![0, 1, 2])]);
        let status = recorder.group_status();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].1.last_enqueued_seq, 3);
        assert_eq!(status[0].1.last_completed_seq, -1);
    }

    #[test]
    fn test_concurrent_record_assigns_unique_ids() {
        let recorder = Arc::new(TraceRecorder::new(&RecorderConfig::with_capacity(64)));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let recorder = recorder.clone();
                std::thread::spawn(move || {
                    let fx = Fixture::new();
                    (0..100)
                        .filter_map(|_| recorder.record(fx.op()))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ids: Vec<_> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..400).collect::<Vec<_>>());

        let dumped: Vec<_> = recorder.dump_entries().iter().map(|e| e.id).collect();
        assert_eq!(dumped, (336..400).collect::<Vec<_>>());
    }
}
