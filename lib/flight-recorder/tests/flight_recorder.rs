// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use dynamo_comm::testing::MockBackend;
use dynamo_comm::{CommBackend, CommBootstrap, CommConfig};
use dynamo_flight_recorder::control_plane::{handle_dump_binary, handle_dump_json};
use dynamo_flight_recorder::dump::DumpOptions;
use dynamo_flight_recorder::registry::{CommRegistry, dump_debug_info};
use dynamo_flight_recorder::writer::FileDebugInfoWriter;
use dynamo_flight_recorder::{
    CompletionMarker, EntryState, GroupName, GroupStatus, HostMarker, RecordOp, RecorderConfig,
    TensorMeta, TraceRecorder,
};
use serde_json::Value;

struct Group {
    name: GroupName,
    status: Arc<GroupStatus>,
}

impl Group {
    fn new() -> Self {
        Self {
            name: GroupName::new("0", "default_pg"),
            status: Arc::new(GroupStatus::new()),
        }
    }

    fn op<'a>(&'a self, name: &'a str) -> RecordOp<'a> {
        RecordOp::new(0, &self.name, &self.status, name)
    }
}

fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn test_collective_lifecycle() {
    let recorder = TraceRecorder::new(&RecorderConfig::with_capacity(8));
    let group = Group::new();
    let start = Arc::new(HostMarker::new());
    let end = Arc::new(HostMarker::new());

    let id = recorder.record(
        group
            .op("nccl:all_reduce")
            .with_seq(1, 0, 1)
            .with_markers(
                Some(start.clone() as Arc<dyn CompletionMarker>),
                Some(end.clone() as Arc<dyn CompletionMarker>),
            ),
    );
    assert_eq!(id, Some(0));

    let entries = recorder.dump_entries();
    assert_eq!(entries[0].state(), EntryState::Scheduled);
    assert!(entries[0].time_discovered_started_ns.is_none());

    start.fire();
    let entries = recorder.dump_entries();
    assert_eq!(entries[0].state(), EntryState::Started);
    assert!(entries[0].time_discovered_started_ns.is_some());
    assert!(entries[0].start.is_none());

    thread::sleep(std::time::Duration::from_millis(2));
    end.fire();
    recorder.retire(id, true);

    let entries = recorder.dump_entries();
    assert_eq!(entries[0].state(), EntryState::Completed);
    assert!(entries[0].retired);
    assert!(entries[0].duration_ms.is_some_and(|d| d >= 0.0));

    let json: Value = serde_json::from_str(&recorder.dump_json(None, true, false)).unwrap();
    let entry = &json["entries"][0];
    assert_eq!(entry["state"], "completed");
    assert_eq!(entry["retired"], true);
    assert!(entry["duration_ms"].is_f64());
    assert!(entry["time_discovered_completed_ns"].is_i64());
}

#[test]
fn test_stale_retire_after_wraparound() {
    let recorder = TraceRecorder::new(&RecorderConfig::with_capacity(2));
    let group = Group::new();

    let first = recorder.record(group.op("nccl:broadcast"));
    for _ in 0..2 {
        recorder.record(group.op("nccl:all_gather"));
    }
    recorder.retire(first, true);

    let entries = recorder.dump_entries();
    assert_eq!(entries.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 2]);
    assert!(entries.iter().all(|e| !e.retired));
}

#[test]
fn test_disabled_recorder_dumps_are_empty() {
    let recorder = TraceRecorder::new(&RecorderConfig::default());
    let group = Group::new();
    assert_eq!(recorder.record(group.op("nccl:all_reduce")), None);

    let json: Value = serde_json::from_str(&recorder.dump_json(None, true, false)).unwrap();
    assert_eq!(json["version"], "2.4");
    assert_eq!(json["entries"], Value::Array(vec![]));
}

#[test]
fn test_tensor_metadata_in_both_formats() {
    let recorder = TraceRecorder::new(&RecorderConfig::with_capacity(4));
    let group = Group::new();
    let inputs = [TensorMeta::new([2, 3], "float"), TensorMeta::new([4], "int64")];
    let outputs = [TensorMeta::new([2, 3], "float")];
    recorder.record(group.op("nccl:all_to_all").with_tensors(&inputs, &outputs));

    let options = DumpOptions {
        include_stacktraces: false,
        ..DumpOptions::default()
    };
    let binary: Value = rmp_serde::from_slice(&recorder.dump(None, options)).unwrap();
    let json: Value = serde_json::from_str(&recorder.dump_json_with(None, options)).unwrap();

    for dump in [&binary, &json] {
        let entry = &dump["entries"][0];
        assert_eq!(entry["input_sizes"], serde_json::json!([[2, 3], [4]]));
        assert_eq!(entry["input_dtypes"], serde_json::json!(["float", "int64"]));
        assert_eq!(entry["output_sizes"], serde_json::json!([[2, 3]]));
        assert_eq!(entry["output_dtypes"], serde_json::json!(["float"]));
    }
    assert_eq!(binary["entries"], json["entries"]);
    assert_eq!(binary["pg_config"], json["pg_config"]);
    assert_eq!(binary["pg_status"]["0"]["last_enqueued_collective"], -1);
    assert_eq!(json["pg_status"]["0"]["last_enqueued_collective"], "-1");
}

#[test]
fn test_concurrent_record_and_dump() {
    let recorder = Arc::new(TraceRecorder::new(&RecorderConfig::with_capacity(16)));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let recorder = recorder.clone();
            thread::spawn(move || {
                let group = Group::new();
                for _ in 0..50 {
                    let id = recorder.record(group.op("nccl:all_reduce"));
                    recorder.retire(id, false);
                    recorder.dump_entries();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let ids: Vec<_> = recorder.dump_entries().iter().map(|e| e.id).collect();
    assert_eq!(ids, (184..200).collect::<Vec<_>>());
}

#[test]
fn test_handler_contract() {
    let recorder = TraceRecorder::new(&RecorderConfig::with_capacity(4));
    let group = Group::new();
    recorder.record(group.op("nccl:all_reduce"));

    assert_eq!(
        handle_dump_binary(&recorder, None, &params(&[("verbose", "true")])).status,
        400
    );
    assert_eq!(
        handle_dump_json(&recorder, None, &params(&[("onlyactive", "maybe")])).status,
        400
    );

    let response = handle_dump_binary(&recorder, None, &[]);
    assert_eq!(response.status, 200);
    let dump: Value = rmp_serde::from_slice(&response.body).unwrap();
    assert_eq!(dump["entries"].as_array().unwrap().len(), 1);
}

#[test]
fn test_debug_info_written_with_native_state() {
    let backend = Arc::new(MockBackend::new());
    backend.set_dump(HashMap::from([("nranks".to_string(), "2".to_string())]));
    let bootstrap = CommBootstrap::generate(backend.as_ref(), 2).unwrap();
    let comm = Arc::new(
        bootstrap
            .init_communicator(backend.clone(), &CommConfig::blocking(), 0, None)
            .unwrap(),
    );
    let registry = CommRegistry::new();
    registry.register(&comm);

    let recorder = TraceRecorder::new(&RecorderConfig::with_capacity(4));
    let group = Group::new();
    recorder.record(group.op("nccl:send").p2p(true));

    let dir = tempfile::tempdir().unwrap();
    let prefix = format!("{}/fr_trace_rank_", dir.path().display());
    let writer = FileDebugInfoWriter::new(&prefix, 1);
    dump_debug_info(&recorder, Some(&registry), &writer);

    let bytes = std::fs::read(dir.path().join("fr_trace_rank_1")).unwrap();
    let dump: Value = rmp_serde::from_slice(&bytes).unwrap();
    assert_eq!(dump["entries"][0]["is_p2p"], true);
    assert_eq!(dump["nccl_comm_state"][comm.comm_id()]["nranks"], "2");
    assert!(backend.version_code().is_some());
}
