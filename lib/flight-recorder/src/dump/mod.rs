// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Dump payloads.
//!
//! Both formats are produced from one canonical ordered tree ([`DumpValue`])
//! so they cannot drift apart. They differ only in two places:
//!
//! | | JSON | structured (MessagePack) |
//! |---|---|---|
//! | `pg_status` values | strings | integers |
//! | stack frames | shared `all_frames` table, per-entry indices | nested frame dicts per entry |

mod json;
mod structured;

use std::collections::{BTreeMap, HashMap};

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

use crate::entry::Entry;
use crate::recorder::TraceRecorder;
use crate::traceback::{Frame, symbolize};

pub const VERSION: &str = "2.4";

pub const VERSION_KEY: &str = "version";
pub const PG_CONFIG_KEY: &str = "pg_config";
pub const PG_STATUS_KEY: &str = "pg_status";
pub const ENTRIES_KEY: &str = "entries";
pub const NCCL_COMM_KEY: &str = "nccl_comm_state";
pub const ALL_FRAMES_KEY: &str = "all_frames";

pub const RECORD_ID_KEY: &str = "record_id";
pub const PG_ID_KEY: &str = "pg_id";
pub const PG_NAME_KEY: &str = "process_group";
pub const COLLECTIVE_SEQ_ID_KEY: &str = "collective_seq_id";
pub const P2P_SEQ_ID_KEY: &str = "p2p_seq_id";
pub const IS_P2P_KEY: &str = "is_p2p";
pub const OP_ID_KEY: &str = "op_id";
pub const PROFILING_NAME_KEY: &str = "profiling_name";
pub const INPUT_SIZES_KEY: &str = "input_sizes";
pub const INPUT_DTYPES_KEY: &str = "input_dtypes";
pub const OUTPUT_SIZES_KEY: &str = "output_sizes";
pub const OUTPUT_DTYPES_KEY: &str = "output_dtypes";
pub const TIME_CREATED_KEY: &str = "time_created_ns";
pub const DURATION_KEY: &str = "duration_ms";
pub const TIMEOUT_KEY: &str = "timeout_ms";
pub const FRAMES_KEY: &str = "frames";
pub const STATE_KEY: &str = "state";
pub const RETIRED_KEY: &str = "retired";
pub const TIME_DISCOVERED_STARTED_KEY: &str = "time_discovered_started_ns";
pub const TIME_DISCOVERED_COMPLETED_KEY: &str = "time_discovered_completed_ns";

pub const FRAME_NAME_KEY: &str = "name";
pub const FRAME_FILENAME_KEY: &str = "filename";
pub const FRAME_LINE_KEY: &str = "line";

/// Native-library diagnostics keyed by communicator id.
pub type NativeDumps = HashMap<String, HashMap<String, String>>;

/// Dump filters. Defaults match the control-plane handler defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumpOptions {
    pub include_collectives: bool,
    pub include_stacktraces: bool,
    /// Skip entries whose completion has been observed.
    pub only_active: bool,
}

impl Default for DumpOptions {
    fn default() -> Self {
        Self {
            include_collectives: true,
            include_stacktraces: true,
            only_active: false,
        }
    }
}

/// Ordered dump tree. Dict keys keep insertion order.
#[derive(Debug, Clone, PartialEq)]
pub enum DumpValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<DumpValue>),
    Dict(Vec<(String, DumpValue)>),
}

impl DumpValue {
    /// Value under `key` when `self` is a dict.
    pub fn get(&self, key: &str) -> Option<&DumpValue> {
        match self {
            Self::Dict(fields) => fields.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[DumpValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<bool> for DumpValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for DumpValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<usize> for DumpValue {
    fn from(value: usize) -> Self {
        Self::Int(value as i64)
    }
}

impl From<&str> for DumpValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for DumpValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl<T: Into<DumpValue>> From<Option<T>> for DumpValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Null)
    }
}

impl<T: Into<DumpValue>> From<Vec<T>> for DumpValue {
    fn from(value: Vec<T>) -> Self {
        Self::List(value.into_iter().map(Into::into).collect())
    }
}

impl Serialize for DumpValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_none(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int(i) => serializer.serialize_i64(*i),
            Self::Float(f) => serializer.serialize_f64(*f),
            Self::Str(s) => serializer.serialize_str(s),
            Self::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Dict(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (key, value) in fields {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}

/// Which encoder the tree is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flavor {
    Json,
    Structured,
}

struct DictBuilder(Vec<(String, DumpValue)>);

impl DictBuilder {
    fn new() -> Self {
        Self(Vec::new())
    }

    fn insert(&mut self, key: &str, value: impl Into<DumpValue>) {
        self.0.push((key.to_string(), value.into()));
    }

    fn build(self) -> DumpValue {
        DumpValue::Dict(self.0)
    }
}

/// Build the full dump tree.
pub(crate) fn build(
    recorder: &TraceRecorder,
    native: Option<&NativeDumps>,
    options: DumpOptions,
    flavor: Flavor,
) -> DumpValue {
    let mut root = DictBuilder::new();
    root.insert(VERSION_KEY, VERSION);
    root.insert(PG_CONFIG_KEY, pg_config(recorder));
    root.insert(PG_STATUS_KEY, pg_status(recorder, flavor));

    if options.include_collectives {
        let (entries, all_frames) = collective_trace(recorder, options, flavor);
        if let Some(all_frames) = all_frames {
            root.insert(ALL_FRAMES_KEY, all_frames);
        }
        root.insert(ENTRIES_KEY, entries);
    }

    if let Some(native) = native.filter(|native| !native.is_empty()) {
        root.insert(NCCL_COMM_KEY, native_state(native));
    }

    root.build()
}

fn ranks_str(ranks: &[u64]) -> String {
    let ranks: Vec<String> = ranks.iter().map(u64::to_string).collect();
    format!("[{}]", ranks.join(", "))
}

fn pg_config(recorder: &TraceRecorder) -> DumpValue {
    let mut config = DictBuilder::new();
    for (pg_name, ranks) in recorder.group_ranks() {
        let mut info = DictBuilder::new();
        info.insert("name", pg_name.name.as_str());
        info.insert("desc", pg_name.desc.as_str());
        info.insert("ranks", ranks_str(&ranks));
        config.insert(&pg_name.name, info.build());
    }
    config.build()
}

fn pg_status(recorder: &TraceRecorder, flavor: Flavor) -> DumpValue {
    let seq = |value: i64| match flavor {
        Flavor::Json => DumpValue::Str(value.to_string()),
        Flavor::Structured => DumpValue::Int(value),
    };

    let mut all = DictBuilder::new();
    for (pg_id, status) in recorder.group_status() {
        let mut info = DictBuilder::new();
        info.insert("last_enqueued_collective", seq(status.last_enqueued_seq));
        info.insert("last_started_collective", seq(status.last_started_seq));
        info.insert("last_completed_collective", seq(status.last_completed_seq));
        all.insert(&pg_id.to_string(), info.build());
    }
    all.build()
}

fn frame_dict(frame: &Frame) -> DumpValue {
    let mut dict = DictBuilder::new();
    dict.insert(FRAME_NAME_KEY, frame.name.as_str());
    dict.insert(FRAME_FILENAME_KEY, frame.filename.as_str());
    dict.insert(FRAME_LINE_KEY, frame.line as i64);
    dict.build()
}

/// Entry list plus, for JSON with stack traces, the shared frame table.
fn collective_trace(
    recorder: &TraceRecorder,
    options: DumpOptions,
    flavor: Flavor,
) -> (DumpValue, Option<DumpValue>) {
    let entries = recorder.dump_entries();

    let symbolized = options
        .include_stacktraces
        .then(|| symbolize(entries.iter().map(|e| e.traceback.as_deref())));
    let frame_table: Option<Vec<DumpValue>> = symbolized
        .as_ref()
        .map(|s| s.all_frames.iter().map(frame_dict).collect());

    let mut list = Vec::with_capacity(entries.len());
    for (idx, entry) in entries.iter().enumerate() {
        if options.only_active && entry.time_discovered_completed_ns.is_some() {
            continue;
        }

        let mut dict = DictBuilder::new();
        if let (Some(symbolized), Some(table)) = (&symbolized, &frame_table) {
            let indices = symbolized
                .tracebacks
                .get(idx)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let frames = match flavor {
                Flavor::Json => indices.iter().map(|&i| DumpValue::from(i)).collect(),
                Flavor::Structured => indices
                    .iter()
                    .filter_map(|&i| table.get(i).cloned())
                    .collect(),
            };
            dict.insert(FRAMES_KEY, DumpValue::List(frames));
        }
        entry_fields(&mut dict, entry);
        list.push(dict.build());
    }

    let all_frames = match flavor {
        Flavor::Json => frame_table.map(DumpValue::List),
        Flavor::Structured => None,
    };
    (DumpValue::List(list), all_frames)
}

fn sizes_value(sizes: Vec<Vec<i64>>) -> DumpValue {
    DumpValue::List(sizes.into_iter().map(DumpValue::from).collect())
}

fn entry_fields(dict: &mut DictBuilder, entry: &Entry) {
    dict.insert(RECORD_ID_KEY, entry.id);
    dict.insert(PG_ID_KEY, entry.pg_id);
    dict.insert(
        PG_NAME_KEY,
        DumpValue::List(vec![
            entry.pg_name.name.as_str().into(),
            entry.pg_name.desc.as_str().into(),
        ]),
    );
    dict.insert(COLLECTIVE_SEQ_ID_KEY, entry.collective_seq_id);
    dict.insert(P2P_SEQ_ID_KEY, entry.p2p_seq_id);
    dict.insert(OP_ID_KEY, entry.op_id);
    dict.insert(PROFILING_NAME_KEY, entry.profiling_name.as_str());
    dict.insert(TIME_CREATED_KEY, entry.time_created_ns);
    if let Some(duration) = entry.duration_ms {
        dict.insert(DURATION_KEY, DumpValue::Float(f64::from(duration)));
    }
    dict.insert(INPUT_SIZES_KEY, sizes_value(entry.input_sizes()));
    dict.insert(INPUT_DTYPES_KEY, entry.input_dtypes.clone());
    dict.insert(OUTPUT_SIZES_KEY, sizes_value(entry.output_sizes()));
    dict.insert(OUTPUT_DTYPES_KEY, entry.output_dtypes.clone());
    dict.insert(STATE_KEY, entry.state().as_str());
    dict.insert(TIME_DISCOVERED_STARTED_KEY, entry.time_discovered_started_ns);
    dict.insert(
        TIME_DISCOVERED_COMPLETED_KEY,
        entry.time_discovered_completed_ns,
    );
    dict.insert(RETIRED_KEY, entry.retired);
    dict.insert(TIMEOUT_KEY, entry.timeout_ms);
    dict.insert(IS_P2P_KEY, entry.is_p2p);
}

/// Native maps sorted by communicator id, then key, for stable output.
fn native_state(native: &NativeDumps) -> DumpValue {
    let sorted: BTreeMap<&String, BTreeMap<&String, &String>> = native
        .iter()
        .map(|(comm, state)| (comm, state.iter().collect()))
        .collect();

    let mut per_comm = DictBuilder::new();
    for (comm, state) in sorted {
        let mut inner = DictBuilder::new();
        for (key, value) in state {
            inner.insert(key, value.as_str());
        }
        per_comm.insert(comm, inner.build());
    }
    per_comm.build()
}
