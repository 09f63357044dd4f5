// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Glue between live communicators and recorder dumps.

use std::sync::{Arc, Weak};

use dynamo_comm::CommunicatorHandle;
use parking_lot::Mutex;

use crate::dump::{DumpOptions, NativeDumps};
use crate::recorder::TraceRecorder;
use crate::writer::DebugInfoWriter;

/// Supplies native-library diagnostics to place beside the trace.
pub trait NativeDumpSource: Send + Sync {
    /// `None` when there is nothing to report.
    fn native_dumps(&self) -> Option<NativeDumps>;
}

/// Communicators owned by one process, tracked without extending their
/// lifetime.
#[derive(Debug, Default)]
pub struct CommRegistry {
    comms: Mutex<Vec<Weak<CommunicatorHandle>>>,
}

impl CommRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, comm: &Arc<CommunicatorHandle>) {
        let mut comms = self.comms.lock();
        comms.retain(|weak| weak.strong_count() > 0);
        comms.push(Arc::downgrade(comm));
    }

    /// Live communicators, pruning dropped ones.
    pub fn live(&self) -> Vec<Arc<CommunicatorHandle>> {
        let mut comms = self.comms.lock();
        comms.retain(|weak| weak.strong_count() > 0);
        comms.iter().filter_map(Weak::upgrade).collect()
    }
}

impl NativeDumpSource for CommRegistry {
    fn native_dumps(&self) -> Option<NativeDumps> {
        let mut dumps = NativeDumps::new();
        for comm in self.live() {
            match comm.native_dump() {
                Ok(state) if !state.is_empty() => {
                    dumps.insert(comm.comm_id().to_string(), state);
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(
                    comm_id = comm.comm_id(),
                    error = %e,
                    "skipping native dump of communicator"
                ),
            }
        }
        (!dumps.is_empty()).then_some(dumps)
    }
}

/// Write one full binary dump through `writer`.
///
/// Used from watchdog and crash paths; never fails.
pub fn dump_debug_info(
    recorder: &TraceRecorder,
    source: Option<&dyn NativeDumpSource>,
    writer: &dyn DebugInfoWriter,
) {
    let native = source.and_then(NativeDumpSource::native_dumps);
    let payload = recorder.dump(native.as_ref(), DumpOptions::default());
    tracing::info!(
        target_path = %writer.target(),
        bytes = payload.len(),
        "dumping flight recorder debug info"
    );
    writer.write(&payload);
}
