// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use super::{DumpOptions, DumpValue, Flavor, NativeDumps, build};
use crate::recorder::TraceRecorder;

impl TraceRecorder {
    /// Dump tree in structured flavor: integer `pg_status` and nested frame
    /// dicts per entry.
    pub fn dump_tree(&self, native: Option<&NativeDumps>, options: DumpOptions) -> DumpValue {
        build(self, native, options, Flavor::Structured)
    }

    /// Binary dump (MessagePack) as served by the `dump_fr_trace_msgpack`
    /// handler and written by the debug info writer.
    ///
    /// Returns an empty payload if encoding fails; the failure is logged.
    pub fn dump(&self, native: Option<&NativeDumps>, options: DumpOptions) -> Vec<u8> {
        let tree = self.dump_tree(native, options);
        match rmp_serde::to_vec(&tree) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode flight recorder dump");
                Vec::new()
            }
        }
    }
}
