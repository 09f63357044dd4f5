// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use super::{DumpOptions, DumpValue, Flavor, NativeDumps, build};
use crate::recorder::TraceRecorder;

impl TraceRecorder {
    /// Dump tree in JSON flavor: string-valued `pg_status` and, with stack
    /// traces, a shared `all_frames` table referenced by index.
    pub fn dump_json_tree(&self, native: Option<&NativeDumps>, options: DumpOptions) -> DumpValue {
        build(self, native, options, Flavor::Json)
    }

    /// JSON dump as served by the `dump_fr_trace_json` handler.
    ///
    /// Returns an empty string if encoding fails; the failure is logged.
    pub fn dump_json(
        &self,
        native: Option<&NativeDumps>,
        include_collectives: bool,
        only_active: bool,
    ) -> String {
        let options = DumpOptions {
            include_collectives,
            include_stacktraces: false,
            only_active,
        };
        self.dump_json_with(native, options)
    }

    pub fn dump_json_with(&self, native: Option<&NativeDumps>, options: DumpOptions) -> String {
        let tree = self.dump_json_tree(native, options);
        match serde_json::to_string(&tree) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode flight recorder dump as json");
                String::new()
            }
        }
    }
}
