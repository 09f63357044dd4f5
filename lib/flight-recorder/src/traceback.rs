// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Call-stack capture and batch symbolication.
//!
//! Capture only walks the stack and keeps instruction pointers; resolving
//! symbols is far more expensive and is deferred to dump time, where every
//! unique address is resolved once for the whole batch.

use std::collections::HashMap;
use std::ffi::c_void;

/// Unresolved call stack of the thread that recorded an operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedTraceback {
    ips: Vec<usize>,
}

impl CapturedTraceback {
    /// Walk the current thread's stack.
    pub fn capture() -> Self {
        let mut ips = Vec::with_capacity(32);
        backtrace::trace(|frame| {
            ips.push(frame.ip() as usize);
            true
        });
        Self { ips }
    }

    pub fn from_ips(ips: Vec<usize>) -> Self {
        Self { ips }
    }

    pub fn len(&self) -> usize {
        self.ips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ips.is_empty()
    }
}

/// One resolved stack frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub name: String,
    pub filename: String,
    pub line: u32,
}

impl Frame {
    fn unknown() -> Self {
        Self {
            name: "??".to_string(),
            filename: "??".to_string(),
            line: 0,
        }
    }
}

/// Result of [`symbolize`]: a shared frame table plus, per input traceback,
/// indices into that table (outermost call last).
#[derive(Debug, Clone, Default)]
pub struct SymbolizedTracebacks {
    pub all_frames: Vec<Frame>,
    pub tracebacks: Vec<Vec<usize>>,
}

/// Resolve a batch of tracebacks.
///
/// `None` entries (stack capture disabled) produce empty frame lists.
/// Addresses that cannot be resolved yield a `"??"` frame rather than an
/// error. Inlined functions expand one address into several frames.
pub fn symbolize<'a, I>(tracebacks: I) -> SymbolizedTracebacks
where
    I: IntoIterator<Item = Option<&'a CapturedTraceback>>,
{
    let mut result = SymbolizedTracebacks::default();
    let mut resolved: HashMap<usize, Vec<usize>> = HashMap::new();

    for traceback in tracebacks {
        let mut indices = Vec::new();
        for &ip in traceback.map(|tb| tb.ips.as_slice()).unwrap_or_default() {
            let frames = resolved
                .entry(ip)
                .or_insert_with(|| resolve_ip(ip, &mut result.all_frames));
            indices.extend_from_slice(frames);
        }
        result.tracebacks.push(indices);
    }

    result
}

fn resolve_ip(ip: usize, table: &mut Vec<Frame>) -> Vec<usize> {
    let mut indices = Vec::new();
    backtrace::resolve(ip as *mut c_void, |symbol| {
        let frame = Frame {
            name: symbol
                .name()
                .map(|name| name.to_string())
                .unwrap_or_else(|| "??".to_string()),
            filename: symbol
                .filename()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "??".to_string()),
            line: symbol.lineno().unwrap_or(0),
        };
        indices.push(table.len());
        table.push(frame);
    });
    if indices.is_empty() {
        indices.push(table.len());
        table.push(Frame::unknown());
    }
    indices
}
