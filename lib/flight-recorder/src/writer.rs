// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Destination for crash-path dumps.
//!
//! At most one writer is registered per registry. If none is registered when
//! a dump must be written, a file writer at `<prefix><rank>` is installed.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use thiserror::Error;

use crate::config::RecorderConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WriterError {
    #[error("debug info writer already registered")]
    AlreadyRegistered,
}

/// Sink for one serialized dump. Failures are logged, never returned.
pub trait DebugInfoWriter: Send + Sync + fmt::Debug {
    fn write(&self, payload: &[u8]);

    /// Human-readable destination for log messages.
    fn target(&self) -> String;
}

/// Writes each dump to `<prefix><rank>`, replacing any earlier file.
#[derive(Debug, Clone)]
pub struct FileDebugInfoWriter {
    path: PathBuf,
}

impl FileDebugInfoWriter {
    pub fn new(prefix: &str, rank: i32) -> Self {
        Self {
            path: PathBuf::from(format!("{prefix}{rank}")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DebugInfoWriter for FileDebugInfoWriter {
    fn write(&self, payload: &[u8]) {
        match std::fs::write(&self.path, payload) {
            Ok(()) => tracing::info!(
                path = %self.path.display(),
                bytes = payload.len(),
                "finished writing flight recorder debug info"
            ),
            Err(e) => tracing::error!(
                path = %self.path.display(),
                error = %e,
                "error writing flight recorder debug info"
            ),
        }
    }

    fn target(&self) -> String {
        self.path.display().to_string()
    }
}

/// Register-once holder for the process writer.
#[derive(Debug, Default)]
pub struct WriterRegistry {
    writer: OnceLock<Arc<dyn DebugInfoWriter>>,
}

impl WriterRegistry {
    pub const fn new() -> Self {
        Self {
            writer: OnceLock::new(),
        }
    }

    /// Install `writer`. Fails if a writer (including a lazily created
    /// default) is already installed.
    pub fn register(&self, writer: Arc<dyn DebugInfoWriter>) -> Result<(), WriterError> {
        let target = writer.target();
        self.writer
            .set(writer)
            .map_err(|_| WriterError::AlreadyRegistered)?;
        tracing::debug!(target = %target, "registered debug info writer");
        Ok(())
    }

    pub fn is_registered(&self) -> bool {
        self.writer.get().is_some()
    }

    /// The registered writer, installing a [`FileDebugInfoWriter`] at
    /// `<prefix><rank>` if none is registered yet.
    pub fn get_or_default(&self, rank: i32, prefix: &str) -> Arc<dyn DebugInfoWriter> {
        self.writer
            .get_or_init(|| Arc::new(FileDebugInfoWriter::new(prefix, rank)))
            .clone()
    }

    /// The process-wide registry. Never destructed.
    pub fn global() -> &'static WriterRegistry {
        static GLOBAL: WriterRegistry = WriterRegistry::new();
        &GLOBAL
    }
}

/// Register the process-wide writer.
pub fn register_writer(writer: Arc<dyn DebugInfoWriter>) -> Result<(), WriterError> {
    WriterRegistry::global().register(writer)
}

/// The process-wide writer; defaults to a file under
/// [`RecorderConfig::dump_path_prefix`].
pub fn writer(rank: i32) -> Arc<dyn DebugInfoWriter> {
    WriterRegistry::global().get_or_default(rank, &RecorderConfig::global().dump_path_prefix)
}
