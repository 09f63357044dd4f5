// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Device completion markers and the duration probe.

use std::any::Any;
use std::fmt;
use std::sync::OnceLock;
use std::time::Instant;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProbeError {
    /// The end marker has not fired.
    #[error("duration can only be computed after the operation completed")]
    NotCompleted,

    #[error("completion markers are incompatible: {0}")]
    Incompatible(&'static str),

    #[error("device timing query failed: {0}")]
    Device(String),
}

/// Opaque marker recorded on a device stream that fires when all work
/// enqueued before it has finished.
///
/// `query` is called with the recorder lock held and must not block.
/// `elapsed_ms` may be slow (device timing queries) and is only ever called
/// with the lock released.
pub trait CompletionMarker: Send + Sync + fmt::Debug {
    /// Non-blocking completion check.
    fn query(&self) -> bool;

    /// Milliseconds between `self` and a later `end` marker of the same kind.
    fn elapsed_ms(&self, end: &dyn CompletionMarker) -> Result<f32, ProbeError>;

    fn as_any(&self) -> &dyn Any;
}

/// Host-side marker fired explicitly by the owner of the work.
///
/// Used by CPU backends and tests; device backends wrap their own event type.
#[derive(Debug, Default)]
pub struct HostMarker {
    fired: OnceLock<Instant>,
}

impl HostMarker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the work as reached. Later calls keep the first timestamp.
    pub fn fire(&self) {
        let _ = self.fired.set(Instant::now());
    }

    pub fn fired_at(&self) -> Option<Instant> {
        self.fired.get().copied()
    }
}

impl CompletionMarker for HostMarker {
    fn query(&self) -> bool {
        self.fired.get().is_some()
    }

    fn elapsed_ms(&self, end: &dyn CompletionMarker) -> Result<f32, ProbeError> {
        let end = end
            .as_any()
            .downcast_ref::<HostMarker>()
            .ok_or(ProbeError::Incompatible("host marker paired with a device marker"))?;
        match (self.fired_at(), end.fired_at()) {
            (Some(start), Some(end)) => {
                Ok((end.saturating_duration_since(start).as_secs_f64() * 1000.0) as f32)
            }
            _ => Err(ProbeError::NotCompleted),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Elapsed time between two markers bracketing one operation.
pub struct DurationProbe;

impl DurationProbe {
    /// Fails with [`ProbeError::NotCompleted`] unless `end` has fired.
    pub fn duration_ms(
        start: &dyn CompletionMarker,
        end: &dyn CompletionMarker,
    ) -> Result<f32, ProbeError> {
        if !end.query() {
            return Err(ProbeError::NotCompleted);
        }
        start.elapsed_ms(end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Debug)]
    struct ForeignMarker;

    impl CompletionMarker for ForeignMarker {
        fn query(&self) -> bool {
            true
        }

        fn elapsed_ms(&self, _end: &dyn CompletionMarker) -> Result<f32, ProbeError> {
            Ok(0.0)
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_duration_requires_end_marker() {
        let start = HostMarker::new();
        let end = HostMarker::new();
        start.fire();

        assert_eq!(
            DurationProbe::duration_ms(&start, &end),
            Err(ProbeError::NotCompleted)
        );

        std::thread::sleep(Duration::from_millis(2));
        end.fire();
        let ms = DurationProbe::duration_ms(&start, &end).unwrap();
        assert!(ms >= 2.0, "duration {ms}");
    }

    #[test]
    fn test_fire_is_sticky() {
        let marker = HostMarker::new();
        assert!(!marker.query());
        marker.fire();
        let first = marker.fired_at();
        marker.fire();
        assert_eq!(marker.fired_at(), first);
    }

    #[test]
    fn test_mixed_marker_kinds_rejected() {
        let start = HostMarker::new();
        start.fire();
        assert!(matches!(
            DurationProbe::duration_ms(&start, &ForeignMarker),
            Err(ProbeError::Incompatible(_))
        ));
    }
}
