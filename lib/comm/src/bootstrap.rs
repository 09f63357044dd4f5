// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Bootstrap utilities for creating communicators from scratch.
//!
//! Rank 0 generates a unique id, distributes it to the other ranks over any
//! IPC mechanism, and all ranks collectively initialize their communicator.
//!
//! # Example: Multi-process Bootstrap
//!
//! ```rust,ignore
//! use dynamo_comm::{CommBootstrap, CommConfig};
//!
//! let bootstrap = if rank == 0 {
//!     let bootstrap = CommBootstrap::generate(backend.as_ref(), world_size)?;
//!     broadcast_to_peers(bootstrap.serialize());
//!     bootstrap
//! } else {
//!     CommBootstrap::deserialize(&receive_from_rank_0())?
//! };
//!
//! let comm = bootstrap.init_communicator(backend, CommConfig::global(), rank, None)?;
//! ```

use std::sync::Arc;

use crate::backend::{CommBackend, CommInitConfig};
use crate::comm::CommunicatorHandle;
use crate::config::CommConfig;
use crate::error::{CommError, Result};
use crate::native::{UNIQUE_ID_BYTES, UniqueId, error_detail, format_version};

const HEADER_BYTES: usize = 8;

/// Unique id plus world size, as shipped from rank 0 to its peers.
///
/// # Workflow
///
/// 1. Rank 0 calls [`CommBootstrap::generate`] to create the unique id
/// 2. Rank 0 serializes via [`CommBootstrap::serialize`] and sends to other ranks
/// 3. Other ranks deserialize via [`CommBootstrap::deserialize`]
/// 4. All ranks collectively call [`CommBootstrap::init_communicator`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommBootstrap {
    unique_id: UniqueId,
    world_size: usize,
}

impl CommBootstrap {
    /// Generate a new bootstrap on rank 0.
    pub fn generate(backend: &dyn CommBackend, world_size: usize) -> Result<Self> {
        let unique_id = backend.unique_id().map_err(|code| CommError::Native {
            operation: "unique id generation",
            code,
            version: format_version(backend.version_code()),
            detail: error_detail(code, None, backend.last_error(None).as_deref()),
        })?;

        Ok(Self {
            unique_id,
            world_size,
        })
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }

    pub fn unique_id(&self) -> &UniqueId {
        &self.unique_id
    }

    /// Serialize for transmission to other ranks.
    ///
    /// Format: 8 bytes little-endian `u64` world size, then the 128 id bytes.
    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_BYTES + UNIQUE_ID_BYTES);
        bytes.extend_from_slice(&(self.world_size as u64).to_le_bytes());
        bytes.extend_from_slice(self.unique_id.as_bytes());
        bytes
    }

    /// Deserialize a bootstrap received from rank 0.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != HEADER_BYTES + UNIQUE_ID_BYTES {
            return Err(CommError::InvalidBootstrap(format!(
                "expected {} bytes, got {}",
                HEADER_BYTES + UNIQUE_ID_BYTES,
                bytes.len()
            )));
        }

        let (header, id) = bytes.split_at(HEADER_BYTES);
        let header: [u8; HEADER_BYTES] = header
            .try_into()
            .map_err(|_| CommError::InvalidBootstrap("truncated header".to_string()))?;
        let id: [u8; UNIQUE_ID_BYTES] = id
            .try_into()
            .map_err(|_| CommError::InvalidBootstrap("truncated unique id".to_string()))?;

        Ok(Self {
            unique_id: UniqueId::from_bytes(id),
            world_size: u64::from_le_bytes(header) as usize,
        })
    }

    /// Initialize this rank's communicator.
    ///
    /// This is a **collective operation**: every rank must call it with the
    /// same bootstrap data, or initialization never completes.
    pub fn init_communicator(
        &self,
        backend: Arc<dyn CommBackend>,
        settings: &CommConfig,
        rank: usize,
        init_config: Option<CommInitConfig>,
    ) -> Result<CommunicatorHandle> {
        let world_size = i32::try_from(self.world_size).map_err(|_| {
            CommError::InvalidBootstrap(format!("world size {} out of range", self.world_size))
        })?;
        let rank = i32::try_from(rank).map_err(|_| CommError::InvalidRank {
            rank: i32::MAX,
            world_size,
        })?;

        let comm = CommunicatorHandle::create_with_config(
            backend,
            settings,
            world_size,
            rank,
            self.unique_id,
            init_config,
        )?;

        tracing::debug!(
            rank,
            world_size = self.world_size,
            comm_id = comm.comm_id(),
            "communicator bootstrapped"
        );

        Ok(comm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBackend;

    #[test]
    fn test_bootstrap_serialization_roundtrip() {
        let original = CommBootstrap {
            unique_id: UniqueId::from_bytes([42u8; UNIQUE_ID_BYTES]),
            world_size: 4,
        };

        let bytes = original.serialize();
        assert_eq!(bytes.len(), HEADER_BYTES + UNIQUE_ID_BYTES);

        let deserialized = CommBootstrap::deserialize(&bytes).unwrap();
        assert_eq!(deserialized, original);
    }

    #[test]
    fn test_deserialize_invalid_length() {
        let err = CommBootstrap::deserialize(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, CommError::InvalidBootstrap(_)));
    }

    #[test]
    fn test_init_communicator_validates_rank() {
        let backend = Arc::new(MockBackend::new());
        let bootstrap = CommBootstrap::generate(backend.as_ref(), 2).unwrap();

        let err = bootstrap
            .init_communicator(backend.clone(), &CommConfig::blocking(), 2, None)
            .unwrap_err();
        assert!(matches!(err, CommError::InvalidRank { rank: 2, .. }));

        let comm = bootstrap
            .init_communicator(backend, &CommConfig::blocking(), 1, None)
            .unwrap();
        assert_eq!(comm.rank(), 1);
        assert_eq!(comm.unique_id(), Some(bootstrap.unique_id()));
    }
}
