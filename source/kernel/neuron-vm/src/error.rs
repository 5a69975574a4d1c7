// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy shared by every VM operation.

use thiserror::Error;

use crate::hal::page_table::MapError;

/// Failures reported by swap and file transfers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum IoError {
    /// The device or file rejected the request.
    #[error("device error")]
    Device,
    /// The request addressed sectors or bytes outside the backing store.
    #[error("transfer out of range")]
    OutOfRange,
    /// Fewer bytes moved than the operation requires.
    #[error("short transfer: expected {expected} bytes, moved {actual}")]
    ShortTransfer { expected: usize, actual: usize },
}

/// Errors surfaced by the VM manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum VmError {
    /// No memory for a descriptor.
    #[error("descriptor allocation failed")]
    AllocationFailure,
    /// Frame pool empty and no evictable victim.
    #[error("out of physical frames")]
    OutOfFrames,
    /// Eviction found no free swap slot.
    #[error("swap space exhausted")]
    SwapExhausted,
    /// Virtual page already tracked by the table.
    #[error("address {0:#x} already occupied")]
    MappingConflict(usize),
    /// No page tracked at the address.
    #[error("no page at {0:#x}")]
    NotMapped(usize),
    /// User access could not be resolved by the fault handler.
    #[error("bad user address {0:#x}")]
    BadAddress(usize),
    /// Arguments supplied by the caller were invalid.
    #[error("invalid arguments")]
    InvalidArgs,
    /// Provided address-space handle was not recognised.
    #[error("invalid address-space handle")]
    InvalidHandle,
    /// Swap or file transfer failed.
    #[error("i/o failure: {0}")]
    Io(IoError),
    /// Address-translation table refused the update.
    #[error("page table: {0}")]
    Map(MapError),
}

impl From<IoError> for VmError {
    fn from(value: IoError) -> Self {
        Self::Io(value)
    }
}

impl From<MapError> for VmError {
    fn from(value: MapError) -> Self {
        Self::Map(value)
    }
}
