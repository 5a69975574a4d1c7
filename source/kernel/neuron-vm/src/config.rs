// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! VM layout knobs and the fixed page/sector geometry.

use static_assertions::const_assert_eq;
use thiserror::Error;

/// Size of a virtual page and of a physical frame in bytes.
pub const PAGE_SIZE: usize = 4096;
/// Size of one swap-device sector in bytes.
pub const SECTOR_SIZE: usize = 512;
/// Number of consecutive sectors forming one swap slot.
pub const SECTORS_PER_SLOT: usize = PAGE_SIZE / SECTOR_SIZE;

const_assert_eq!(PAGE_SIZE % SECTOR_SIZE, 0);
const_assert_eq!(SECTORS_PER_SLOT * SECTOR_SIZE, PAGE_SIZE);

/// Default first kernel virtual address; everything below is user space.
pub const DEFAULT_KERNEL_BASE: usize = 0x80_0400_0000;
/// Default highest user stack address (exclusive).
pub const DEFAULT_USER_STACK_TOP: usize = 0x4748_0000;
/// Default maximum stack size reachable through growth.
pub const DEFAULT_STACK_LIMIT: usize = 1 << 20;
/// Default distance below the stack pointer still accepted as a push.
pub const DEFAULT_STACK_SLACK: usize = 8;

/// Rejected configuration values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Stack growth window is empty.
    #[error("stack limit must be non-zero")]
    ZeroStackLimit,
    /// Stack top does not sit on a page boundary.
    #[error("user stack top {0:#x} is not page aligned")]
    UnalignedStackTop(usize),
    /// Stack top reaches into kernel space.
    #[error("user stack top {top:#x} is above kernel base {kernel_base:#x}")]
    StackInKernel { top: usize, kernel_base: usize },
    /// Stack window extends below address zero.
    #[error("stack limit {0:#x} exceeds the stack top")]
    StackLimitTooLarge(usize),
}

/// Address-space layout used by the fault handler and the mapping checks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct VmConfig {
    /// First kernel virtual address.
    pub kernel_base: usize,
    /// Highest user stack address (exclusive).
    pub user_stack_top: usize,
    /// Absolute ceiling on stack growth, measured down from `user_stack_top`.
    pub stack_limit: usize,
    /// Bytes below the stack pointer that still count as a stack access.
    pub stack_slack: usize,
}

impl VmConfig {
    /// Returns the default layout.
    pub const fn new() -> Self {
        Self {
            kernel_base: DEFAULT_KERNEL_BASE,
            user_stack_top: DEFAULT_USER_STACK_TOP,
            stack_limit: DEFAULT_STACK_LIMIT,
            stack_slack: DEFAULT_STACK_SLACK,
        }
    }

    /// Checks the layout for internal consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stack_limit == 0 {
            return Err(ConfigError::ZeroStackLimit);
        }
        if self.user_stack_top % PAGE_SIZE != 0 {
            return Err(ConfigError::UnalignedStackTop(self.user_stack_top));
        }
        if self.user_stack_top > self.kernel_base {
            return Err(ConfigError::StackInKernel {
                top: self.user_stack_top,
                kernel_base: self.kernel_base,
            });
        }
        if self.stack_limit > self.user_stack_top {
            return Err(ConfigError::StackLimitTooLarge(self.stack_limit));
        }
        Ok(())
    }

    /// Returns true when `va` belongs to the kernel half of the address space.
    pub const fn is_kernel_addr(&self, va: usize) -> bool {
        va >= self.kernel_base
    }

    /// Lowest address the stack may grow down to.
    pub const fn stack_floor(&self) -> usize {
        self.user_stack_top - self.stack_limit
    }

    /// Returns true when a fault at `addr` with stack pointer `rsp` is a stack push.
    pub fn is_stack_access(&self, addr: usize, rsp: usize) -> bool {
        addr >= rsp.saturating_sub(self.stack_slack)
            && addr < self.user_stack_top
            && addr >= self.stack_floor()
    }

    /// Returns true when `[start, start + len)` lies entirely in user space.
    pub fn is_user_range(&self, start: usize, len: usize) -> bool {
        match start.checked_add(len) {
            Some(end) => end <= self.kernel_base,
            None => false,
        }
    }
}

impl Default for VmConfig {
    fn default() -> Self {
        Self::new()
    }
}
