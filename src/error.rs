//! Error taxonomy for the radix sort pipeline.
//!
//! Every error aborts the sort. Configuration errors are raised before any
//! buffer is allocated or any kernel is dispatched; device errors and timeouts
//! can surface mid-pass, in which case the scratch state of the device is not
//! meaningful and the caller has to restart the whole sort.

use std::time::Duration;

use crate::controller::PassState;
use crate::device::{BufferHandle, KernelId};

#[derive(Debug, thiserror::Error)]
pub enum SortError {
    #[error("element count {count} exceeds the supported maximum of {max}")]
    TooManyElements { count: usize, max: usize },
    #[error("workgroup size {workgroup_size} is smaller than the digit count {digit_count}")]
    WorkgroupTooSmall { workgroup_size: u32, digit_count: u32 },
    #[error("radix bits must be in 1..=16, got {0}")]
    InvalidRadixBits(u32),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("buffer allocation of {words} words failed: {reason}")]
    Allocation { words: usize, reason: String },
    #[error("unknown buffer handle {0:?}")]
    InvalidBuffer(BufferHandle),
    #[error("kernel {0:?} has not been loaded")]
    KernelNotLoaded(KernelId),
    #[error("kernel submission failed: {0}")]
    Submission(String),
    #[error("{kernel:?} accesses {buffer:?} without a barrier after its last write")]
    MissingBarrier { kernel: KernelId, buffer: BufferHandle },
    #[error("device lost: {0}")]
    DeviceLost(String),
    #[error("illegal pass transition {from:?} -> {to:?}")]
    IllegalTransition { from: PassState, to: PassState },

    #[error("device did not signal completion within {0:?}")]
    Timeout(Duration),
}

impl SortError {
    /// Whether the error was detected before any device work was issued.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SortError::TooManyElements { .. }
                | SortError::WorkgroupTooSmall { .. }
                | SortError::InvalidRadixBits(_)
                | SortError::InvalidConfig(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SortError>;
