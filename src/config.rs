//! Sort configuration and partition planning.

use std::ops::Range;
use std::time::Duration;

use crate::digit;
use crate::error::{Result, SortError};

/// Work items per workgroup.
pub const DEFAULT_WORKGROUP_SIZE: u32 = 1024;
/// Largest workgroup count a single dispatch may address.
pub const DEFAULT_MAX_WORKGROUPS: u32 = 65535;
/// Bits consumed per pass (16 digits, 8 passes for 32-bit keys).
pub const DEFAULT_RADIX_BITS: u32 = 4;
/// Upper bound on the number of keys, from device memory constraints.
pub const DEFAULT_MAX_ELEMENTS: usize = 500_000_000;
/// How long to wait on a pass fence before giving up.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Tunables for the radix sort pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortConfig {
    pub radix_bits: u32,
    pub workgroup_size: u32,
    pub max_workgroups: u32,
    pub max_elements: usize,
    pub wait_timeout: Duration,
    /// Worker threads for the CPU device; `None` uses rayon's default.
    pub threads: Option<usize>,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            radix_bits: DEFAULT_RADIX_BITS,
            workgroup_size: DEFAULT_WORKGROUP_SIZE,
            max_workgroups: DEFAULT_MAX_WORKGROUPS,
            max_elements: DEFAULT_MAX_ELEMENTS,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            threads: None,
        }
    }
}

impl SortConfig {
    /// Set the digit width in bits.
    pub fn with_radix_bits(mut self, radix_bits: u32) -> Self {
        self.radix_bits = radix_bits;
        self
    }

    /// Set the number of work items per workgroup.
    pub fn with_workgroup_size(mut self, workgroup_size: u32) -> Self {
        self.workgroup_size = workgroup_size;
        self
    }

    /// Cap the workgroup count of a single dispatch.
    pub fn with_max_workgroups(mut self, max_workgroups: u32) -> Self {
        self.max_workgroups = max_workgroups;
        self
    }

    /// Set the largest key count a sort accepts.
    pub fn with_max_elements(mut self, max_elements: usize) -> Self {
        self.max_elements = max_elements;
        self
    }

    /// Set how long to wait on each pass fence.
    pub fn with_wait_timeout(mut self, wait_timeout: Duration) -> Self {
        self.wait_timeout = wait_timeout;
        self
    }

    /// Pin the CPU device to `threads` workers.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Number of distinct digit values, `2^radix_bits`.
    pub fn digit_count(&self) -> u32 {
        1 << self.radix_bits
    }

    /// Passes needed to cover a full key.
    pub fn pass_count(&self) -> u32 {
        digit::pass_count(self.radix_bits)
    }

    /// Check the configuration for internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.radix_bits == 0 || self.radix_bits > 16 {
            return Err(SortError::InvalidRadixBits(self.radix_bits));
        }
        if self.workgroup_size < self.digit_count() {
            return Err(SortError::WorkgroupTooSmall {
                workgroup_size: self.workgroup_size,
                digit_count: self.digit_count(),
            });
        }
        if self.max_workgroups == 0 {
            return Err(SortError::InvalidConfig(
                "max_workgroups must be at least 1".to_string(),
            ));
        }
        if self.max_elements > u32::MAX as usize {
            return Err(SortError::InvalidConfig(format!(
                "max_elements {} does not fit a 32-bit index",
                self.max_elements
            )));
        }
        if self.threads == Some(0) {
            return Err(SortError::InvalidConfig(
                "threads must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// How `N` keys are split across workgroups for one sort.
///
/// Every workgroup owns `partition_size = workgroup_size * elements_per_item`
/// consecutive keys. Once `N` would need more workgroups than a dispatch can
/// address, the workgroup count is clamped and each work item takes more keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchLayout {
    pub element_count: u32,
    pub workgroup_size: u32,
    pub workgroup_count: u32,
    pub elements_per_item: u32,
    pub digit_count: u32,
}

impl DispatchLayout {
    /// Split `element_count` keys across workgroups under `config`.
    pub fn plan(element_count: usize, config: &SortConfig) -> Result<Self> {
        if element_count > config.max_elements {
            return Err(SortError::TooManyElements {
                count: element_count,
                max: config.max_elements,
            });
        }
        let n = element_count as u64;
        let wg_size = config.workgroup_size as u64;

        let mut workgroup_count = n.div_ceil(wg_size);
        let mut elements_per_item = 1;
        if workgroup_count > config.max_workgroups as u64 {
            workgroup_count = config.max_workgroups as u64;
            elements_per_item = n.div_ceil(wg_size * workgroup_count);
        }

        Ok(Self {
            element_count: element_count as u32,
            workgroup_size: config.workgroup_size,
            workgroup_count: workgroup_count as u32,
            elements_per_item: elements_per_item as u32,
            digit_count: config.digit_count(),
        })
    }

    /// Keys owned by each workgroup.
    pub fn partition_size(&self) -> usize {
        self.workgroup_size as usize * self.elements_per_item as usize
    }

    /// Length of a per-(partition, digit) scratch table.
    pub fn scratch_len(&self) -> usize {
        self.workgroup_count as usize * self.digit_count as usize
    }

    /// Keys owned by workgroup `group`; empty for trailing groups past `N`.
    pub fn partition_range(&self, group: u32) -> Range<usize> {
        partition_range(group, self.partition_size(), self.element_count as usize)
    }
}

pub(crate) fn partition_range(group: u32, partition_size: usize, n: usize) -> Range<usize> {
    let start = (group as usize).saturating_mul(partition_size).min(n);
    let end = start.saturating_add(partition_size).min(n);
    start..end
}
