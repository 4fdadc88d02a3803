//! Kernels for the four stages of a radix pass.
//!
//! A kernel runs once per workgroup. Workgroups of the same dispatch never
//! share mutable state: each one reads and writes only the scratch rows keyed
//! by its own partition index, so no locking is needed inside a stage. All
//! scratch tables are partition-major, `table[partition * D + digit]`.
//!
//! | Kernel | Slot 0 | Slot 1 | Slot 2 | Slot 3 |
//! | --- | --- | --- | --- | --- |
//! | Histogram | keys (r) | histogram (w) | | |
//! | LocalScan | histogram (r) | local offsets (w) | partition totals (w) | |
//! | CrossPartitionScan | partition totals (r) | global base (w) | | |
//! | Scatter | keys in (r) | keys out (w) | local offsets (r) | global base (r) |

pub mod cross_scan;
pub mod histogram;
pub mod local_scan;
pub mod scatter;

use std::ops::Range;
use std::sync::Arc;

use crate::device::cpu::DeviceBuffer;
use crate::device::{KernelId, KernelSpec, PushConstants};
use crate::error::{Result, SortError};

pub use cross_scan::CrossPartitionScanKernel;
pub use histogram::HistogramKernel;
pub use local_scan::LocalScanKernel;
pub use scatter::ScatterKernel;

/// How a kernel uses one of its binding slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// Buffers attached to a dispatch, indexed by slot.
pub struct BoundBuffers {
    slots: Vec<Arc<DeviceBuffer>>,
}

impl BoundBuffers {
    pub fn new(slots: Vec<Arc<DeviceBuffer>>) -> Self {
        Self { slots }
    }

    pub fn slot(&self, slot: usize) -> Result<&DeviceBuffer> {
        self.slots
            .get(slot)
            .map(Arc::as_ref)
            .ok_or_else(|| SortError::Submission(format!("binding slot {slot} is missing")))
    }
}

/// One stage of a radix pass, executed per workgroup.
pub trait Kernel: Send + Sync {
    fn id(&self) -> KernelId;

    /// Access mode of each binding slot, in slot order.
    fn bindings(&self) -> &'static [Access];

    fn run_workgroup(
        &self,
        group: u32,
        push: &PushConstants,
        buffers: &BoundBuffers,
    ) -> Result<()>;
}

/// Instantiate the built-in kernel for `id`.
pub fn build_kernel(id: KernelId, spec: KernelSpec) -> Arc<dyn Kernel> {
    match id {
        KernelId::Histogram => Arc::new(HistogramKernel::new(spec)),
        KernelId::LocalScan => Arc::new(LocalScanKernel::new(spec)),
        KernelId::CrossPartitionScan => Arc::new(CrossPartitionScanKernel::new(spec)),
        KernelId::Scatter => Arc::new(ScatterKernel::new(spec)),
    }
}

/// Keys owned by `group` for the given dispatch parameters.
pub(crate) fn workgroup_partition(
    group: u32,
    spec: &KernelSpec,
    push: &PushConstants,
) -> Range<usize> {
    let partition_size = spec.workgroup_size as usize * push.elements_per_item.max(1) as usize;
    crate::config::partition_range(group, partition_size, push.element_count as usize)
}

/// Check that `group`'s row of a partition-major table fits in the table.
pub(crate) fn scratch_row(
    group: u32,
    digits: usize,
    push: &PushConstants,
    table: &DeviceBuffer,
) -> Result<Range<usize>> {
    let start = group as usize * digits;
    let end = start + digits;
    if end > push.scratch_len as usize || end > table.len() {
        return Err(SortError::Submission(format!(
            "scratch row {start}..{end} exceeds table of {} words (scratch_len {})",
            table.len(),
            push.scratch_len
        )));
    }
    Ok(start..end)
}

/// In-place exclusive prefix sum, returning the total.
///
/// Power-of-two lengths use the up-sweep/down-sweep tree a workgroup would run
/// in shared memory; anything else falls back to a serial scan.
pub fn exclusive_scan(values: &mut [u32]) -> u32 {
    let n = values.len();
    if n == 0 {
        return 0;
    }
    if !n.is_power_of_two() {
        let mut sum = 0u32;
        for value in values.iter_mut() {
            let count = *value;
            *value = sum;
            sum += count;
        }
        return sum;
    }

    let mut stride = 1;
    while stride < n {
        for i in (2 * stride - 1..n).step_by(2 * stride) {
            values[i] += values[i - stride];
        }
        stride *= 2;
    }

    let total = values[n - 1];
    values[n - 1] = 0;

    stride = n / 2;
    while stride > 0 {
        for i in (2 * stride - 1..n).step_by(2 * stride) {
            let left = values[i - stride];
            values[i - stride] = values[i];
            values[i] += left;
        }
        stride /= 2;
    }
    total
}
