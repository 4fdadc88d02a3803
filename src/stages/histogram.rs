//! Histogram stage: per-partition digit counts.

use super::{scratch_row, workgroup_partition, Access, BoundBuffers, Kernel};
use crate::device::{KernelId, KernelSpec, PushConstants};
use crate::digit::digit_at;
use crate::error::Result;

const KEYS: usize = 0;
const HISTOGRAM: usize = 1;

/// Add the digit counts of `keys` for the window at `start_bit` to `counts`.
pub fn count_digits(keys: &[u32], start_bit: u32, radix_bits: u32, counts: &mut [u32]) {
    for &key in keys {
        counts[digit_at(key, start_bit, radix_bits)] += 1;
    }
}

/// Counts digit occurrences in one partition and writes them to the
/// partition's histogram row.
pub struct HistogramKernel {
    spec: KernelSpec,
}

impl HistogramKernel {
    /// Kernel compiled for `spec`.
    pub fn new(spec: KernelSpec) -> Self {
        Self { spec }
    }
}

impl Kernel for HistogramKernel {
    fn id(&self) -> KernelId {
        KernelId::Histogram
    }

    fn bindings(&self) -> &'static [Access] {
        &[Access::Read, Access::Write]
    }

    fn run_workgroup(
        &self,
        group: u32,
        push: &PushConstants,
        buffers: &BoundBuffers,
    ) -> Result<()> {
        let keys = buffers.slot(KEYS)?;
        let histogram = buffers.slot(HISTOGRAM)?;
        let digits = self.spec.digit_count();
        let row = scratch_row(group, digits, push, histogram)?;

        // Workgroup-local counters; every work item walks its own run of
        // `elements_per_item` keys.
        let mut counts = vec![0u32; digits];
        let mut run = Vec::new();
        let partition = workgroup_partition(group, &self.spec, push);
        let per_item = push.elements_per_item.max(1) as usize;
        for item in 0..self.spec.workgroup_size as usize {
            let first = partition.start + item * per_item;
            if first >= partition.end {
                break;
            }
            run.clear();
            run.extend((first..(first + per_item).min(partition.end)).map(|i| keys.load(i)));
            count_digits(&run, push.start_bit, self.spec.radix_bits, &mut counts);
        }

        for (slot, count) in row.zip(counts) {
            histogram.store(slot, count);
        }
        Ok(())
    }
}
