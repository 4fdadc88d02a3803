//! Local scan stage: turns each partition's histogram into placement offsets.

use super::{exclusive_scan, scratch_row, Access, BoundBuffers, Kernel};
use crate::device::{KernelId, KernelSpec, PushConstants};
use crate::error::Result;

const HISTOGRAM: usize = 0;
const LOCAL_OFFSETS: usize = 1;
const PARTITION_TOTALS: usize = 2;

/// Exclusive prefix sum of one partition's histogram into `offsets`, with the
/// raw counts passed through into `totals`.
pub fn scan_partition(histogram: &[u32], offsets: &mut [u32], totals: &mut [u32]) {
    totals.copy_from_slice(histogram);
    offsets.copy_from_slice(histogram);
    exclusive_scan(offsets);
}

/// Turns a partition's histogram row into exclusive local offsets and
/// passes its per-digit totals on to the cross-partition scan.
pub struct LocalScanKernel {
    spec: KernelSpec,
}

impl LocalScanKernel {
    /// Kernel compiled for `spec`.
    pub fn new(spec: KernelSpec) -> Self {
        Self { spec }
    }
}

impl Kernel for LocalScanKernel {
    fn id(&self) -> KernelId {
        KernelId::LocalScan
    }

    fn bindings(&self) -> &'static [Access] {
        &[Access::Read, Access::Write, Access::Write]
    }

    fn run_workgroup(
        &self,
        group: u32,
        push: &PushConstants,
        buffers: &BoundBuffers,
    ) -> Result<()> {
        let histogram = buffers.slot(HISTOGRAM)?;
        let offsets = buffers.slot(LOCAL_OFFSETS)?;
        let totals = buffers.slot(PARTITION_TOTALS)?;
        let digits = self.spec.digit_count();
        let row = scratch_row(group, digits, push, histogram)?;
        scratch_row(group, digits, push, offsets)?;
        scratch_row(group, digits, push, totals)?;

        let counts: Vec<u32> = row.clone().map(|i| histogram.load(i)).collect();
        let mut local_offsets = vec![0u32; digits];
        let mut partition_totals = vec![0u32; digits];
        scan_partition(&counts, &mut local_offsets, &mut partition_totals);

        for (i, slot) in row.enumerate() {
            offsets.store(slot, local_offsets[i]);
            totals.store(slot, partition_totals[i]);
        }
        Ok(())
    }
}
