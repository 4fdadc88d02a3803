//! Cross-partition scan stage.
//!
//! Combines the per-partition digit totals into `GlobalDigitBase[p][d]`, the
//! output index where partition `p`'s keys with digit `d` start:
//!
//! ```text
//! globalDigitStart[d]        = sum over d' < d of (sum over all p of totals[p][d'])
//! crossPartitionOffset[p][d] = sum over p' < p of totals[p'][d]
//! GlobalDigitBase[p][d]      = globalDigitStart[d] + crossPartitionOffset[p][d]
//! ```
//!
//! The input is only `P * D` words, so the whole stage runs in a single
//! workgroup.

use super::{exclusive_scan, Access, BoundBuffers, Kernel};
use crate::device::{KernelId, KernelSpec, PushConstants};
use crate::error::{Result, SortError};

const PARTITION_TOTALS: usize = 0;
const GLOBAL_BASE: usize = 1;

/// Compute `GlobalDigitBase` for partition-major `totals` of `digits` columns.
pub fn cross_partition_scan(totals: &[u32], digits: usize, base: &mut [u32]) {
    let mut digit_start = vec![0u32; digits];
    for row in totals.chunks_exact(digits) {
        for (sum, &count) in digit_start.iter_mut().zip(row) {
            *sum += count;
        }
    }
    exclusive_scan(&mut digit_start);

    // Each digit's column is scanned independently over partition order.
    for (digit, &start) in digit_start.iter().enumerate() {
        let mut running = start;
        for (row, out) in totals
            .chunks_exact(digits)
            .zip(base.chunks_exact_mut(digits))
        {
            out[digit] = running;
            running += row[digit];
        }
    }
}

/// Single-workgroup scan over every partition's totals, producing the global
/// base offset of each (partition, digit) pair.
pub struct CrossPartitionScanKernel {
    spec: KernelSpec,
}

impl CrossPartitionScanKernel {
    /// Kernel compiled for `spec`.
    pub fn new(spec: KernelSpec) -> Self {
        Self { spec }
    }
}

impl Kernel for CrossPartitionScanKernel {
    fn id(&self) -> KernelId {
        KernelId::CrossPartitionScan
    }

    fn bindings(&self) -> &'static [Access] {
        &[Access::Read, Access::Write]
    }

    /// `scratch_len` carries the partition count for this stage.
    fn run_workgroup(
        &self,
        group: u32,
        push: &PushConstants,
        buffers: &BoundBuffers,
    ) -> Result<()> {
        if group != 0 {
            return Ok(());
        }
        let totals = buffers.slot(PARTITION_TOTALS)?;
        let base = buffers.slot(GLOBAL_BASE)?;
        let digits = self.spec.digit_count();
        let len = push.scratch_len as usize * digits;
        if len > totals.len() || len > base.len() {
            return Err(SortError::Submission(format!(
                "{} partitions do not fit scratch tables of {} and {} words",
                push.scratch_len,
                totals.len(),
                base.len()
            )));
        }

        let local_totals: Vec<u32> = (0..len).map(|i| totals.load(i)).collect();
        let mut local_base = vec![0u32; len];
        cross_partition_scan(&local_totals, digits, &mut local_base);
        for (i, value) in local_base.into_iter().enumerate() {
            base.store(i, value);
        }
        Ok(())
    }
}
