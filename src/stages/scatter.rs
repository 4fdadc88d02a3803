//! Scatter stage: stable placement of every key into the pass output.
//!
//! A workgroup first re-reads its partition in input order and stages the keys
//! sorted by digit, using per-digit counters seeded from the partition's local
//! offsets. Because the counters only ever increase and the scan follows input
//! order, keys with equal digits keep their relative order. The staged run for
//! digit `d` is then copied to `GlobalDigitBase[p][d]` onwards.

use super::{scratch_row, workgroup_partition, Access, BoundBuffers, Kernel};
use crate::device::{KernelId, KernelSpec, PushConstants};
use crate::digit::digit_at;
use crate::error::{Result, SortError};

const KEYS_IN: usize = 0;
const KEYS_OUT: usize = 1;
const LOCAL_OFFSETS: usize = 2;
const GLOBAL_BASE: usize = 3;

/// Stably reorder one partition by digit using its local offset table.
pub fn stage_partition(
    keys: &[u32],
    offsets: &[u32],
    start_bit: u32,
    radix_bits: u32,
) -> Vec<u32> {
    let mut staged = vec![0u32; keys.len()];
    let mut next = offsets.to_vec();
    for &key in keys {
        let digit = digit_at(key, start_bit, radix_bits);
        staged[next[digit] as usize] = key;
        next[digit] += 1;
    }
    staged
}

/// Output index of every staged key.
///
/// Staged key `i` with digit `d` has intra-partition rank `i - offsets[d]`
/// among its digit, so it lands at `base[d] + i - offsets[d]`.
pub fn placements<'a>(
    staged: &'a [u32],
    offsets: &'a [u32],
    base: &'a [u32],
    start_bit: u32,
    radix_bits: u32,
) -> impl Iterator<Item = (usize, u32)> + 'a {
    staged.iter().enumerate().map(move |(i, &key)| {
        let digit = digit_at(key, start_bit, radix_bits);
        let rank = i as u32 - offsets[digit];
        ((base[digit] + rank) as usize, key)
    })
}

/// Writes a partition's keys, in input order within each digit, to their
/// final slots in the output buffer.
pub struct ScatterKernel {
    spec: KernelSpec,
}

impl ScatterKernel {
    /// Kernel compiled for `spec`.
    pub fn new(spec: KernelSpec) -> Self {
        Self { spec }
    }
}

impl Kernel for ScatterKernel {
    fn id(&self) -> KernelId {
        KernelId::Scatter
    }

    fn bindings(&self) -> &'static [Access] {
        &[Access::Read, Access::Write, Access::Read, Access::Read]
    }

    fn run_workgroup(
        &self,
        group: u32,
        push: &PushConstants,
        buffers: &BoundBuffers,
    ) -> Result<()> {
        let keys_in = buffers.slot(KEYS_IN)?;
        let keys_out = buffers.slot(KEYS_OUT)?;
        let offsets = buffers.slot(LOCAL_OFFSETS)?;
        let base = buffers.slot(GLOBAL_BASE)?;
        let digits = self.spec.digit_count();

        let partition = workgroup_partition(group, &self.spec, push);
        if partition.is_empty() {
            return Ok(());
        }
        let row = scratch_row(group, digits, push, offsets)?;
        scratch_row(group, digits, push, base)?;

        let keys: Vec<u32> = partition.map(|i| keys_in.load(i)).collect();
        let local_offsets: Vec<u32> = row.clone().map(|i| offsets.load(i)).collect();
        let global_base: Vec<u32> = row.map(|i| base.load(i)).collect();

        let radix_bits = self.spec.radix_bits;
        let staged = stage_partition(&keys, &local_offsets, push.start_bit, radix_bits);
        let targets = placements(
            &staged,
            &local_offsets,
            &global_base,
            push.start_bit,
            radix_bits,
        );
        for (index, key) in targets {
            if index >= keys_out.len() {
                return Err(SortError::Submission(format!(
                    "scatter target {index} is outside the output buffer of {} words",
                    keys_out.len()
                )));
            }
            keys_out.store(index, key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::local_scan::scan_partition;

    fn offsets_for(keys: &[u32], start_bit: u32) -> Vec<u32> {
        let mut counts = vec![0u32; 16];
        crate::stages::histogram::count_digits(keys, start_bit, 4, &mut counts);
        let mut offsets = vec![0u32; 16];
        let mut totals = vec![0u32; 16];
        scan_partition(&counts, &mut offsets, &mut totals);
        offsets
    }

    #[test]
    fn test_stage_partition_groups_by_digit() {
        let keys = [0x21, 0x10, 0x31, 0x00, 0x11];
        let offsets = offsets_for(&keys, 0);
        let staged = stage_partition(&keys, &offsets, 0, 4);
        assert_eq!(staged, vec![0x10, 0x00, 0x21, 0x31, 0x11]);
    }

    #[test]
    fn test_placements_single_partition() {
        let keys = [5, 3, 8, 1, 9, 2];
        let offsets = offsets_for(&keys, 0);
        let staged = stage_partition(&keys, &offsets, 0, 4);
        // With one partition the global base is the local offset table.
        let mut out = vec![0u32; keys.len()];
        for (index, key) in placements(&staged, &offsets, &offsets, 0, 4) {
            out[index] = key;
        }
        assert_eq!(out, vec![1, 2, 3, 5, 8, 9]);
    }

    #[test]
    fn test_placements_shifted_base() {
        let keys = [0x2, 0x1, 0x2];
        let offsets = offsets_for(&keys, 0);
        let staged = stage_partition(&keys, &offsets, 0, 4);
        let mut base = vec![0u32; 16];
        base[1] = 10;
        base[2] = 20;
        let placed: Vec<(usize, u32)> = placements(&staged, &offsets, &base, 0, 4).collect();
        assert_eq!(placed, vec![(10, 0x1), (20, 0x2), (21, 0x2)]);
    }
}
