//! Pass controller for the parallel LSD radix sort.
//!
//! Each pass consumes one `radix_bits`-wide digit window, least significant
//! first, and runs four kernels in strict order:
//!
//! 1. **Histogram**: every partition counts its digits
//! 2. **Local scan**: every partition turns its counts into local offsets
//!    and hands its totals on
//! 3. **Cross-partition scan**: one workgroup derives the global base of every
//!    (partition, digit) pair
//! 4. **Scatter**: every partition writes its keys, stably, to the output
//!
//! The device is free to run workgroups in any order, so each edge of the pass
//! graph is an explicit barrier over the buffers the producer wrote. After the
//! scatter, the input and output key buffers swap roles and the next pass
//! reads what this one wrote. After `ceil(32 / radix_bits)` passes the current
//! buffer holds the sorted keys.
//!
//! There is no recovery from a failed pass: scratch tables are only consistent
//! at pass boundaries, so any error abandons the whole sort.

use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::config::{DispatchLayout, SortConfig};
use crate::device::{
    BufferHandle, CommandList, ComputeDevice, CpuDevice, DeviceLimits, KernelId, KernelSpec,
    PushConstants,
};
use crate::error::{Result, SortError};

/// The last stage of the current pass known to have completed on the device.
///
/// States only move once a pass's fence has signalled, so a failed or timed
/// out submission never reports stages it did not finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassState {
    Idle,
    Histogram,
    Scanned,
    GloballyScanned,
    Scattered,
}

impl PassState {
    fn can_advance_to(self, next: PassState) -> bool {
        use PassState::*;
        matches!(
            (self, next),
            (Idle, Histogram)
                | (Histogram, Scanned)
                | (Scanned, GloballyScanned)
                | (GloballyScanned, Scattered)
                | (Scattered, Histogram)
                | (Scattered, Idle)
        )
    }
}

/// Buffers a stage binds or fences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    KeysIn,
    KeysOut,
    Histogram,
    LocalOffsets,
    PartitionTotals,
    GlobalBase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Workgroups {
    PerPartition,
    Single,
}

/// A node of the pass graph: which kernel runs, what it binds (in slot
/// order), and which of its outputs must be fenced before the next node.
struct StageNode {
    kernel: KernelId,
    reaches: PassState,
    workgroups: Workgroups,
    slots: &'static [Role],
    fences: &'static [Role],
}

const PASS_GRAPH: [StageNode; 4] = [
    StageNode {
        kernel: KernelId::Histogram,
        reaches: PassState::Histogram,
        workgroups: Workgroups::PerPartition,
        slots: &[Role::KeysIn, Role::Histogram],
        fences: &[Role::Histogram],
    },
    StageNode {
        kernel: KernelId::LocalScan,
        reaches: PassState::Scanned,
        workgroups: Workgroups::PerPartition,
        slots: &[Role::Histogram, Role::LocalOffsets, Role::PartitionTotals],
        fences: &[Role::LocalOffsets, Role::PartitionTotals],
    },
    StageNode {
        kernel: KernelId::CrossPartitionScan,
        reaches: PassState::GloballyScanned,
        workgroups: Workgroups::Single,
        slots: &[Role::PartitionTotals, Role::GlobalBase],
        fences: &[Role::GlobalBase],
    },
    StageNode {
        kernel: KernelId::Scatter,
        reaches: PassState::Scattered,
        workgroups: Workgroups::PerPartition,
        slots: &[
            Role::KeysIn,
            Role::KeysOut,
            Role::LocalOffsets,
            Role::GlobalBase,
        ],
        fences: &[Role::KeysOut],
    },
];

/// Ping-pong key buffers. `current` is read, `next` is written.
#[derive(Debug)]
struct BufferPair {
    current: BufferHandle,
    next: BufferHandle,
}

impl BufferPair {
    fn swap(&mut self) {
        std::mem::swap(&mut self.current, &mut self.next);
    }
}

/// Device buffers for one sort.
struct SortBuffers {
    keys: BufferPair,
    histogram: BufferHandle,
    local_offsets: BufferHandle,
    partition_totals: BufferHandle,
    global_base: BufferHandle,
}

impl SortBuffers {
    fn handle(&self, role: Role) -> BufferHandle {
        match role {
            Role::KeysIn => self.keys.current,
            Role::KeysOut => self.keys.next,
            Role::Histogram => self.histogram,
            Role::LocalOffsets => self.local_offsets,
            Role::PartitionTotals => self.partition_totals,
            Role::GlobalBase => self.global_base,
        }
    }

    fn all(&self) -> [BufferHandle; 6] {
        [
            self.keys.current,
            self.keys.next,
            self.histogram,
            self.local_offsets,
            self.partition_totals,
            self.global_base,
        ]
    }
}

/// Sorts `u32` keys on a [`ComputeDevice`] with a multi-pass radix sort.
///
/// # Example
///
/// ```
/// use simt_radix_sort::RadixSorter;
///
/// let mut sorter = RadixSorter::new().unwrap();
/// let mut data = vec![5, 3, 8, 1, 9, 2];
/// sorter.sort(&mut data).unwrap();
/// assert_eq!(data, vec![1, 2, 3, 5, 8, 9]);
/// ```
pub struct RadixSorter<D: ComputeDevice = CpuDevice> {
    device: D,
    config: SortConfig,
    state: PassState,
    pass_times: Vec<Duration>,
}

impl RadixSorter<CpuDevice> {
    /// Sorter on a CPU device with the default configuration.
    pub fn new() -> Result<Self> {
        Self::with_config(SortConfig::default())
    }

    /// Sorter on a CPU device sized for `config`.
    pub fn with_config(config: SortConfig) -> Result<Self> {
        config.validate()?;
        let limits = DeviceLimits {
            max_workgroups: config.max_workgroups.max(DeviceLimits::default().max_workgroups),
            ..DeviceLimits::default()
        };
        let device = CpuDevice::with_limits(limits, config.threads)?;
        Self::with_device(device, config)
    }
}

impl<D: ComputeDevice> RadixSorter<D> {
    /// Load the pass kernels onto `device`.
    pub fn with_device(mut device: D, config: SortConfig) -> Result<Self> {
        config.validate()?;
        let limits = device.limits();
        if config.max_workgroups > limits.max_workgroups {
            return Err(SortError::InvalidConfig(format!(
                "max_workgroups {} exceeds the device limit of {}",
                config.max_workgroups, limits.max_workgroups
            )));
        }
        if config.workgroup_size > limits.max_workgroup_size {
            return Err(SortError::InvalidConfig(format!(
                "workgroup size {} exceeds the device limit of {}",
                config.workgroup_size, limits.max_workgroup_size
            )));
        }

        let spec = KernelSpec {
            workgroup_size: config.workgroup_size,
            radix_bits: config.radix_bits,
        };
        for kernel in KernelId::ALL {
            device.load_kernel(kernel, spec)?;
        }

        Ok(Self {
            device,
            config,
            state: PassState::Idle,
            pass_times: Vec::new(),
        })
    }

    /// Configuration the kernels were loaded with.
    pub fn config(&self) -> &SortConfig {
        &self.config
    }

    /// Current position in the pass state machine.
    pub fn state(&self) -> PassState {
        self.state
    }

    /// The device the passes run on.
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Wall time of each pass of the most recent sort.
    pub fn pass_times(&self) -> &[Duration] {
        &self.pass_times
    }

    /// Sort `data` in place.
    pub fn sort(&mut self, data: &mut [u32]) -> Result<()> {
        self.sort_passes(data, self.config.pass_count())
    }

    /// Run only the first `passes` digit windows over `data`.
    ///
    /// After `k` passes the keys are ordered by their low `k * radix_bits`
    /// bits, so keys that fit in that many bits come out fully sorted.
    pub fn sort_passes(&mut self, data: &mut [u32], passes: u32) -> Result<()> {
        if passes > self.config.pass_count() {
            return Err(SortError::InvalidConfig(format!(
                "{passes} passes requested, keys only have {}",
                self.config.pass_count()
            )));
        }
        let layout = DispatchLayout::plan(data.len(), &self.config)?;
        self.pass_times.clear();
        if data.is_empty() || passes == 0 {
            return Ok(());
        }

        info!(
            "sorting {} keys: {} passes, {} workgroups x {} keys",
            data.len(),
            passes,
            layout.workgroup_count,
            layout.partition_size()
        );
        let start = Instant::now();

        let buffers = self.allocate(&layout)?;
        let result = self.run(data, &layout, passes, buffers);
        self.state = PassState::Idle;
        result?;

        info!(
            "sorted {} keys in {:.3} ms",
            data.len(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(())
    }

    fn allocate(&mut self, layout: &DispatchLayout) -> Result<SortBuffers> {
        let n = layout.element_count as usize;
        let scratch = layout.scratch_len();
        let mut handles = Vec::with_capacity(6);
        for words in [n, n, scratch, scratch, scratch, scratch] {
            match self.device.allocate(words) {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    for handle in handles {
                        if let Err(release) = self.device.release(handle) {
                            warn!("failed to release {handle:?} after allocation error: {release}");
                        }
                    }
                    return Err(err);
                }
            }
        }
        Ok(SortBuffers {
            keys: BufferPair {
                current: handles[0],
                next: handles[1],
            },
            histogram: handles[2],
            local_offsets: handles[3],
            partition_totals: handles[4],
            global_base: handles[5],
        })
    }

    fn run(
        &mut self,
        data: &mut [u32],
        layout: &DispatchLayout,
        passes: u32,
        mut buffers: SortBuffers,
    ) -> Result<()> {
        let mut result = self.device.upload(buffers.keys.current, data);
        for pass in 0..passes {
            if result.is_err() {
                break;
            }
            result = self.run_pass(pass, layout, &buffers);
            buffers.keys.swap();
        }
        if result.is_ok() {
            result = self.device.download(buffers.keys.current, data);
        }
        if result.is_ok() {
            result = self.advance(PassState::Idle);
        }

        for handle in buffers.all() {
            let released = self.device.release(handle);
            if result.is_ok() {
                result = released;
            }
        }
        result
    }

    fn run_pass(&mut self, pass: u32, layout: &DispatchLayout, buffers: &SortBuffers) -> Result<()> {
        let start_bit = pass * self.config.radix_bits;
        let started = Instant::now();

        let mut commands = CommandList::new();
        for node in &PASS_GRAPH {
            for (slot, role) in node.slots.iter().enumerate() {
                self.device.bind(buffers.handle(*role), node.kernel, slot)?;
            }

            let (workgroups, scratch_len) = match node.workgroups {
                Workgroups::PerPartition => (layout.workgroup_count, layout.scratch_len()),
                Workgroups::Single => (1, layout.workgroup_count as usize),
            };
            let push = PushConstants {
                element_count: layout.element_count,
                scratch_len: scratch_len as u32,
                start_bit,
                elements_per_item: layout.elements_per_item,
            };
            commands.dispatch(node.kernel, workgroups, &push);

            for role in node.fences {
                let handle = buffers.handle(*role);
                let len = self.device.buffer_len(handle)?;
                commands.barrier(handle, 0..len);
            }
        }

        let fence = self.device.submit(commands)?;
        self.device.wait(fence, self.config.wait_timeout)?;
        for node in &PASS_GRAPH {
            self.advance(node.reaches)?;
        }

        let elapsed = started.elapsed();
        debug!(
            "pass {pass} (bits {start_bit}..{}) done in {:.3} ms",
            (start_bit + self.config.radix_bits).min(u32::BITS),
            elapsed.as_secs_f64() * 1000.0
        );
        self.pass_times.push(elapsed);
        Ok(())
    }

    fn advance(&mut self, next: PassState) -> Result<()> {
        if !self.state.can_advance_to(next) {
            return Err(SortError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu_radix_sort::is_sorted;
    use crate::device::cpu::CpuFence;
    use rand::Rng;

    /// CPU device whose releases all report failure after freeing the buffer.
    struct FailingRelease {
        inner: CpuDevice,
        releases: usize,
    }

    impl ComputeDevice for FailingRelease {
        type Fence = CpuFence;

        fn limits(&self) -> DeviceLimits {
            self.inner.limits()
        }

        fn load_kernel(&mut self, kernel: KernelId, spec: KernelSpec) -> Result<()> {
            self.inner.load_kernel(kernel, spec)
        }

        fn allocate(&mut self, words: usize) -> Result<BufferHandle> {
            self.inner.allocate(words)
        }

        fn release(&mut self, buffer: BufferHandle) -> Result<()> {
            self.releases += 1;
            self.inner.release(buffer)?;
            Err(SortError::InvalidBuffer(buffer))
        }

        fn buffer_len(&self, buffer: BufferHandle) -> Result<usize> {
            self.inner.buffer_len(buffer)
        }

        fn bind(&mut self, buffer: BufferHandle, kernel: KernelId, slot: usize) -> Result<()> {
            self.inner.bind(buffer, kernel, slot)
        }

        fn upload(&mut self, buffer: BufferHandle, data: &[u32]) -> Result<()> {
            self.inner.upload(buffer, data)
        }

        fn download(&self, buffer: BufferHandle, out: &mut [u32]) -> Result<()> {
            self.inner.download(buffer, out)
        }

        fn submit(&mut self, commands: CommandList) -> Result<CpuFence> {
            self.inner.submit(commands)
        }

        fn wait(&mut self, fence: CpuFence, timeout: Duration) -> Result<()> {
            self.inner.wait(fence, timeout)
        }
    }

    fn small_sorter() -> RadixSorter {
        let config = SortConfig::default().with_workgroup_size(16).with_threads(4);
        RadixSorter::with_config(config).unwrap()
    }

    #[test]
    fn test_pass_state_transitions() {
        use PassState::*;
        assert!(Idle.can_advance_to(Histogram));
        assert!(Scattered.can_advance_to(Histogram));
        assert!(Scattered.can_advance_to(Idle));
        assert!(!Idle.can_advance_to(Scattered));
        assert!(!Histogram.can_advance_to(GloballyScanned));
        assert!(!Scanned.can_advance_to(Idle));
    }

    #[test]
    fn test_pass_graph_order() {
        let kernels: Vec<KernelId> = PASS_GRAPH.iter().map(|node| node.kernel).collect();
        assert_eq!(kernels, KernelId::ALL.to_vec());
        let mut state = PassState::Idle;
        for node in &PASS_GRAPH {
            assert!(state.can_advance_to(node.reaches));
            state = node.reaches;
        }
    }

    #[test]
    fn test_buffer_pair_swap() {
        let mut pair = BufferPair {
            current: BufferHandle(0),
            next: BufferHandle(1),
        };
        pair.swap();
        assert_eq!(pair.current, BufferHandle(1));
        assert_eq!(pair.next, BufferHandle(0));
    }

    #[test]
    fn test_sort_small() {
        let mut sorter = small_sorter();
        let mut data = vec![4, 2, 1, 3, 8, 6, 5, 7];
        sorter.sort(&mut data).unwrap();
        assert_eq!(data, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(sorter.state(), PassState::Idle);
        assert_eq!(sorter.pass_times().len(), 8);
    }

    #[test]
    fn test_sort_empty() {
        let mut sorter = small_sorter();
        let mut data: Vec<u32> = vec![];
        sorter.sort(&mut data).unwrap();
        assert!(data.is_empty());
        assert!(sorter.pass_times().is_empty());
        assert_eq!(sorter.device().allocated_bytes(), 0);
    }

    #[test]
    fn test_sort_single() {
        let mut sorter = small_sorter();
        let mut data = vec![42u32];
        sorter.sort(&mut data).unwrap();
        assert_eq!(data, vec![42]);
    }

    #[test]
    fn test_sort_random_multi_partition() {
        let mut sorter = small_sorter();
        let mut rng = rand::thread_rng();
        let mut data: Vec<u32> = (0..5000).map(|_| rng.gen()).collect();
        let mut expected = data.clone();
        expected.sort_unstable();
        sorter.sort(&mut data).unwrap();
        assert!(is_sorted(&data));
        assert_eq!(data, expected);
    }

    #[test]
    fn test_buffers_released_after_sort() {
        let mut sorter = small_sorter();
        let mut data: Vec<u32> = (0..100).rev().collect();
        sorter.sort(&mut data).unwrap();
        assert_eq!(sorter.device().allocated_bytes(), 0);
    }

    #[test]
    fn test_too_many_elements_is_rejected_before_dispatch() {
        let config = SortConfig::default().with_max_elements(4);
        let mut sorter = RadixSorter::with_config(config).unwrap();
        let mut data = vec![5, 4, 3, 2, 1];
        let err = sorter.sort(&mut data).unwrap_err();
        assert!(err.is_config_error());
        assert_eq!(data, vec![5, 4, 3, 2, 1]);
        assert!(sorter.pass_times().is_empty());
    }

    #[test]
    fn test_too_many_passes() {
        let mut sorter = small_sorter();
        let mut data = vec![1, 2];
        assert!(matches!(
            sorter.sort_passes(&mut data, 9),
            Err(SortError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_workgroup_limit_checked_against_device() {
        let config = SortConfig::default().with_workgroup_size(2048);
        assert!(matches!(
            RadixSorter::with_config(config),
            Err(SortError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_allocation_failure_aborts_sort() {
        let limits = DeviceLimits {
            memory_budget_bytes: 64,
            ..DeviceLimits::default()
        };
        let device = CpuDevice::with_limits(limits, Some(1)).unwrap();
        let config = SortConfig::default().with_workgroup_size(16);
        let mut sorter = RadixSorter::with_device(device, config).unwrap();
        let mut data: Vec<u32> = (0..100).collect();
        let err = sorter.sort(&mut data).unwrap_err();
        assert!(matches!(err, SortError::Allocation { .. }));
        assert_eq!(sorter.state(), PassState::Idle);
        assert_eq!(sorter.device().allocated_bytes(), 0);
    }

    #[test]
    fn test_allocation_error_survives_failed_release() {
        // Room for both key buffers (800 bytes) but not the first scratch table
        let limits = DeviceLimits {
            memory_budget_bytes: 1000,
            ..DeviceLimits::default()
        };
        let device = FailingRelease {
            inner: CpuDevice::with_limits(limits, Some(1)).unwrap(),
            releases: 0,
        };
        let config = SortConfig::default().with_workgroup_size(16);
        let mut sorter = RadixSorter::with_device(device, config).unwrap();
        let mut data: Vec<u32> = (0..100).collect();
        let err = sorter.sort(&mut data).unwrap_err();
        assert!(matches!(err, SortError::Allocation { .. }), "{err}");
        assert_eq!(sorter.device().releases, 2);
        assert_eq!(sorter.device().inner.allocated_bytes(), 0);
    }

    #[test]
    fn test_completed_pass_reaches_scattered() {
        let mut sorter = small_sorter();
        let data: Vec<u32> = (0..500).rev().collect();
        let layout = DispatchLayout::plan(data.len(), sorter.config()).unwrap();
        let buffers = sorter.allocate(&layout).unwrap();
        sorter.device.upload(buffers.keys.current, &data).unwrap();

        sorter.run_pass(0, &layout, &buffers).unwrap();
        assert_eq!(sorter.state(), PassState::Scattered);
        for handle in buffers.all() {
            sorter.device.release(handle).unwrap();
        }
    }

    #[test]
    fn test_timed_out_pass_does_not_advance() {
        let config = SortConfig::default()
            .with_workgroup_size(16)
            .with_threads(1)
            .with_wait_timeout(Duration::ZERO);
        let mut sorter = RadixSorter::with_config(config).unwrap();
        let data: Vec<u32> = (0..1 << 20).rev().collect();
        let layout = DispatchLayout::plan(data.len(), sorter.config()).unwrap();
        let buffers = sorter.allocate(&layout).unwrap();
        sorter.device.upload(buffers.keys.current, &data).unwrap();

        let err = sorter.run_pass(0, &layout, &buffers).unwrap_err();
        assert!(matches!(err, SortError::Timeout(_)));
        assert_eq!(sorter.state(), PassState::Idle);
        assert!(sorter.pass_times().is_empty());
        for handle in buffers.all() {
            sorter.device.release(handle).unwrap();
        }
    }
}
