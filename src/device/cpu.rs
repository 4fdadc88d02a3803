//! SIMT device emulated on the host with a rayon thread pool.
//!
//! Every dispatch runs its workgroups as independent rayon tasks, so they
//! execute in no particular order and interleave freely. Device memory is a
//! slice of `AtomicU32` accessed with relaxed ordering; the join at the end of
//! a dispatch is what publishes its writes to the next command.
//!
//! Submissions are validated before they run: a dispatch that touches a buffer
//! written earlier in the same submission without a barrier in between is
//! rejected, the way a validation layer would flag it on real hardware.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{self, AtomicU32, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use log::{debug, trace};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use super::{
    BufferHandle, Command, CommandList, ComputeDevice, DeviceLimits, KernelId, KernelSpec,
    PushConstants,
};
use crate::error::{Result, SortError};
use crate::stages::{self, Access, BoundBuffers, Kernel};

/// Linear buffer of 32-bit words shared between host and workgroups.
pub struct DeviceBuffer {
    words: Box<[AtomicU32]>,
}

impl DeviceBuffer {
    pub(crate) fn zeroed(len: usize) -> Result<Self> {
        let mut words = Vec::new();
        words
            .try_reserve_exact(len)
            .map_err(|e| SortError::Allocation {
                words: len,
                reason: e.to_string(),
            })?;
        words.extend((0..len).map(|_| AtomicU32::new(0)));
        Ok(Self {
            words: words.into_boxed_slice(),
        })
    }

    /// Length in words.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Whether the buffer holds no words.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Read word `index`.
    #[inline]
    pub fn load(&self, index: usize) -> u32 {
        self.words[index].load(Ordering::Relaxed)
    }

    /// Write `value` to word `index`.
    #[inline]
    pub fn store(&self, index: usize, value: u32) {
        self.words[index].store(value, Ordering::Relaxed);
    }

    fn write_from(&self, data: &[u32]) {
        for (word, &value) in self.words.iter().zip(data) {
            word.store(value, Ordering::Relaxed);
        }
    }

    fn read_into(&self, out: &mut [u32]) {
        for (slot, word) in out.iter_mut().zip(self.words.iter()) {
            *slot = word.load(Ordering::Relaxed);
        }
    }
}

/// Signalled when a submission finishes on the queue thread.
#[derive(Debug)]
pub struct CpuFence {
    receiver: mpsc::Receiver<Result<()>>,
    submission: u64,
}

enum Op {
    Dispatch {
        kernel: Arc<dyn Kernel>,
        workgroups: u32,
        push: PushConstants,
        buffers: BoundBuffers,
    },
    Barrier,
}

/// Host-side implementation of [`ComputeDevice`].
pub struct CpuDevice {
    limits: DeviceLimits,
    pool: Arc<ThreadPool>,
    kernels: HashMap<KernelId, Arc<dyn Kernel>>,
    buffers: HashMap<BufferHandle, Arc<DeviceBuffer>>,
    bindings: HashMap<(KernelId, usize), BufferHandle>,
    next_handle: u32,
    allocated_bytes: u64,
    submissions: u64,
}

impl CpuDevice {
    /// Create a device with default limits and rayon's default thread count.
    pub fn new() -> Result<Self> {
        Self::with_limits(DeviceLimits::default(), None)
    }

    pub fn with_limits(limits: DeviceLimits, threads: Option<usize>) -> Result<Self> {
        let mut builder =
            ThreadPoolBuilder::new().thread_name(|i| format!("simt-workgroup-{i}"));
        if let Some(threads) = threads {
            builder = builder.num_threads(threads);
        }
        let pool = builder
            .build()
            .map_err(|e| SortError::DeviceLost(format!("failed to start worker pool: {e}")))?;

        debug!(
            "CPU device ready: {} worker threads, limits {:?}",
            pool.current_num_threads(),
            limits
        );

        Ok(Self {
            limits,
            pool: Arc::new(pool),
            kernels: HashMap::new(),
            buffers: HashMap::new(),
            bindings: HashMap::new(),
            next_handle: 0,
            allocated_bytes: 0,
            submissions: 0,
        })
    }

    /// Install an arbitrary kernel implementation under its own id.
    pub fn register_kernel(&mut self, kernel: Arc<dyn Kernel>) {
        self.kernels.insert(kernel.id(), kernel);
    }

    /// Worker threads backing the device.
    pub fn thread_count(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Bytes currently held by live buffers.
    pub fn allocated_bytes(&self) -> u64 {
        self.allocated_bytes
    }

    fn buffer(&self, handle: BufferHandle) -> Result<&Arc<DeviceBuffer>> {
        self.buffers
            .get(&handle)
            .ok_or(SortError::InvalidBuffer(handle))
    }

    /// Resolve bindings and check barrier placement for a whole submission.
    fn resolve(&self, commands: &CommandList) -> Result<Vec<Op>> {
        let mut ops = Vec::with_capacity(commands.len());
        // Buffers written since the last barrier that covered them.
        let mut unfenced: HashSet<BufferHandle> = HashSet::new();

        for command in commands.commands() {
            match command {
                Command::Dispatch {
                    kernel: id,
                    workgroups,
                    push,
                } => {
                    let kernel = self
                        .kernels
                        .get(id)
                        .ok_or(SortError::KernelNotLoaded(*id))?
                        .clone();
                    if *workgroups > self.limits.max_workgroups {
                        return Err(SortError::Submission(format!(
                            "{id:?} dispatch of {workgroups} workgroups exceeds the limit of {}",
                            self.limits.max_workgroups
                        )));
                    }
                    let push: PushConstants = bytemuck::try_pod_read_unaligned(push)
                        .map_err(|e| {
                            SortError::Submission(format!("bad push constants for {id:?}: {e}"))
                        })?;

                    let layout = kernel.bindings();
                    let mut slots = Vec::with_capacity(layout.len());
                    for (slot, access) in layout.iter().enumerate() {
                        let handle = *self.bindings.get(&(*id, slot)).ok_or_else(|| {
                            SortError::Submission(format!("{id:?} slot {slot} is not bound"))
                        })?;
                        if unfenced.contains(&handle) {
                            return Err(SortError::MissingBarrier {
                                kernel: *id,
                                buffer: handle,
                            });
                        }
                        slots.push((handle, *access, self.buffer(handle)?.clone()));
                    }
                    for (handle, access, _) in &slots {
                        if *access != Access::Read {
                            unfenced.insert(*handle);
                        }
                    }

                    ops.push(Op::Dispatch {
                        kernel,
                        workgroups: *workgroups,
                        push,
                        buffers: BoundBuffers::new(slots.into_iter().map(|(_, _, b)| b).collect()),
                    });
                }
                Command::Barrier { buffer, range } => {
                    let len = self.buffer(*buffer)?.len();
                    if range.start > range.end || range.end > len {
                        return Err(SortError::Submission(format!(
                            "barrier range {range:?} is outside {buffer:?} of {len} words"
                        )));
                    }
                    // Only a barrier over the whole buffer clears the hazard.
                    if range.start == 0 && range.end == len {
                        unfenced.remove(buffer);
                    }
                    ops.push(Op::Barrier);
                }
            }
        }
        Ok(ops)
    }
}

fn execute(ops: Vec<Op>) -> Result<()> {
    for op in ops {
        match op {
            Op::Dispatch {
                kernel,
                workgroups,
                push,
                buffers,
            } => {
                trace!("dispatch {:?} x{} {:?}", kernel.id(), workgroups, push);
                (0..workgroups)
                    .into_par_iter()
                    .try_for_each(|group| kernel.run_workgroup(group, &push, &buffers))?;
            }
            Op::Barrier => atomic::fence(Ordering::SeqCst),
        }
    }
    Ok(())
}

impl ComputeDevice for CpuDevice {
    type Fence = CpuFence;

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn load_kernel(&mut self, kernel: KernelId, spec: KernelSpec) -> Result<()> {
        if spec.workgroup_size > self.limits.max_workgroup_size {
            return Err(SortError::InvalidConfig(format!(
                "workgroup size {} exceeds the device limit of {}",
                spec.workgroup_size, self.limits.max_workgroup_size
            )));
        }
        debug!("loading {kernel:?} kernel ({spec:?})");
        self.register_kernel(stages::build_kernel(kernel, spec));
        Ok(())
    }

    fn allocate(&mut self, words: usize) -> Result<BufferHandle> {
        if words > self.limits.max_buffer_words {
            return Err(SortError::Allocation {
                words,
                reason: format!(
                    "exceeds the per-buffer limit of {} words",
                    self.limits.max_buffer_words
                ),
            });
        }
        let bytes = (words * std::mem::size_of::<u32>()) as u64;
        if self.allocated_bytes + bytes > self.limits.memory_budget_bytes {
            return Err(SortError::Allocation {
                words,
                reason: format!(
                    "device memory budget of {} bytes exhausted ({} in use)",
                    self.limits.memory_budget_bytes, self.allocated_bytes
                ),
            });
        }

        let buffer = DeviceBuffer::zeroed(words)?;
        let handle = BufferHandle(self.next_handle);
        self.next_handle += 1;
        self.allocated_bytes += bytes;
        self.buffers.insert(handle, Arc::new(buffer));
        trace!("allocated {handle:?}: {words} words");
        Ok(handle)
    }

    fn release(&mut self, buffer: BufferHandle) -> Result<()> {
        let released = self
            .buffers
            .remove(&buffer)
            .ok_or(SortError::InvalidBuffer(buffer))?;
        self.allocated_bytes -= (released.len() * std::mem::size_of::<u32>()) as u64;
        self.bindings.retain(|_, bound| *bound != buffer);
        Ok(())
    }

    fn buffer_len(&self, buffer: BufferHandle) -> Result<usize> {
        Ok(self.buffer(buffer)?.len())
    }

    fn bind(&mut self, buffer: BufferHandle, kernel: KernelId, slot: usize) -> Result<()> {
        self.buffer(buffer)?;
        let loaded = self
            .kernels
            .get(&kernel)
            .ok_or(SortError::KernelNotLoaded(kernel))?;
        let slots = loaded.bindings().len();
        if slot >= slots {
            return Err(SortError::Submission(format!(
                "{kernel:?} has {slots} binding slots, cannot bind slot {slot}"
            )));
        }
        self.bindings.insert((kernel, slot), buffer);
        Ok(())
    }

    fn upload(&mut self, buffer: BufferHandle, data: &[u32]) -> Result<()> {
        let target = self.buffer(buffer)?;
        if data.len() > target.len() {
            return Err(SortError::Submission(format!(
                "upload of {} words into {buffer:?} of {} words",
                data.len(),
                target.len()
            )));
        }
        target.write_from(data);
        Ok(())
    }

    fn download(&self, buffer: BufferHandle, out: &mut [u32]) -> Result<()> {
        let source = self.buffer(buffer)?;
        if out.len() > source.len() {
            return Err(SortError::Submission(format!(
                "download of {} words from {buffer:?} of {} words",
                out.len(),
                source.len()
            )));
        }
        source.read_into(out);
        Ok(())
    }

    fn submit(&mut self, commands: CommandList) -> Result<CpuFence> {
        let ops = self.resolve(&commands)?;
        let submission = self.submissions;
        self.submissions += 1;

        let (sender, receiver) = mpsc::channel();
        let pool = Arc::clone(&self.pool);
        thread::Builder::new()
            .name(format!("simt-queue-{submission}"))
            .spawn(move || {
                let result = pool.install(|| execute(ops));
                // The receiver is gone if the waiter timed out.
                let _ = sender.send(result);
            })
            .map_err(|e| SortError::Submission(format!("failed to start queue thread: {e}")))?;

        trace!("submitted #{submission}: {} commands", commands.len());
        Ok(CpuFence {
            receiver,
            submission,
        })
    }

    fn wait(&mut self, fence: CpuFence, timeout: Duration) -> Result<()> {
        match fence.receiver.recv_timeout(timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(SortError::Timeout(timeout)),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(SortError::DeviceLost(format!(
                "submission #{} ended without signalling its fence",
                fence.submission
            ))),
        }
    }
}
