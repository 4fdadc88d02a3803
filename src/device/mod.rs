//! Compute device interface used by the pass controller.
//!
//! The pipeline only needs a handful of capabilities from its environment:
//! linear word buffers, a binding table from kernel slots to buffers, host-side
//! upload/download, command submission with explicit barriers, and a fence
//! that can be waited on with a timeout. [`ComputeDevice`] captures exactly
//! that; [`CpuDevice`] is the rayon-backed implementation.

pub mod cpu;

use std::ops::Range;
use std::time::Duration;

use bytemuck::{Pod, Zeroable};

use crate::error::Result;

pub use cpu::CpuDevice;

/// Opaque reference to a device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub(crate) u32);

/// The four kernels of a radix pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KernelId {
    Histogram,
    LocalScan,
    CrossPartitionScan,
    Scatter,
}

impl KernelId {
    pub const ALL: [KernelId; 4] = [
        KernelId::Histogram,
        KernelId::LocalScan,
        KernelId::CrossPartitionScan,
        KernelId::Scatter,
    ];
}

/// Compile-time parameters baked into a kernel when it is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelSpec {
    pub workgroup_size: u32,
    pub radix_bits: u32,
}

impl KernelSpec {
    pub fn digit_count(&self) -> usize {
        1 << self.radix_bits
    }
}

/// Per-dispatch parameters, laid out as the kernels read them.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct PushConstants {
    pub element_count: u32,
    /// Length of the scratch table the kernel operates on.
    pub scratch_len: u32,
    pub start_bit: u32,
    pub elements_per_item: u32,
}

/// Hardware limits reported by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    pub max_workgroups: u32,
    pub max_workgroup_size: u32,
    pub max_buffer_words: usize,
    pub memory_budget_bytes: u64,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            max_workgroups: 65535,
            max_workgroup_size: 1024,
            max_buffer_words: 1 << 30,
            memory_budget_bytes: 8 << 30,
        }
    }
}

/// A single recorded command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Dispatch {
        kernel: KernelId,
        workgroups: u32,
        push: Vec<u8>,
    },
    /// Makes writes to `range` (in words) of `buffer` visible to later commands.
    Barrier {
        buffer: BufferHandle,
        range: Range<usize>,
    },
}

/// Ordered list of commands submitted as one unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandList {
    commands: Vec<Command>,
}

impl CommandList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatch(&mut self, kernel: KernelId, workgroups: u32, push: &PushConstants) {
        self.commands.push(Command::Dispatch {
            kernel,
            workgroups,
            push: bytemuck::bytes_of(push).to_vec(),
        });
    }

    pub fn barrier(&mut self, buffer: BufferHandle, range: Range<usize>) {
        self.commands.push(Command::Barrier { buffer, range });
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// A compute device capable of running the radix sort kernels.
pub trait ComputeDevice {
    /// Completion signal for a submission.
    type Fence;

    fn limits(&self) -> DeviceLimits;

    /// Make `kernel` available for dispatch, compiled for `spec`.
    fn load_kernel(&mut self, kernel: KernelId, spec: KernelSpec) -> Result<()>;

    /// Allocate a zeroed buffer of `words` 32-bit words.
    fn allocate(&mut self, words: usize) -> Result<BufferHandle>;

    /// Release a buffer. Bindings that reference it become invalid.
    fn release(&mut self, buffer: BufferHandle) -> Result<()>;

    /// Length of `buffer` in words.
    fn buffer_len(&self, buffer: BufferHandle) -> Result<usize>;

    /// Attach `buffer` to binding `slot` of `kernel`.
    fn bind(&mut self, buffer: BufferHandle, kernel: KernelId, slot: usize) -> Result<()>;

    /// Copy host data into the start of `buffer`.
    fn upload(&mut self, buffer: BufferHandle, data: &[u32]) -> Result<()>;

    /// Copy the start of `buffer` back to the host.
    fn download(&self, buffer: BufferHandle, out: &mut [u32]) -> Result<()>;

    /// Queue `commands` for execution using the current bindings.
    fn submit(&mut self, commands: CommandList) -> Result<Self::Fence>;

    /// Block until `fence` signals or `timeout` elapses.
    fn wait(&mut self, fence: Self::Fence, timeout: Duration) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_constants_layout() {
        let push = PushConstants {
            element_count: 1,
            scratch_len: 2,
            start_bit: 3,
            elements_per_item: 4,
        };
        let bytes = bytemuck::bytes_of(&push);
        assert_eq!(bytes.len(), 16);
        let words: &[u32] = bytemuck::cast_slice(bytes);
        assert_eq!(words, &[1, 2, 3, 4]);
    }

    #[test]
    fn test_command_list_records_in_order() {
        let mut list = CommandList::new();
        assert!(list.is_empty());
        list.dispatch(KernelId::Histogram, 3, &PushConstants::default());
        list.barrier(BufferHandle(7), 0..48);
        assert_eq!(list.len(), 2);
        assert!(matches!(
            list.commands()[0],
            Command::Dispatch {
                kernel: KernelId::Histogram,
                workgroups: 3,
                ..
            }
        ));
        assert_eq!(
            list.commands()[1],
            Command::Barrier {
                buffer: BufferHandle(7),
                range: 0..48
            }
        );
    }
}
