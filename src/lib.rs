//! Parallel LSD radix sort for `u32` keys on a SIMT-style compute device.
//!
//! The sort runs `ceil(32 / radix_bits)` passes. Each pass is four kernels
//! separated by explicit barriers:
//! - **Histogram**: per-partition digit counts
//! - **Local scan**: per-partition exclusive prefix sums
//! - **Cross-partition scan**: global base offset of every (partition, digit)
//! - **Scatter**: stable placement into the ping-pong output buffer
//!
//! [`RadixSorter`] drives the passes over any [`ComputeDevice`]; [`CpuDevice`]
//! runs the kernels on a rayon thread pool. [`cpu_radix_sort`] is the serial
//! reference.

pub mod config;
pub mod controller;
pub mod cpu_radix_sort;
pub mod device;
pub mod digit;
pub mod error;
pub mod mwc;
pub mod stages;

pub use config::{DispatchLayout, SortConfig};
pub use controller::{PassState, RadixSorter};
pub use device::{ComputeDevice, CpuDevice};
pub use error::{Result, SortError};
