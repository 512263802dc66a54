//! Data-parallel launches over `[0, count)`.
//!
//! A [`ParallelFor`] maps every logical index to exactly one invocation of a user callable,
//! either with a grid that covers the count ([`ParallelForType::DynamicBlocks`]) or with a fixed
//! grid that strides over it ([`ParallelForType::GridStrideLoop`]). Launches are enqueued on a
//! [`Stream`](crate::device::Stream) and run asynchronously.

use thiserror::Error;

pub use details::{ParallelForDetails, ParallelForType};
pub use graph::{Graph, KernelNodeParms};
pub use occupancy::{Occupancy, max_potential_block_size};
pub use parallel_for::{LaunchConfig, ParallelFor, ParallelForCallable};
pub use tag::{DefaultTag, KernelTag};

use crate::device::LaunchId;

pub mod details;
pub mod graph;
pub mod occupancy;
pub mod parallel_for;
pub mod tag;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("block dim {block_dim} is out of range [1, {max}]")]
    BlockDim { block_dim: usize, max: usize },
    #[error("grid dim {grid_dim} is out of range [1, {max}]")]
    GridDim { grid_dim: usize, max: usize },
    #[error("shared memory of {requested} bytes exceeds the limit of {limit} bytes per block")]
    SharedMemory { requested: usize, limit: usize },
    #[error("kernel `{kernel}` of launch {id} aborted: {message}")]
    Kernel {
        id: LaunchId,
        kernel: String,
        message: String,
    },
    #[error("stream is closed")]
    Closed,
}
