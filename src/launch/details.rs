use derive_more::Display;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::{KernelTag, parallel_for::LaunchConfig};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ParallelForType {
    /// The grid covers the count exactly; threads past the count stay idle.
    #[default]
    DynamicBlocks,
    /// A fixed grid of `P` threads; each thread visits `tid, tid + P, tid + 2P, ...`.
    GridStrideLoop,
}

/// What one invocation of a launched callable knows about its position in the launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParallelForDetails {
    kind: ParallelForType,
    kernel_tag: &'static str,
    total_num: usize,
    total_batch: usize,
    batch_i: usize,
    active_num_in_block: usize,
    current_i: usize,
    is_final_block: bool,
    block_idx: usize,
    thread_idx: usize,
    block_dim: usize,
    grid_dim: usize,
}

impl ParallelForDetails {
    /// Details of thread `thread_idx` of block `block_idx` while it processes index `i` for a
    /// launch tagged by `Tag`.
    pub(crate) fn new<Tag: KernelTag>(
        config: &LaunchConfig,
        block_idx: usize,
        thread_idx: usize,
        i: usize,
    ) -> Self {
        let LaunchConfig {
            kind,
            grid_dim,
            block_dim,
            count,
            ..
        } = *config;
        let grid_size = config.grid_size();

        let batch_i = i / grid_size;
        let batch_begin = batch_i * grid_size;
        let batch_end = count.min(batch_begin + grid_size);
        let block_begin = batch_begin + block_idx * block_dim;

        Self {
            kind,
            kernel_tag: Tag::NAME,
            total_num: count,
            total_batch: config.total_batch(),
            batch_i,
            active_num_in_block: block_dim.min(batch_end - block_begin),
            current_i: i,
            is_final_block: block_begin + block_dim >= batch_end,
            block_idx,
            thread_idx,
            block_dim,
            grid_dim,
        }
    }

    #[inline]
    pub fn parallel_for_type(&self) -> ParallelForType {
        self.kind
    }

    /// [`KernelTag::NAME`] of the tag the launch was made with.
    #[inline]
    pub fn kernel_tag(&self) -> &'static str {
        self.kernel_tag
    }

    /// The logical index being processed.
    #[inline]
    pub fn i(&self) -> usize {
        self.current_i
    }

    /// Number of logical indices of the launch.
    #[inline]
    pub fn total_num(&self) -> usize {
        self.total_num
    }

    /// Which pass of the grid over the indices this is. Always 0 for exact cover.
    #[inline]
    pub fn batch_i(&self) -> usize {
        self.batch_i
    }

    #[inline]
    pub fn total_batch(&self) -> usize {
        self.total_batch
    }

    /// Threads of this block with a valid index in the current batch.
    #[inline]
    pub fn active_num_in_block(&self) -> usize {
        self.active_num_in_block
    }

    /// Whether this block is the last one holding valid indices in the current batch.
    #[inline]
    pub fn is_final_block(&self) -> bool {
        self.is_final_block
    }

    #[inline]
    pub fn block_idx(&self) -> usize {
        self.block_idx
    }

    #[inline]
    pub fn thread_idx(&self) -> usize {
        self.thread_idx
    }

    #[inline]
    pub fn block_dim(&self) -> usize {
        self.block_dim
    }

    #[inline]
    pub fn grid_dim(&self) -> usize {
        self.grid_dim
    }

    #[inline]
    pub fn global_thread_id(&self) -> usize {
        self.block_idx * self.block_dim + self.thread_idx
    }
}

impl From<ParallelForDetails> for usize {
    #[inline]
    fn from(details: ParallelForDetails) -> Self {
        details.current_i
    }
}
