use std::any::type_name;

use super::KernelTag;
use crate::device::{Device, DeviceLimits};

/// Theoretical residency of one block size on a multiprocessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occupancy {
    pub block_dim: usize,
    /// Blocks resident on one multiprocessor at once.
    pub active_blocks: usize,
    pub active_warps: usize,
    pub max_warps: usize,
}

impl Occupancy {
    /// Computes how many blocks of `block_dim` threads, each using `shared_mem_size` bytes of
    /// shared memory, fit on one multiprocessor.
    pub fn new(limits: &DeviceLimits, block_dim: usize, shared_mem_size: usize) -> Self {
        let warp_size = limits.warp_size;
        let warps_per_block = block_dim.div_ceil(warp_size);

        let by_threads = limits.max_threads_per_multiprocessor / (warps_per_block * warp_size);
        let by_blocks = limits.max_blocks_per_multiprocessor;
        let by_shared_mem = match shared_mem_size {
            0 => usize::MAX,
            size => limits.max_shared_memory_per_multiprocessor / size,
        };

        let active_blocks = by_threads.min(by_blocks).min(by_shared_mem);
        Self {
            block_dim,
            active_blocks,
            active_warps: active_blocks * warps_per_block,
            max_warps: limits.max_threads_per_multiprocessor / warp_size,
        }
    }

    #[inline]
    pub fn ratio(&self) -> f32 {
        self.active_warps as f32 / self.max_warps as f32
    }
}

/// Finds the block size with the most resident warps per multiprocessor.
///
/// Candidates are the multiples of the warp size up to the block limit. Larger blocks win ties.
pub fn max_potential_block_size(limits: &DeviceLimits, shared_mem_size: usize) -> Occupancy {
    let warp_size = limits.warp_size;
    (1..=limits.max_threads_per_block / warp_size)
        .map(|warps| Occupancy::new(limits, warps * warp_size, shared_mem_size))
        .max_by_key(|occupancy| (occupancy.active_warps, occupancy.block_dim))
        .unwrap_or_else(|| Occupancy::new(limits, warp_size, shared_mem_size))
}

/// One occupancy query per kernel instantiation and shared memory size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct OccupancyKey {
    callable: &'static str,
    tag: &'static str,
    shared_mem_size: usize,
}

/// Returns the block size of the best occupancy for the callable `F` tagged by `Tag`,
/// querying the device once and caching the answer.
pub(crate) fn cached_block_dim<F, Tag: KernelTag>(device: &Device, shared_mem_size: usize) -> usize {
    let key = OccupancyKey {
        callable: type_name::<F>(),
        tag: type_name::<Tag>(),
        shared_mem_size,
    };

    let cache = device.occupancy();
    if let Some(&block_dim) = cache.read().expect("failed to lock").get(&key) {
        return block_dim;
    }

    let occupancy = max_potential_block_size(device.limits(), shared_mem_size);
    log::trace!(
        "occupancy of kernel `{}` with {shared_mem_size} bytes of shared memory: {occupancy:?}",
        Tag::NAME
    );
    *cache
        .write()
        .expect("failed to lock")
        .entry(key)
        .or_insert(occupancy.block_dim)
}
