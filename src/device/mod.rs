use std::sync::{Arc, RwLock};

use derive_more::{Deref, Display};
use rustc_hash::FxHashMap as HashMap;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use stream::{LaunchId, Scope, Stream, StreamId};

use crate::launch::occupancy::OccupancyKey;

pub mod stream;

#[derive(Debug, Default, Display, Clone, Copy, PartialEq, Eq, Hash, Deref)]
pub struct DeviceId(uid::Id<DeviceId>);

/// Limits of the emulated device. Launch geometry is validated and chosen against these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceLimits {
    pub max_threads_per_block: usize,
    pub max_threads_per_multiprocessor: usize,
    pub max_blocks_per_multiprocessor: usize,
    pub warp_size: usize,
    /// Also the default number of workers of the device.
    pub multiprocessor_count: usize,
    pub max_shared_memory_per_block: usize,
    pub max_shared_memory_per_multiprocessor: usize,
    /// Blocks of one launch.
    pub max_grid_dim: usize,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        let multiprocessor_count = std::thread::available_parallelism()
            .map(usize::from)
            .unwrap_or(1);
        Self {
            max_threads_per_block: 1024,
            max_threads_per_multiprocessor: 2048,
            max_blocks_per_multiprocessor: 32,
            warp_size: 32,
            multiprocessor_count,
            max_shared_memory_per_block: 48 << 10,
            max_shared_memory_per_multiprocessor: 100 << 10,
            max_grid_dim: (1 << 31) - 1,
        }
    }
}

impl DeviceLimits {
    fn validate(&self) -> Result<(), DeviceBuildError> {
        if self.warp_size == 0 {
            return Err(DeviceBuildError::Limits("warp size must be positive"));
        }
        if self.max_threads_per_block < self.warp_size {
            return Err(DeviceBuildError::Limits(
                "a block must hold at least one warp",
            ));
        }
        if self.max_threads_per_multiprocessor < self.max_threads_per_block {
            return Err(DeviceBuildError::Limits(
                "a multiprocessor must hold at least one full block",
            ));
        }
        if self.max_blocks_per_multiprocessor == 0
            || self.multiprocessor_count == 0
            || self.max_grid_dim == 0
        {
            return Err(DeviceBuildError::Limits(
                "block, grid and multiprocessor counts must be positive",
            ));
        }
        if self.max_shared_memory_per_multiprocessor < self.max_shared_memory_per_block {
            return Err(DeviceBuildError::Limits(
                "a multiprocessor must hold the shared memory of one block",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum DeviceBuildError {
    #[error("invalid device limits: {0}")]
    Limits(&'static str),
    #[cfg(feature = "rayon")]
    #[error("failed to build the worker pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

#[derive(Debug)]
struct DeviceInner {
    id: DeviceId,
    limits: DeviceLimits,
    /// Workers that run the blocks of a launch.
    #[cfg(feature = "rayon")]
    pool: rayon::ThreadPool,
    /// Block sizes picked by occupancy queries, computed once per kernel instantiation.
    occupancy: RwLock<HashMap<OccupancyKey, usize>>,
}

/// A host device that executes launches block by block on a pool of workers.
#[derive(Debug, Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl Device {
    /// Builds a device with default limits.
    #[inline]
    pub fn new() -> Result<Self, DeviceBuildError> {
        DeviceBuilder::new().build()
    }

    #[inline]
    pub fn id(&self) -> DeviceId {
        self.inner.id
    }

    #[inline]
    pub fn limits(&self) -> &DeviceLimits {
        &self.inner.limits
    }

    /// Opens a scope in which streams can be created.
    ///
    /// Work enqueued on the streams may borrow anything that outlives the scope. When `f`
    /// returns or unwinds, every stream drains its queue and stops, and the scope waits for them.
    #[inline]
    pub fn scope<'env, F, R>(&self, f: F) -> R
    where
        F: for<'scope> FnOnce(&Scope<'scope, 'env>) -> R,
    {
        stream::scope(self, f)
    }

    /// Runs `op` inside the worker pool of the device.
    #[inline]
    pub(crate) fn install<OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        #[cfg(feature = "rayon")]
        let output = self.inner.pool.install(op);
        #[cfg(not(feature = "rayon"))]
        let output = op();
        output
    }

    #[inline]
    pub(crate) fn occupancy(&self) -> &RwLock<HashMap<OccupancyKey, usize>> {
        &self.inner.occupancy
    }
}

#[derive(Debug, Default, Clone)]
pub struct DeviceBuilder {
    pub limits: DeviceLimits,
    pub num_threads: Option<usize>,
}

impl DeviceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limits(mut self, limits: DeviceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Number of workers. Defaults to the multiprocessor count of the limits.
    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = Some(num_threads);
        self
    }

    pub fn build(self) -> Result<Device, DeviceBuildError> {
        let Self {
            limits,
            num_threads,
        } = self;
        limits.validate()?;

        let num_threads = num_threads.unwrap_or(limits.multiprocessor_count);
        #[cfg(feature = "rayon")]
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|index| format!("weft-worker-{index}"))
            .build()?;

        let id = DeviceId::default();
        log::debug!("device {id} built with {num_threads} workers: {limits:?}");

        let occupancy = RwLock::new(HashMap::default());
        let inner = Arc::new(DeviceInner {
            id,
            limits,
            #[cfg(feature = "rayon")]
            pool,
            occupancy,
        });
        Ok(Device { inner })
    }
}
