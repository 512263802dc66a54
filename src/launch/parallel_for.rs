use std::{
    any::Any,
    borrow::Cow,
    panic::{self, AssertUnwindSafe},
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::{
    DefaultTag, KernelTag, LaunchError,
    details::{ParallelForDetails, ParallelForType},
    graph::KernelNodeParms,
    occupancy,
};
use crate::device::{Device, LaunchId, Stream, stream::Launch};

/// Resolved geometry of one launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LaunchConfig {
    pub kind: ParallelForType,
    pub grid_dim: usize,
    pub block_dim: usize,
    pub shared_mem_size: usize,
    /// Number of logical indices.
    pub count: usize,
}

impl LaunchConfig {
    /// Threads of the whole grid.
    #[inline]
    pub const fn grid_size(&self) -> usize {
        self.grid_dim.saturating_mul(self.block_dim)
    }

    /// Passes of the grid needed to visit every index; 0 for an empty launch.
    #[inline]
    pub const fn total_batch(&self) -> usize {
        match self.grid_size() {
            0 => 0,
            grid_size => self.count.div_ceil(grid_size),
        }
    }

    /// Blocks that hold at least one index.
    #[inline]
    pub const fn active_grid_dim(&self) -> usize {
        match self.block_dim {
            0 => 0,
            block_dim => {
                let needed = self.count.div_ceil(block_dim);
                if needed < self.grid_dim { needed } else { self.grid_dim }
            }
        }
    }
}

/// A callable together with the number of indices it runs on.
#[derive(Debug, Clone)]
pub struct ParallelForCallable<F> {
    pub callable: F,
    pub count: usize,
}

/// Launches a callable once per index of `[0, count)` on a stream.
///
/// ```ignore
/// device.scope(|scope| {
///     let stream = scope.stream();
///     ParallelFor::with_block_dim(&stream, 256)
///         .apply(count, move |_, i| unsafe { viewer.write(i, i as f32) })?
///         .apply(count, move |_, i| { /* runs after the first launch */ })?;
///     stream.synchronize()
/// })?;
/// ```
#[derive(Debug)]
pub struct ParallelFor<'a, 'scope> {
    stream: &'a Stream<'scope>,
    kind: ParallelForType,
    grid_dim: usize,
    block_dim: Option<usize>,
    shared_mem_size: usize,
    kernel_name: Option<Cow<'static, str>>,
}

impl<'a, 'scope> ParallelFor<'a, 'scope> {
    /// Exact cover with a block size picked by occupancy.
    pub fn new(stream: &'a Stream<'scope>) -> Self {
        Self {
            stream,
            kind: ParallelForType::DynamicBlocks,
            grid_dim: 0,
            block_dim: None,
            shared_mem_size: 0,
            kernel_name: None,
        }
    }

    /// Exact cover with blocks of `block_dim` threads.
    pub fn with_block_dim(stream: &'a Stream<'scope>, block_dim: usize) -> Self {
        Self {
            block_dim: Some(block_dim),
            ..Self::new(stream)
        }
    }

    /// A grid of `grid_dim` blocks of `block_dim` threads striding over the indices.
    pub fn with_grid_stride(stream: &'a Stream<'scope>, grid_dim: usize, block_dim: usize) -> Self {
        Self {
            kind: ParallelForType::GridStrideLoop,
            grid_dim,
            block_dim: Some(block_dim),
            ..Self::new(stream)
        }
    }

    /// Dynamic shared memory per block, in bytes.
    pub fn shared_mem_size(mut self, shared_mem_size: usize) -> Self {
        self.shared_mem_size = shared_mem_size;
        self
    }

    /// Overrides the kernel name shown in logs and errors.
    pub fn kernel_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.kernel_name = Some(name.into());
        self
    }

    #[inline]
    pub fn parallel_for_type(&self) -> ParallelForType {
        self.kind
    }

    #[inline]
    pub fn stream(&self) -> &'a Stream<'scope> {
        self.stream
    }

    /// Enqueues `f` to run once per index of `[0, count)`.
    ///
    /// Fails without enqueueing anything if the launch geometry is invalid. Panics inside `f`
    /// abort the launch and are reported by the next [`Stream::synchronize`].
    pub fn apply<F>(&self, count: usize, f: F) -> Result<&Self, LaunchError>
    where
        F: Fn(&ParallelForDetails, usize) + Send + Sync + 'scope,
    {
        self.apply_tagged::<DefaultTag, F>(count, f)
    }

    /// Same as [`ParallelFor::apply`], with the kernel instantiation selected by `Tag`.
    pub fn apply_tagged<Tag, F>(&self, count: usize, f: F) -> Result<&Self, LaunchError>
    where
        Tag: KernelTag,
        F: Fn(&ParallelForDetails, usize) + Send + Sync + 'scope,
    {
        self.invoke::<Tag, F>(count, f)?;
        Ok(self)
    }

    /// Validates the launch and bundles it for deferred execution by a [`Graph`](super::Graph).
    pub fn as_node_parms<F>(&self, count: usize, f: F) -> Result<KernelNodeParms<F>, LaunchError>
    where
        F: Fn(&ParallelForDetails, usize) + Send + Sync,
    {
        self.as_node_parms_tagged::<DefaultTag, F>(count, f)
    }

    pub fn as_node_parms_tagged<Tag, F>(
        &self,
        count: usize,
        f: F,
    ) -> Result<KernelNodeParms<F, Tag>, LaunchError>
    where
        Tag: KernelTag,
        F: Fn(&ParallelForDetails, usize) + Send + Sync,
    {
        let config = self.configure::<Tag, F>(count)?;
        let kernel = self.kernel_label::<Tag>();
        let callable = ParallelForCallable { callable: f, count };
        Ok(KernelNodeParms::new(kernel, config, callable))
    }

    /// Number of blocks of `block_dim` threads that cover `count` indices.
    #[inline]
    pub const fn round_up_blocks(count: usize, block_dim: usize) -> usize {
        count.div_ceil(block_dim)
    }

    /// Grid dimension of an exact cover of `count` indices.
    #[inline]
    pub const fn calculate_grid_dim(count: usize, block_dim: usize) -> usize {
        Self::round_up_blocks(count, block_dim)
    }

    /// Block dimension of a launch of `F` tagged by `Tag`: the one requested, or the
    /// occupancy-optimal one.
    pub fn calculate_block_dim<Tag: KernelTag, F>(&self) -> usize {
        match self.block_dim {
            Some(block_dim) => block_dim,
            None => occupancy::cached_block_dim::<F, Tag>(self.stream.device(), self.shared_mem_size),
        }
    }

    /// Checks the requested geometry against the limits of the device.
    pub fn check_input(&self) -> Result<(), LaunchError> {
        let limits = self.stream.device().limits();
        if let Some(block_dim) = self.block_dim {
            let max = limits.max_threads_per_block;
            if block_dim == 0 || block_dim > max {
                return Err(LaunchError::BlockDim { block_dim, max });
            }
        }
        if self.kind == ParallelForType::GridStrideLoop {
            let max = limits.max_grid_dim;
            if self.grid_dim == 0 || self.grid_dim > max {
                let grid_dim = self.grid_dim;
                return Err(LaunchError::GridDim { grid_dim, max });
            }
        }
        if self.shared_mem_size > limits.max_shared_memory_per_block {
            let requested = self.shared_mem_size;
            let limit = limits.max_shared_memory_per_block;
            return Err(LaunchError::SharedMemory { requested, limit });
        }
        Ok(())
    }

    fn configure<Tag: KernelTag, F>(&self, count: usize) -> Result<LaunchConfig, LaunchError> {
        self.check_input()?;

        let kind = self.kind;
        let block_dim = self.calculate_block_dim::<Tag, F>();
        let grid_dim = match kind {
            ParallelForType::DynamicBlocks => Self::calculate_grid_dim(count, block_dim),
            ParallelForType::GridStrideLoop => self.grid_dim,
        };

        let max = self.stream.device().limits().max_grid_dim;
        if grid_dim > max {
            return Err(LaunchError::GridDim { grid_dim, max });
        }
        if grid_dim.checked_mul(block_dim).is_none() {
            let max = usize::MAX / block_dim;
            return Err(LaunchError::GridDim { grid_dim, max });
        }

        let shared_mem_size = self.shared_mem_size;
        Ok(LaunchConfig {
            kind,
            grid_dim,
            block_dim,
            shared_mem_size,
            count,
        })
    }

    fn kernel_label<Tag: KernelTag>(&self) -> Cow<'static, str> {
        match &self.kernel_name {
            Some(name) => name.clone(),
            None => Cow::Owned(format!("parallel_for<{}>", Tag::NAME)),
        }
    }

    fn invoke<Tag, F>(&self, count: usize, f: F) -> Result<LaunchId, LaunchError>
    where
        Tag: KernelTag,
        F: Fn(&ParallelForDetails, usize) + Send + Sync + 'scope,
    {
        let config = self.configure::<Tag, F>(count)?;
        let kernel = self.kernel_label::<Tag>();
        let id = LaunchId::default();

        if config.count == 0 {
            log::trace!("launch {id} of kernel `{kernel}` is empty");
            return Ok(id);
        }
        log::debug!(
            "launch {id} of kernel `{kernel}` on stream {}: {config:?}",
            self.stream.id()
        );

        let callable = ParallelForCallable { callable: f, count };
        let job = Box::new(move |device: &Device| execute::<Tag, F>(device, &config, &callable));
        self.stream.launch(Launch { id, kernel, job })
    }
}

/// Raised by the first panicking block; every other block stops at its next check.
#[derive(Debug, Default)]
struct Abort {
    raised: AtomicBool,
    message: Mutex<Option<String>>,
}

impl Abort {
    #[inline]
    fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Relaxed)
    }

    fn raise(&self, payload: Box<dyn Any + Send>) {
        let message = match payload.downcast::<String>() {
            Ok(message) => *message,
            Err(payload) => match payload.downcast_ref::<&str>() {
                Some(message) => message.to_string(),
                None => "kernel panicked".to_string(),
            },
        };
        self.message
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_or_insert(message);
        self.raised.store(true, Ordering::Relaxed);
    }

    fn into_result(self) -> Result<(), String> {
        let message = self
            .message
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        match message {
            Some(message) => Err(message),
            None => Ok(()),
        }
    }
}

/// Runs every block of a launch on the workers of the device and waits for them.
#[cfg_attr(
    feature = "trace",
    tracing::instrument(
        skip_all,
        fields(kernel = Tag::NAME, kind = %config.kind, count = config.count)
    )
)]
pub(crate) fn execute<Tag, F>(
    device: &Device,
    config: &LaunchConfig,
    f: &ParallelForCallable<F>,
) -> Result<(), String>
where
    Tag: KernelTag,
    F: Fn(&ParallelForDetails, usize) + Sync,
{
    let abort = Abort::default();
    let run = |block_idx: usize| {
        if abort.is_raised() {
            return;
        }
        let result = panic::catch_unwind(AssertUnwindSafe(|| match config.kind {
            ParallelForType::DynamicBlocks => {
                parallel_for_block::<Tag, F>(config, f, block_idx, &abort)
            }
            ParallelForType::GridStrideLoop => {
                grid_stride_loop_block::<Tag, F>(config, f, block_idx, &abort)
            }
        }));
        if let Err(payload) = result {
            abort.raise(payload);
        }
    };

    // trailing blocks of an oversized grid have no index to visit
    let grid_dim = config.active_grid_dim();
    device.install(|| {
        #[cfg(feature = "rayon")]
        {
            use rayon::prelude::*;
            (0..grid_dim).into_par_iter().for_each(run);
        }
        #[cfg(not(feature = "rayon"))]
        (0..grid_dim).for_each(run);
    });
    abort.into_result()
}

/// One block of an exact cover: thread `t` handles index `block_idx * block_dim + t`.
fn parallel_for_block<Tag, F>(
    config: &LaunchConfig,
    f: &ParallelForCallable<F>,
    block_idx: usize,
    abort: &Abort,
) where
    Tag: KernelTag,
    F: Fn(&ParallelForDetails, usize),
{
    let ParallelForCallable { callable, count } = f;
    let begin = block_idx * config.block_dim;
    for thread_idx in 0..config.block_dim {
        let i = begin + thread_idx;
        if i >= *count || abort.is_raised() {
            break;
        }
        let details = ParallelForDetails::new::<Tag>(config, block_idx, thread_idx, i);
        callable(&details, i);
    }
}

/// One block of a grid-stride loop, visiting its share of every batch in order.
fn grid_stride_loop_block<Tag, F>(
    config: &LaunchConfig,
    f: &ParallelForCallable<F>,
    block_idx: usize,
    abort: &Abort,
) where
    Tag: KernelTag,
    F: Fn(&ParallelForDetails, usize),
{
    let ParallelForCallable { callable, count } = f;
    let grid_size = config.grid_size();
    for batch_i in 0..config.total_batch() {
        let begin = batch_i * grid_size + block_idx * config.block_dim;
        if begin >= *count {
            break;
        }
        for thread_idx in 0..config.block_dim {
            let i = begin + thread_idx;
            if i >= *count || abort.is_raised() {
                break;
            }
            let details = ParallelForDetails::new::<Tag>(config, block_idx, thread_idx, i);
            callable(&details, i);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        error::Error,
        sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
    };

    use itertools::Itertools;

    use super::{LaunchConfig, ParallelFor};
    use crate::{
        device::{Device, DeviceBuilder, DeviceLimits},
        field::{Aos, EntryCore, EntryDesc, FieldLayout, FieldStorage, ScalarView, Shape},
        launch::{KernelTag, LaunchError, ParallelForDetails, ParallelForType},
        num::DataType,
    };

    fn hits(count: usize) -> Vec<AtomicUsize> {
        (0..count).map(|_| AtomicUsize::new(0)).collect()
    }

    fn exactly_once(hits: &[AtomicUsize]) -> bool {
        hits.iter().all(|hit| hit.load(Ordering::Relaxed) == 1)
    }

    #[test]
    fn test_round_up_blocks() {
        assert_eq!(ParallelFor::round_up_blocks(17, 4), 5);
        assert_eq!(ParallelFor::round_up_blocks(16, 4), 4);
        assert_eq!(ParallelFor::round_up_blocks(0, 4), 0);
        assert_eq!(ParallelFor::calculate_grid_dim(1, 256), 1);
    }

    #[test]
    fn test_dynamic_blocks() -> Result<(), Box<dyn Error>> {
        let device = Device::new()?;
        for count in [1, 31, 32, 33, 1000, 4097] {
            let (fixed, automatic) = (hits(count), hits(count));
            device.scope(|scope| -> Result<(), LaunchError> {
                let stream = scope.stream();
                let (fixed, automatic) = (&fixed, &automatic);
                ParallelFor::with_block_dim(&stream, 64).apply(count, move |details, i| {
                    assert_eq!(details.parallel_for_type(), ParallelForType::DynamicBlocks);
                    assert_eq!(details.i(), i);
                    assert_eq!(details.global_thread_id(), i);
                    assert_eq!(details.batch_i(), 0);
                    fixed[i].fetch_add(1, Ordering::Relaxed);
                })?;
                ParallelFor::new(&stream).apply(count, move |_, i| {
                    automatic[i].fetch_add(1, Ordering::Relaxed);
                })?;
                stream.synchronize()
            })?;
            assert!(exactly_once(&fixed), "count = {count}");
            assert!(exactly_once(&automatic), "count = {count}");
        }
        Ok(())
    }

    #[test]
    fn test_grid_stride_loop() -> Result<(), Box<dyn Error>> {
        let device = DeviceBuilder::new().num_threads(3).build()?;
        let (grid_dim, block_dim, count) = (3, 4, 50);
        let grid_size = grid_dim * block_dim;

        let hits = hits(count);
        device.scope(|scope| -> Result<(), LaunchError> {
            let stream = scope.stream();
            let hits = &hits;
            ParallelFor::with_grid_stride(&stream, grid_dim, block_dim).apply(
                count,
                move |details, i| {
                    assert_eq!(details.total_batch(), 5);
                    assert_eq!(i, details.global_thread_id() + details.batch_i() * grid_size);
                    hits[i].fetch_add(1, Ordering::Relaxed);
                },
            )?;
            stream.synchronize()
        })?;
        assert!(exactly_once(&hits));
        Ok(())
    }

    #[test]
    fn test_grid_stride_order() -> Result<(), Box<dyn Error>> {
        let device = Device::new()?;
        let (grid_dim, block_dim, count) = (2, 3, 40);

        let visits = (0..grid_dim * block_dim)
            .map(|_| Mutex::new(vec![]))
            .collect_vec();
        device.scope(|scope| -> Result<(), LaunchError> {
            let stream = scope.stream();
            let visits = &visits;
            ParallelFor::with_grid_stride(&stream, grid_dim, block_dim).apply(
                count,
                move |details, _| {
                    let thread = details.global_thread_id();
                    visits[thread].lock().unwrap().push(details.batch_i());
                },
            )?;
            stream.synchronize()
        })?;

        let visits = visits
            .into_iter()
            .map(|visit| visit.into_inner().unwrap())
            .collect_vec();
        for batches in &visits {
            assert!(batches.iter().tuple_windows().all(|(a, b)| a < b), "{batches:?}");
        }
        // 40 indices over 6 threads: threads 0..4 run 7 batches, the rest 6
        let lengths = visits.iter().map(Vec::len).collect_vec();
        assert_eq!(lengths, [7, 7, 7, 7, 6, 6]);
        Ok(())
    }

    #[test]
    fn test_zero_count() -> Result<(), Box<dyn Error>> {
        let device = Device::new()?;
        let calls = AtomicUsize::new(0);
        device.scope(|scope| -> Result<(), LaunchError> {
            let stream = scope.stream();
            let calls = &calls;
            ParallelFor::new(&stream)
                .apply(0, move |_, _| {
                    calls.fetch_add(1, Ordering::Relaxed);
                })?
                .apply(0, move |_, _| {
                    calls.fetch_add(1, Ordering::Relaxed);
                })?;
            ParallelFor::with_grid_stride(&stream, 4, 32).apply(0, move |_, _| {
                calls.fetch_add(1, Ordering::Relaxed);
            })?;
            stream.synchronize()
        })?;
        assert_eq!(calls.load(Ordering::Relaxed), 0);
        Ok(())
    }

    #[test]
    fn test_invalid_geometry() -> Result<(), Box<dyn Error>> {
        let limits = DeviceLimits::default();
        let device = DeviceBuilder::new().limits(limits).build()?;
        let calls = AtomicUsize::new(0);

        device.scope(|scope| -> Result<(), LaunchError> {
            let stream = scope.stream();
            let calls = &calls;
            let f = move |_: &ParallelForDetails, _: usize| {
                calls.fetch_add(1, Ordering::Relaxed);
            };

            let err = ParallelFor::with_block_dim(&stream, 0).apply(8, f).unwrap_err();
            assert!(matches!(err, LaunchError::BlockDim { block_dim: 0, .. }), "{err}");

            let block_dim = limits.max_threads_per_block + 1;
            let err = ParallelFor::with_block_dim(&stream, block_dim)
                .apply(8, f)
                .unwrap_err();
            assert!(matches!(err, LaunchError::BlockDim { .. }), "{err}");

            let err = ParallelFor::with_grid_stride(&stream, 0, 32).apply(8, f).unwrap_err();
            assert!(matches!(err, LaunchError::GridDim { grid_dim: 0, .. }), "{err}");

            // invalid launches are rejected even when empty
            let err = ParallelFor::with_block_dim(&stream, 0).apply(0, f).unwrap_err();
            assert!(matches!(err, LaunchError::BlockDim { .. }), "{err}");

            let requested = limits.max_shared_memory_per_block + 1;
            let err = ParallelFor::new(&stream)
                .shared_mem_size(requested)
                .apply(8, f)
                .unwrap_err();
            assert!(matches!(err, LaunchError::SharedMemory { .. }), "{err}");

            stream.synchronize()
        })?;
        assert_eq!(calls.load(Ordering::Relaxed), 0);
        Ok(())
    }

    #[test]
    fn test_grid_limits() -> Result<(), Box<dyn Error>> {
        let device = DeviceBuilder::new()
            .limits(DeviceLimits {
                max_grid_dim: 4,
                ..Default::default()
            })
            .build()?;
        let calls = AtomicUsize::new(0);

        device.scope(|scope| -> Result<(), LaunchError> {
            let stream = scope.stream();
            let calls = &calls;
            let f = move |_: &ParallelForDetails, _: usize| {
                calls.fetch_add(1, Ordering::Relaxed);
            };

            let err = ParallelFor::with_block_dim(&stream, 32).apply(129, f).unwrap_err();
            assert!(matches!(err, LaunchError::GridDim { grid_dim: 5, max: 4 }), "{err}");
            let err = ParallelFor::with_grid_stride(&stream, 5, 32).apply(1, f).unwrap_err();
            assert!(matches!(err, LaunchError::GridDim { grid_dim: 5, max: 4 }), "{err}");

            ParallelFor::with_block_dim(&stream, 32).apply(128, f)?;
            stream.synchronize()
        })?;
        assert_eq!(calls.load(Ordering::Relaxed), 128);
        Ok(())
    }

    #[test]
    fn test_huge_grid() -> Result<(), Box<dyn Error>> {
        let limits = DeviceLimits {
            max_grid_dim: usize::MAX,
            ..Default::default()
        };
        let device = DeviceBuilder::new().limits(limits).build()?;
        let calls = AtomicUsize::new(0);

        device.scope(|scope| -> Result<(), LaunchError> {
            let stream = scope.stream();
            let calls = &calls;
            let f = move |details: &ParallelForDetails, i: usize| {
                assert_eq!(details.total_batch(), 1);
                assert_eq!(i, 0);
                calls.fetch_add(1, Ordering::Relaxed);
            };

            // the thread count of the grid does not fit in usize
            let grid_dim = usize::MAX / 2 + 1;
            let err = ParallelFor::with_grid_stride(&stream, grid_dim, 2).apply(1, f).unwrap_err();
            assert!(matches!(err, LaunchError::GridDim { .. }), "{err}");

            // only the blocks holding an index run
            ParallelFor::with_grid_stride(&stream, usize::MAX / 1024, 1024).apply(1, f)?;
            stream.synchronize()
        })?;
        assert_eq!(calls.load(Ordering::Relaxed), 1);

        let device = Device::new()?;
        device.scope(|scope| -> Result<(), LaunchError> {
            let stream = scope.stream();
            let max = device.limits().max_grid_dim;
            ParallelFor::with_grid_stride(&stream, max, 1).apply(1, move |_, i| {
                assert_eq!(i, 0);
            })?;
            stream.synchronize()
        })?;
        Ok(())
    }

    #[test]
    fn test_kernel_abort() -> Result<(), Box<dyn Error>> {
        let device = Device::new()?;
        let mut data = vec![0.0f32; 100];
        let desc = EntryDesc::packed("mass", FieldLayout::Aos, DataType::F32, Shape::SCALAR, 100);
        let core = EntryCore::new(FieldStorage::from_slice(&mut data), desc)?;
        let view = ScalarView::<f32, Aos>::new(core)?;
        let calls = AtomicUsize::new(0);

        device.scope(|scope| -> Result<(), LaunchError> {
            let stream = scope.stream();
            let viewer = view.viewer();
            let calls = &calls;
            ParallelFor::with_block_dim(&stream, 16)
                .kernel_name("overrun")
                // off by one: the last thread reads past the entry
                .apply(101, move |_, i| {
                    let _ = viewer.read(i);
                })?;

            match stream.synchronize() {
                Err(LaunchError::Kernel { kernel, message, .. }) => {
                    assert_eq!(kernel, "overrun");
                    assert!(message.contains("out of range"), "{message}");
                }
                other => panic!("unexpected result: {other:?}"),
            }

            // the stream stays usable and the error is cleared
            ParallelFor::with_block_dim(&stream, 16).apply(10, move |_, _| {
                calls.fetch_add(1, Ordering::Relaxed);
            })?;
            stream.synchronize()
        })?;
        assert_eq!(calls.load(Ordering::Relaxed), 10);
        Ok(())
    }

    #[derive(KernelTag)]
    #[kernel_tag(crate = "crate", name = "scale")]
    struct Scale;

    #[test]
    fn test_write_field() -> Result<(), Box<dyn Error>> {
        let device = Device::new()?;
        let count = 1000;
        let mut data = vec![0i32; count];
        {
            let desc = EntryDesc::packed("id", FieldLayout::Aos, DataType::I32, Shape::SCALAR, count);
            let core = EntryCore::new(FieldStorage::from_slice(&mut data), desc)?;
            let view = ScalarView::<i32, Aos>::new(core)?;

            device.scope(|scope| -> Result<(), LaunchError> {
                let stream = scope.stream();
                let viewer = view.viewer();
                let window = view.subview(3, 4).viewer();
                ParallelFor::new(&stream)
                    // SAFETY: each thread writes its own record
                    .apply(count, move |_, i| unsafe { viewer.write(i, i as i32) })?
                    // runs after the first launch on the same stream
                    .apply_tagged::<Scale, _>(4, move |_, i| unsafe {
                        window.write(i, -window.read(i))
                    })?;
                stream.synchronize()
            })?;
        }

        let expected = (0..count as i32)
            .map(|x| if (3..7).contains(&x) { -x } else { x })
            .collect_vec();
        assert_eq!(data, expected);
        Ok(())
    }

    #[test]
    fn test_kernel_tag_details() -> Result<(), Box<dyn Error>> {
        let device = Device::new()?;
        let (tagged, untagged) = (AtomicUsize::new(0), AtomicUsize::new(0));
        device.scope(|scope| -> Result<(), LaunchError> {
            let stream = scope.stream();
            let (tagged, untagged) = (&tagged, &untagged);
            ParallelFor::with_grid_stride(&stream, 2, 8)
                .apply_tagged::<Scale, _>(40, move |details, _| {
                    assert_eq!(details.kernel_tag(), "scale");
                    tagged.fetch_add(1, Ordering::Relaxed);
                })?
                .apply(40, move |details, _| {
                    assert_eq!(details.kernel_tag(), "default");
                    untagged.fetch_add(1, Ordering::Relaxed);
                })?;
            stream.synchronize()
        })?;
        assert_eq!(tagged.load(Ordering::Relaxed), 40);
        assert_eq!(untagged.load(Ordering::Relaxed), 40);
        Ok(())
    }

    #[test]
    fn test_tagged_error() -> Result<(), Box<dyn Error>> {
        let device = Device::new()?;
        device.scope(|scope| -> Result<(), Box<dyn Error>> {
            let stream = scope.stream();
            ParallelFor::with_block_dim(&stream, 8).apply_tagged::<Scale, _>(8, |_, i| {
                assert!(i < 4, "index {i} is too large");
            })?;
            let err = stream.synchronize().unwrap_err();
            assert!(err.to_string().contains("parallel_for<scale>"), "{err}");
            Ok(())
        })
    }

    #[test]
    fn test_launch_config() -> Result<(), Box<dyn Error>> {
        let device = Device::new()?;
        device.scope(|scope| -> Result<(), Box<dyn Error>> {
            let stream = scope.stream();
            let parms = ParallelFor::with_block_dim(&stream, 64).as_node_parms(1000, |_, _| {})?;
            let config = *parms.config();
            assert_eq!(
                config,
                LaunchConfig {
                    kind: ParallelForType::DynamicBlocks,
                    grid_dim: 16,
                    block_dim: 64,
                    shared_mem_size: 0,
                    count: 1000,
                }
            );
            assert_eq!(config.total_batch(), 1);

            let empty = *ParallelFor::new(&stream).as_node_parms(0, |_, _| {})?.config();
            assert_eq!(empty.grid_dim, 0);
            assert_eq!(empty.total_batch(), 0);
            assert_eq!(empty.active_grid_dim(), 0);

            #[cfg(feature = "serde")]
            {
                let json = serde_json::to_string(&config)?;
                let other: LaunchConfig = serde_json::from_str(&json)?;
                assert_eq!(config, other);
            }
            Ok(())
        })
    }
}
