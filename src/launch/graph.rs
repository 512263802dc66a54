use std::{borrow::Cow, fmt, marker::PhantomData, sync::Arc};

use super::{
    DefaultTag, KernelTag, LaunchError,
    details::ParallelForDetails,
    parallel_for::{self, LaunchConfig, ParallelForCallable},
};
use crate::device::{Device, LaunchId, Stream, stream::Launch};

/// A validated launch recorded for later execution, tagged by `Tag`.
pub struct KernelNodeParms<F, Tag = DefaultTag> {
    kernel: Cow<'static, str>,
    config: LaunchConfig,
    callable: ParallelForCallable<F>,
    phantom: PhantomData<fn() -> Tag>,
}

impl<F, Tag: KernelTag> fmt::Debug for KernelNodeParms<F, Tag> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelNodeParms")
            .field("kernel", &self.kernel)
            .field("tag", &Tag::NAME)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<F, Tag: KernelTag> KernelNodeParms<F, Tag> {
    pub(crate) fn new(
        kernel: Cow<'static, str>,
        config: LaunchConfig,
        callable: ParallelForCallable<F>,
    ) -> Self {
        Self {
            kernel,
            config,
            callable,
            phantom: PhantomData,
        }
    }

    #[inline]
    pub fn kernel(&self) -> &str {
        &self.kernel
    }

    #[inline]
    pub fn config(&self) -> &LaunchConfig {
        &self.config
    }

    #[inline]
    pub fn callable(&self) -> &ParallelForCallable<F> {
        &self.callable
    }
}

trait GraphNode: Send + Sync {
    fn kernel(&self) -> Cow<'static, str>;

    fn config(&self) -> &LaunchConfig;

    fn execute(&self, device: &Device) -> Result<(), String>;
}

impl<F, Tag> GraphNode for KernelNodeParms<F, Tag>
where
    Tag: KernelTag,
    F: Fn(&ParallelForDetails, usize) + Send + Sync,
{
    fn kernel(&self) -> Cow<'static, str> {
        self.kernel.clone()
    }

    fn config(&self) -> &LaunchConfig {
        &self.config
    }

    fn execute(&self, device: &Device) -> Result<(), String> {
        parallel_for::execute::<Tag, F>(device, &self.config, &self.callable)
    }
}

/// An ordered list of kernel nodes that can be launched on a stream any number of times.
#[derive(Default, Clone)]
pub struct Graph<'env> {
    nodes: Vec<Arc<dyn GraphNode + 'env>>,
}

impl fmt::Debug for Graph<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kernels = self.nodes.iter().map(|node| node.kernel());
        f.debug_list().entries(kernels).finish()
    }
}

impl<'env> Graph<'env> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_kernel_node<F, Tag>(&mut self, parms: KernelNodeParms<F, Tag>) -> &mut Self
    where
        Tag: KernelTag,
        F: Fn(&ParallelForDetails, usize) + Send + Sync + 'env,
    {
        self.nodes.push(Arc::new(parms));
        self
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Launch geometry of every node, in execution order.
    pub fn configs(&self) -> impl Iterator<Item = &LaunchConfig> {
        self.nodes.iter().map(|node| node.config())
    }

    /// Enqueues every node on `stream` in insertion order.
    pub fn launch<'scope>(&self, stream: &Stream<'scope>) -> Result<(), LaunchError>
    where
        'env: 'scope,
    {
        log::debug!("launch graph of {} nodes on stream {}", self.len(), stream.id());
        for node in &self.nodes {
            if node.config().count == 0 {
                continue;
            }
            let id = LaunchId::default();
            let kernel = node.kernel();
            let node = node.clone();
            let job = Box::new(move |device: &Device| node.execute(device));
            stream.launch(Launch { id, kernel, job })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        error::Error,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use super::Graph;
    use crate::{
        device::Device,
        field::{AoSoA, EntryCore, EntryDesc, FieldLayout, FieldStorage, LayoutInfo, Shape, VectorView},
        launch::{KernelTag, LaunchError, ParallelFor},
        num::DataType,
    };

    #[test]
    fn test_graph() -> Result<(), Box<dyn Error>> {
        let device = Device::new()?;
        let (first, second) = (AtomicUsize::new(0), AtomicUsize::new(0));

        device.scope(|scope| -> Result<(), LaunchError> {
            let stream = scope.stream();
            let (first, second) = (&first, &second);

            let launch = ParallelFor::with_block_dim(&stream, 32);
            let mut graph = Graph::new();
            graph
                .add_kernel_node(launch.as_node_parms(100, move |_, _| {
                    first.fetch_add(1, Ordering::Relaxed);
                })?)
                .add_kernel_node(launch.as_node_parms(0, move |_, _| {
                    second.fetch_add(1, Ordering::Relaxed);
                })?)
                .add_kernel_node(launch.as_node_parms(7, move |_, _| {
                    second.fetch_add(1, Ordering::Relaxed);
                })?);
            assert_eq!(graph.len(), 3);
            assert_eq!(graph.configs().map(|config| config.grid_dim).collect::<Vec<_>>(), [4, 0, 1]);

            // nothing runs until the graph is launched
            stream.synchronize()?;
            assert_eq!(first.load(Ordering::Relaxed), 0);

            graph.launch(&stream)?;
            graph.launch(&stream)?;
            stream.synchronize()
        })?;

        assert_eq!(first.load(Ordering::Relaxed), 200);
        assert_eq!(second.load(Ordering::Relaxed), 14);
        Ok(())
    }

    #[derive(KernelTag)]
    #[kernel_tag(crate = "crate", name = "relax")]
    struct Relax;

    #[test]
    fn test_tagged_node() -> Result<(), Box<dyn Error>> {
        let device = Device::new()?;
        let calls = AtomicUsize::new(0);

        device.scope(|scope| -> Result<(), LaunchError> {
            let stream = scope.stream();
            let calls = &calls;
            let parms = ParallelFor::with_block_dim(&stream, 16).as_node_parms_tagged::<Relax, _>(
                20,
                move |details, _| {
                    assert_eq!(details.kernel_tag(), "relax");
                    calls.fetch_add(1, Ordering::Relaxed);
                },
            )?;
            assert_eq!(parms.kernel(), "parallel_for<relax>");

            let mut graph = Graph::new();
            graph.add_kernel_node(parms);
            graph.launch(&stream)?;
            stream.synchronize()
        })?;
        assert_eq!(calls.load(Ordering::Relaxed), 20);
        Ok(())
    }

    #[test]
    fn test_graph_order() -> Result<(), Box<dyn Error>> {
        let device = Device::new()?;
        let count = 45;
        let mut data = vec![0.0f32; 2 * 64];
        {
            let layout = LayoutInfo::with_innermost_array_size(FieldLayout::AoSoA, 32);
            let desc = EntryDesc::packed("velocity", layout, DataType::F32, Shape::vector(2), count);
            let core = EntryCore::new(FieldStorage::from_slice(&mut data), desc)?;
            let view = VectorView::<f32, AoSoA, 2>::new(core)?;

            device.scope(|scope| -> Result<(), LaunchError> {
                let stream = scope.stream();
                let launch = ParallelFor::with_grid_stride(&stream, 2, 8);
                let (init, step) = (view.viewer(), view.viewer());

                let mut graph = Graph::new();
                // SAFETY: each thread touches its own record
                graph
                    .add_kernel_node(launch.as_node_parms(count, move |_, i| unsafe {
                        init.write_vector(i, [i as f32, 1.0])
                    })?)
                    .add_kernel_node(launch.as_node_parms(count, move |_, i| unsafe {
                        let [x, v] = step.read_vector(i);
                        step.write_vector(i, [x + v, v])
                    })?);
                graph.launch(&stream)?;
                stream.synchronize()
            })?;

            let viewer = view.cviewer();
            for i in 0..count {
                assert_eq!(viewer.read_vector(i), [i as f32 + 1.0, 1.0]);
            }
        }
        // the padding of the last chunk is never touched
        assert_eq!(data[32 * 2 + 13..32 * 2 + 32], [0.0; 19]);
        Ok(())
    }
}
