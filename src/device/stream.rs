use std::{
    borrow::Cow,
    fmt,
    sync::{Mutex, PoisonError},
    thread,
};

use derive_more::{Deref, Display};

use super::Device;
use crate::launch::LaunchError;

#[derive(Debug, Default, Display, Clone, Copy, PartialEq, Eq, Hash, Deref)]
pub struct StreamId(uid::Id<StreamId>);

/// Identifies one enqueued launch, so that a deferred error can be attributed to it.
#[derive(Debug, Default, Display, Clone, Copy, PartialEq, Eq, Hash, Deref)]
pub struct LaunchId(uid::Id<LaunchId>);

/// Device work of one launch. Returns the first panic message if the launch aborted.
pub(crate) type Job<'scope> = Box<dyn FnOnce(&Device) -> Result<(), String> + Send + 'scope>;

pub(crate) struct Launch<'scope> {
    pub id: LaunchId,
    pub kernel: Cow<'static, str>,
    pub job: Job<'scope>,
}

enum StreamEvent<'scope> {
    Launch(Launch<'scope>),
    Synchronize(flume::Sender<Result<(), LaunchError>>),
    Shutdown,
}

/// Region in which streams live. Created by [`Device::scope`].
pub struct Scope<'scope, 'env: 'scope> {
    device: Device,
    scope: &'scope thread::Scope<'scope, 'env>,
    senders: Mutex<Vec<flume::Sender<StreamEvent<'scope>>>>,
}

pub(crate) fn scope<'env, F, R>(device: &Device, f: F) -> R
where
    F: for<'scope> FnOnce(&Scope<'scope, 'env>) -> R,
{
    thread::scope(|scope| {
        let scope = Scope {
            device: device.clone(),
            scope,
            senders: Mutex::new(vec![]),
        };
        // dropping the scope stops the streams before `thread::scope` joins them
        f(&scope)
    })
}

impl<'scope, 'env: 'scope> Scope<'scope, 'env> {
    #[inline]
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Creates a new FIFO stream served by its own worker.
    pub fn stream(&self) -> Stream<'scope> {
        let id = StreamId::default();
        let device = self.device.clone();
        let (sender, receiver) = flume::unbounded();
        self.scope.spawn(move || serve(id, device, receiver));
        self.senders
            .lock()
            .expect("failed to lock")
            .push(sender.clone());

        log::debug!("stream {id} opened on device {}", self.device.id());
        let device = self.device.clone();
        Stream { id, device, sender }
    }
}

impl<'scope, 'env: 'scope> Drop for Scope<'scope, 'env> {
    fn drop(&mut self) {
        let senders = self
            .senders
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        for sender in senders.drain(..) {
            let _ = sender.send(StreamEvent::Shutdown);
        }
    }
}

/// An ordered execution queue. Launches enqueued on one stream run one after another.
pub struct Stream<'scope> {
    id: StreamId,
    device: Device,
    sender: flume::Sender<StreamEvent<'scope>>,
}

impl fmt::Debug for Stream<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id)
            .field("device", &self.device.id())
            .field("pending", &self.sender.len())
            .finish()
    }
}

impl<'scope> Stream<'scope> {
    #[inline]
    pub fn id(&self) -> StreamId {
        self.id
    }

    #[inline]
    pub fn device(&self) -> &Device {
        &self.device
    }

    pub(crate) fn launch(&self, launch: Launch<'scope>) -> Result<LaunchId, LaunchError> {
        let id = launch.id;
        self.sender
            .send(StreamEvent::Launch(launch))
            .map_err(|_| LaunchError::Closed)?;
        Ok(id)
    }

    /// Blocks until every launch enqueued so far has finished.
    ///
    /// Returns the first kernel abort since the previous synchronization, if any, and clears it.
    pub fn synchronize(&self) -> Result<(), LaunchError> {
        let (sender, receiver) = flume::bounded(1);
        self.sender
            .send(StreamEvent::Synchronize(sender))
            .map_err(|_| LaunchError::Closed)?;
        receiver.recv().map_err(|_| LaunchError::Closed)?
    }

    /// Asynchronous version of [`Stream::synchronize`].
    pub async fn synchronize_async(&self) -> Result<(), LaunchError> {
        let (sender, receiver) = flume::bounded(1);
        self.sender
            .send_async(StreamEvent::Synchronize(sender))
            .await
            .map_err(|_| LaunchError::Closed)?;
        receiver.recv_async().await.map_err(|_| LaunchError::Closed)?
    }
}

fn serve(id: StreamId, device: Device, receiver: flume::Receiver<StreamEvent<'_>>) {
    let mut error: Option<LaunchError> = None;

    while let Ok(event) = receiver.recv() {
        match event {
            StreamEvent::Launch(Launch {
                id: launch,
                kernel,
                job,
            }) => {
                let Err(message) = job(&device) else {
                    continue;
                };
                log::error!("stream {id}: kernel `{kernel}` of launch {launch} aborted: {message}");
                if error.is_none() {
                    let kernel = kernel.into_owned();
                    error = Some(LaunchError::Kernel {
                        id: launch,
                        kernel,
                        message,
                    });
                }
            }
            StreamEvent::Synchronize(sender) => {
                let _ = sender.send(error.take().map_or(Ok(()), Err));
            }
            StreamEvent::Shutdown => break,
        }
    }

    if let Some(err) = error {
        log::warn!("stream {id} closed with an unobserved error: {err}");
    }
    log::debug!("stream {id} closed");
}
