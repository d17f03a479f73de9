//! Bounded request queue and caller-side completion handles.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use arbor_config::Config;
use arbor_config::defaults::{DEFAULT_QUEUE_CAPACITY, DEFAULT_REQUEST_DEADLINE};
use tracing::debug;

use crate::context::ServiceContext;
use crate::process::StopToken;
use crate::registry::{HandlerRegistry, Reply};

use super::consumer;
use super::{DISPATCH_TARGET, DispatchError, InboundRequest};

const DRAIN_POLL: Duration = Duration::from_millis(10);

/// Outcome delivered to a waiting caller.
pub(super) type DispatchResult = Result<Reply, DispatchError>;

/// Entry travelling through the queue.
pub(super) enum Envelope {
    Request(PendingRequest),
    Close,
}

/// A queued request and the channel its result goes back on.
pub(super) struct PendingRequest {
    pub(super) request: InboundRequest,
    pub(super) completion: SyncSender<DispatchResult>,
    pub(super) ticket: Ticket,
}

/// Counts a request as outstanding until it is dropped.
///
/// Requests discarded with the queue are released along with it.
pub(super) struct Ticket(Arc<AtomicUsize>);

impl Ticket {
    fn issue(outstanding: &Arc<AtomicUsize>) -> Self {
        outstanding.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(outstanding))
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Queue sizing and caller deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherSettings {
    /// Entries admitted before producers block.
    pub capacity: usize,
    /// How long [`Dispatcher::call`] waits for a result.
    pub deadline: Duration,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
            deadline: DEFAULT_REQUEST_DEADLINE,
        }
    }
}

impl From<&Config> for DispatcherSettings {
    fn from(config: &Config) -> Self {
        Self {
            capacity: config.queue_capacity.max(1),
            deadline: config.request_deadline,
        }
    }
}

/// Cloneable producer side of the request queue.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    sender: SyncSender<Envelope>,
    deadline: Duration,
    outstanding: Arc<AtomicUsize>,
}

impl Dispatcher {
    /// Starts the consumer thread, moving the registry and context into it.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Spawn`] when the thread cannot be created.
    pub fn start(
        registry: HandlerRegistry,
        context: ServiceContext,
        settings: DispatcherSettings,
        stop: StopToken,
    ) -> Result<(Self, ConsumerHandle), DispatchError> {
        let (sender, receiver): (SyncSender<Envelope>, Receiver<Envelope>) =
            mpsc::sync_channel(settings.capacity.max(1));
        let handle = thread::Builder::new()
            .name(String::from("arbord-dispatch"))
            .spawn(move || consumer::run(&receiver, &registry, context, &stop))
            .map_err(DispatchError::Spawn)?;
        let dispatcher = Self {
            sender,
            deadline: settings.deadline,
            outstanding: Arc::new(AtomicUsize::new(0)),
        };
        Ok((
            dispatcher,
            ConsumerHandle {
                handle: Some(handle),
            },
        ))
    }

    /// Queues `request`, blocking while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::QueueClosed`] once the consumer has stopped.
    pub fn submit(&self, request: InboundRequest) -> Result<Completion, DispatchError> {
        let (completion, receiver) = mpsc::sync_channel(1);
        let path = request.path.clone();
        let pending = PendingRequest {
            request,
            completion,
            ticket: Ticket::issue(&self.outstanding),
        };
        if self.sender.send(Envelope::Request(pending)).is_err() {
            return Err(DispatchError::QueueClosed);
        }
        debug!(target: DISPATCH_TARGET, path = %path, "request queued");
        Ok(Completion { receiver })
    }

    /// Queues `request` and waits up to the configured deadline.
    ///
    /// # Errors
    ///
    /// Returns the handler's failure, [`DispatchError::Timeout`] when the
    /// deadline passes first, or [`DispatchError::QueueClosed`].
    pub fn call(&self, request: InboundRequest) -> Result<Reply, DispatchError> {
        self.submit(request)?.wait(self.deadline)
    }

    /// Deadline applied by [`Dispatcher::call`].
    #[must_use]
    pub const fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Requests accepted but neither finished nor discarded.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Asks the consumer to stop once every earlier request has run.
    pub fn close(&self) {
        if self.sender.send(Envelope::Close).is_err() {
            debug!(target: DISPATCH_TARGET, "dispatch consumer already stopped");
        }
    }
}

/// Caller side of one queued request.
#[derive(Debug)]
pub struct Completion {
    receiver: Receiver<DispatchResult>,
}

impl Completion {
    /// Waits up to `deadline` for the handler result.
    ///
    /// The handler keeps running after a timeout.
    ///
    /// # Errors
    ///
    /// Returns the handler's failure, [`DispatchError::Timeout`], or
    /// [`DispatchError::QueueClosed`] when the request was discarded.
    pub fn wait(self, deadline: Duration) -> Result<Reply, DispatchError> {
        match self.receiver.recv_timeout(deadline) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(DispatchError::Timeout { deadline }),
            Err(RecvTimeoutError::Disconnected) => Err(DispatchError::QueueClosed),
        }
    }
}

/// Handle to the consumer thread.
#[derive(Debug)]
pub struct ConsumerHandle {
    handle: Option<JoinHandle<ServiceContext>>,
}

impl ConsumerHandle {
    /// Waits for the consumer to finish and returns the context it owned.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::ConsumerPanic`] when the thread panicked.
    pub fn join(mut self) -> Result<ServiceContext, DispatchError> {
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| DispatchError::ConsumerPanic),
            None => Err(DispatchError::ConsumerPanic),
        }
    }

    /// Like [`ConsumerHandle::join`], but gives up after `timeout`.
    ///
    /// A consumer still running when the budget expires is left detached.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::DrainTimeout`] when the consumer is still
    /// busy, or [`DispatchError::ConsumerPanic`].
    pub fn join_within(self, timeout: Duration) -> Result<ServiceContext, DispatchError> {
        let deadline = Instant::now() + timeout;
        while !self.is_finished() {
            if Instant::now() >= deadline {
                return Err(DispatchError::DrainTimeout { timeout });
            }
            thread::sleep(DRAIN_POLL);
        }
        self.join()
    }

    /// True once the consumer thread has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }
}
