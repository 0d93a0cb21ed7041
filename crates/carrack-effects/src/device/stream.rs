//! Ordered execution streams
//!
//! A stream is a tokio task draining a command channel. Commands run strictly
//! in enqueue order; enqueueing never blocks the caller. The first failing
//! command poisons the stream: later work is skipped and every event recorded
//! afterwards completes carrying the failure.

use super::event::{Event, EventTicket};
use super::next_object_id;
use carrack_core::{CarrackError, DeviceId, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

type Kernel = Box<dyn FnOnce() -> Result<()> + Send>;

enum StreamCommand {
    Kernel {
        label: &'static str,
        op: Kernel,
    },
    Async {
        label: &'static str,
        op: BoxFuture<'static, Result<()>>,
    },
    Wait(EventTicket),
    Record {
        event: Event,
        generation: u64,
    },
    Delay(Duration),
}

struct StreamInner {
    id: u64,
    device: DeviceId,
    tx: mpsc::UnboundedSender<StreamCommand>,
    poison: Arc<Mutex<Option<CarrackError>>>,
}

/// In-order work queue bound to one device
#[derive(Clone)]
pub struct Stream {
    inner: Arc<StreamInner>,
}

impl Stream {
    /// Start a stream worker for `device` on the current tokio runtime
    pub(crate) fn spawn(device: DeviceId) -> Result<Self> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            CarrackError::internal("streams must be created inside a tokio runtime")
        })?;
        let (tx, rx) = mpsc::unbounded_channel();
        let poison = Arc::new(Mutex::new(None));
        let id = next_object_id();
        handle.spawn(run_stream(id, device, rx, Arc::clone(&poison)));
        tracing::trace!(stream = id, %device, "stream started");
        Ok(Self {
            inner: Arc::new(StreamInner {
                id,
                device,
                tx,
                poison,
            }),
        })
    }

    /// Unique stream id
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Device the stream executes on
    pub fn device(&self) -> DeviceId {
        self.inner.device
    }

    /// Whether both handles refer to the same stream
    pub fn same_stream(&self, other: &Stream) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// First failure seen by this stream, if any
    pub fn error(&self) -> Option<CarrackError> {
        self.inner.poison.lock().clone()
    }

    /// Enqueue a synchronous kernel
    pub fn enqueue<F>(&self, label: &'static str, op: F) -> Result<()>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.submit(StreamCommand::Kernel {
            label,
            op: Box::new(op),
        })
    }

    /// Enqueue an operation that completes asynchronously
    ///
    /// The stream does not advance until the future resolves.
    pub fn enqueue_async<F>(&self, label: &'static str, op: F) -> Result<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.submit(StreamCommand::Async {
            label,
            op: op.boxed(),
        })
    }

    /// Stall the stream for `duration`
    pub fn enqueue_delay(&self, duration: Duration) -> Result<()> {
        self.submit(StreamCommand::Delay(duration))
    }

    /// Make later work on this stream wait for the latest record of `event`
    ///
    /// Records of `event` issued after this call do not affect the wait.
    pub fn wait_event(&self, event: &Event) -> Result<()> {
        if event.query() && event.failure().is_none() {
            return Ok(());
        }
        self.submit(StreamCommand::Wait(event.ticket()))
    }

    /// Record a fresh event at the current end of the stream
    pub fn record(&self) -> Result<Event> {
        let event = Event::new();
        self.record_event(&event)?;
        Ok(event)
    }

    /// Re-record `event` at the current end of the stream
    pub fn record_event(&self, event: &Event) -> Result<()> {
        let generation = event.begin_record();
        let submitted = self.submit(StreamCommand::Record {
            event: event.clone(),
            generation,
        });
        if let Err(err) = &submitted {
            event.complete(generation, Err(err.clone()));
        }
        submitted
    }

    /// Wait until everything enqueued so far has executed
    pub async fn synchronize(&self) -> Result<()> {
        self.record()?.synchronize().await
    }

    fn submit(&self, command: StreamCommand) -> Result<()> {
        self.inner.tx.send(command).map_err(|_| {
            CarrackError::internal(format!("stream {} is no longer running", self.inner.id))
        })
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.inner.id)
            .field("device", &self.inner.device)
            .finish()
    }
}

async fn run_stream(
    id: u64,
    device: DeviceId,
    mut rx: mpsc::UnboundedReceiver<StreamCommand>,
    poison: Arc<Mutex<Option<CarrackError>>>,
) {
    while let Some(command) = rx.recv().await {
        let poisoned = poison.lock().clone();
        let (label, outcome) = match command {
            StreamCommand::Record { event, generation } => {
                event.complete(generation, poisoned.map_or(Ok(()), Err));
                continue;
            }
            _ if poisoned.is_some() => continue,
            StreamCommand::Kernel { label, op } => (label, op()),
            StreamCommand::Async { label, op } => (label, op.await),
            StreamCommand::Wait(ticket) => ("event wait", ticket.wait().await),
            StreamCommand::Delay(duration) => {
                tokio::time::sleep(duration).await;
                continue;
            }
        };
        if let Err(err) = outcome {
            tracing::warn!(stream = id, %device, operation = label, error = %err, "stream operation failed");
            *poison.lock() = Some(err);
        }
    }
    tracing::trace!(stream = id, %device, "stream stopped");
}
