//! In-process collective communication library
//!
//! Communicators are created together for a set of devices (a "world"); each
//! gets a rank in the order the devices were given.
//!
//! Every send is bound to exactly one receive when it is posted, through a
//! one-shot channel of its own. Inside a [`GroupScope`] the binding is the
//! pair `finish` matched; ungrouped operations on one `(world, from, to)`
//! route pair up in posting order. Execution order on the streams never
//! changes which receive gets which payload.
//!
//! Sends run as kernels on the sender's stream. Receives are asynchronous
//! stream operations: the receiving stream stalls until the matching message
//! arrives, the way a device-side receive does. A receive whose send was
//! skipped fails with `Transfer`; a send whose receive was skipped is dropped.
//!
//! Operations bracketed by a [`GroupScope`] are validated together and
//! submitted only when the scope finishes. Group scopes are serialized
//! library-wide; nesting two scopes on one thread deadlocks.

use crate::device::{DeviceArray, DeviceRuntime, Stream};
use carrack_core::{CarrackError, DeviceId, PeerId, Result, WireDataType};
use parking_lot::{Mutex, MutexGuard};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Failure injected into the library for testing error paths
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectiveFault {
    /// Communicator setup fails for this device
    Init {
        /// Device whose communicator cannot be created
        device: DeviceId,
    },
    /// Sends issued from this device fail
    Send {
        /// Sending device
        device: DeviceId,
    },
    /// Receives posted on this device fail
    Recv {
        /// Receiving device
        device: DeviceId,
    },
    /// Every group scope fails at its end
    GroupEnd,
}

#[derive(Debug)]
struct Message {
    dtype: WireDataType,
    count: usize,
    bytes: Vec<u8>,
}

/// One side of a bound send/receive pair
#[derive(Debug)]
enum Link {
    Send(oneshot::Sender<Message>),
    Recv(oneshot::Receiver<Message>),
}

/// Half of a pair whose other side has not been posted yet
#[derive(Debug)]
enum Unmatched {
    /// Left by a send; the next receive on the route takes it
    Inbox(oneshot::Receiver<Message>),
    /// Left by a receive; the next send on the route delivers through it
    Outbox(oneshot::Sender<Message>),
}

type Route = (u64, PeerId, PeerId);

#[derive(Debug, Default)]
struct LibraryState {
    unmatched: HashMap<Route, VecDeque<Unmatched>>,
    faults: Vec<CollectiveFault>,
}

/// Shared collective library instance
#[derive(Debug, Default)]
pub struct CollectiveLibrary {
    group_lock: Mutex<()>,
    state: Mutex<LibraryState>,
    next_world: AtomicU64,
}

impl CollectiveLibrary {
    /// Create an empty library
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject a fault; it stays active until [`clear_faults`](Self::clear_faults)
    pub fn inject(&self, fault: CollectiveFault) {
        tracing::debug!(?fault, "collective fault injected");
        self.state.lock().faults.push(fault);
    }

    /// Remove every injected fault
    pub fn clear_faults(&self) {
        self.state.lock().faults.clear();
    }

    /// Create one communicator per device, ranked in the given order
    ///
    /// All-or-nothing: if any device cannot be set up, communicators created
    /// so far are aborted and `CommunicationInit` is returned.
    pub fn init_all(
        self: &Arc<Self>,
        runtime: &DeviceRuntime,
        devices: &[DeviceId],
    ) -> Result<Vec<CollectiveComm>> {
        if devices.is_empty() {
            return Err(CarrackError::communication_init("no devices given"));
        }
        let mut seen = BTreeSet::new();
        for &device in devices {
            if !seen.insert(device) {
                return Err(CarrackError::communication_init(format!(
                    "{device} listed more than once"
                )));
            }
            runtime.device(device).map_err(|_| {
                CarrackError::communication_init(format!("{device} does not exist"))
            })?;
        }
        let size = u32::try_from(devices.len())
            .map_err(|_| CarrackError::communication_init("too many devices"))?;

        let world = self.next_world.fetch_add(1, Ordering::Relaxed);
        let mut comms: Vec<CollectiveComm> = Vec::with_capacity(devices.len());
        for (rank, &device) in (0..size).zip(devices) {
            if self.has_fault(|f| *f == CollectiveFault::Init { device }) {
                for comm in &comms {
                    comm.abort();
                }
                tracing::warn!(world, %device, "collective setup failed");
                return Err(CarrackError::communication_init(format!(
                    "collective setup failed on {device}"
                )));
            }
            comms.push(CollectiveComm {
                inner: Arc::new(CommInner {
                    library: Arc::clone(self),
                    world,
                    rank: PeerId(rank),
                    device,
                    size,
                    aborted: AtomicBool::new(false),
                }),
            });
        }

        tracing::info!(world, devices = size, "collective communicators initialized");
        Ok(comms)
    }

    /// Open a group scope
    pub fn group(&self) -> GroupScope<'_> {
        GroupScope {
            library: self,
            _guard: self.group_lock.lock(),
            ops: Vec::new(),
            finished: false,
        }
    }

    fn has_fault(&self, pred: impl Fn(&CollectiveFault) -> bool) -> bool {
        self.state.lock().faults.iter().any(pred)
    }

    /// Bind an ungrouped operation to the oldest unmatched opposite side of
    /// its route, or leave a half for the next one
    fn post(&self, op: &PointToPoint) -> Link {
        let comm = &op.comm.inner;
        let route = match op.direction {
            Direction::Send => (comm.world, comm.rank, op.peer),
            Direction::Recv => (comm.world, op.peer, comm.rank),
        };
        let mut state = self.state.lock();
        let queue = state.unmatched.entry(route).or_default();
        let pairs_with_front = matches!(
            (op.direction, queue.front()),
            (Direction::Send, Some(Unmatched::Outbox(_))) | (Direction::Recv, Some(Unmatched::Inbox(_)))
        );
        let waiting = if pairs_with_front { queue.pop_front() } else { None };
        let link = match (op.direction, waiting) {
            (Direction::Send, Some(Unmatched::Outbox(tx))) => Link::Send(tx),
            (Direction::Recv, Some(Unmatched::Inbox(rx))) => Link::Recv(rx),
            (Direction::Send, _) => {
                let (tx, rx) = oneshot::channel();
                queue.push_back(Unmatched::Inbox(rx));
                Link::Send(tx)
            }
            (Direction::Recv, _) => {
                let (tx, rx) = oneshot::channel();
                queue.push_back(Unmatched::Outbox(tx));
                Link::Recv(rx)
            }
        };
        if queue.is_empty() {
            state.unmatched.remove(&route);
        }
        link
    }

    /// Drop unmatched halves on routes touching `rank` of `world`
    fn forget(&self, world: u64, rank: PeerId) {
        self.state
            .lock()
            .unmatched
            .retain(|&(w, from, to), _| w != world || (from != rank && to != rank));
    }

    fn check(&self, op: &PointToPoint) -> Result<()> {
        let comm = &op.comm.inner;
        if comm.aborted.load(Ordering::Acquire) {
            return Err(CarrackError::transfer(format!(
                "communicator {} of world {} was aborted",
                comm.rank, comm.world
            )));
        }
        if op.peer.rank() >= comm.size || op.peer == comm.rank {
            return Err(CarrackError::transfer(format!(
                "invalid peer {} for {} in a world of {}",
                op.peer, comm.rank, comm.size
            )));
        }
        if op.array.device() != comm.device || op.stream.device() != comm.device {
            return Err(CarrackError::invalid(format!(
                "{} buffer and stream must live on {}",
                op.direction, comm.device
            )));
        }
        if op.count * op.dtype.size_bytes() != op.array.nbytes() {
            return Err(CarrackError::transfer(format!(
                "{} of {} x {:?} does not match a {} byte buffer",
                op.direction,
                op.count,
                op.dtype,
                op.array.nbytes()
            )));
        }
        let device = comm.device;
        let faulted = match op.direction {
            Direction::Send => self.has_fault(|f| *f == CollectiveFault::Send { device }),
            Direction::Recv => self.has_fault(|f| *f == CollectiveFault::Recv { device }),
        };
        if faulted {
            return Err(CarrackError::transfer(format!(
                "{} failed on {device}",
                op.direction
            )));
        }
        Ok(())
    }

    fn enqueue(op: PointToPoint, link: Link) -> Result<()> {
        let (world, rank, peer) = (op.comm.inner.world, op.comm.inner.rank, op.peer);
        let (dtype, count) = (op.dtype, op.count);
        let array = op.array;
        match link {
            Link::Send(tx) => op.stream.enqueue("collective send", move || {
                let bytes = array.read_bytes();
                if tx.send(Message { dtype, count, bytes }).is_err() {
                    tracing::debug!(world, from = %rank, to = %peer, "receive was skipped, send dropped");
                }
                Ok(())
            }),
            Link::Recv(rx) => {
                op.stream.enqueue_async("collective recv", async move {
                    let message = rx.await.map_err(|_| {
                        CarrackError::transfer(format!(
                            "send from {peer} to {rank} of world {world} never ran"
                        ))
                    })?;
                    if message.dtype != dtype || message.count != count {
                        return Err(CarrackError::transfer(format!(
                            "expected {count} x {dtype:?}, received {} x {:?}",
                            message.count, message.dtype
                        )));
                    }
                    array.write_bytes(&message.bytes)
                })
            }
        }
    }
}

struct CommInner {
    library: Arc<CollectiveLibrary>,
    world: u64,
    rank: PeerId,
    device: DeviceId,
    size: u32,
    aborted: AtomicBool,
}

/// Communicator bound to one device
#[derive(Clone)]
pub struct CollectiveComm {
    inner: Arc<CommInner>,
}

impl CollectiveComm {
    /// Device this communicator is bound to
    pub fn device_id(&self) -> DeviceId {
        self.inner.device
    }

    /// Rank inside the world
    pub fn rank(&self) -> PeerId {
        self.inner.rank
    }

    /// Number of communicators in the world
    pub fn world_size(&self) -> u32 {
        self.inner.size
    }

    /// Library this communicator belongs to
    pub fn library(&self) -> &Arc<CollectiveLibrary> {
        &self.inner.library
    }

    /// Send `count` wire elements of `array` to `peer`, ordered on `stream`
    pub fn send(
        &self,
        array: &DeviceArray,
        count: usize,
        dtype: WireDataType,
        peer: PeerId,
        stream: &Stream,
    ) -> Result<()> {
        let op = PointToPoint::new(Direction::Send, self, array, count, dtype, peer, stream);
        self.inner.library.check(&op)?;
        let link = self.inner.library.post(&op);
        CollectiveLibrary::enqueue(op, link)
    }

    /// Receive `count` wire elements from `peer` into `array`, ordered on `stream`
    pub fn recv(
        &self,
        array: &DeviceArray,
        count: usize,
        dtype: WireDataType,
        peer: PeerId,
        stream: &Stream,
    ) -> Result<()> {
        let op = PointToPoint::new(Direction::Recv, self, array, count, dtype, peer, stream);
        self.inner.library.check(&op)?;
        let link = self.inner.library.post(&op);
        CollectiveLibrary::enqueue(op, link)
    }

    /// Tear the communicator down; later operations fail
    ///
    /// Ungrouped operations still waiting for a partner on this rank are
    /// dropped, so their counterparts fail instead of waiting forever.
    pub fn abort(&self) {
        if !self.inner.aborted.swap(true, Ordering::AcqRel) {
            self.inner.library.forget(self.inner.world, self.inner.rank);
            tracing::debug!(world = self.inner.world, rank = %self.inner.rank, "communicator aborted");
        }
    }

    /// Whether [`abort`](Self::abort) was called
    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::Acquire)
    }
}

impl fmt::Debug for CollectiveComm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectiveComm")
            .field("world", &self.inner.world)
            .field("rank", &self.inner.rank)
            .field("device", &self.inner.device)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Send,
    Recv,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Send => "send",
            Self::Recv => "recv",
        })
    }
}

struct PointToPoint {
    direction: Direction,
    comm: CollectiveComm,
    array: DeviceArray,
    count: usize,
    dtype: WireDataType,
    peer: PeerId,
    stream: Stream,
}

impl PointToPoint {
    fn new(
        direction: Direction,
        comm: &CollectiveComm,
        array: &DeviceArray,
        count: usize,
        dtype: WireDataType,
        peer: PeerId,
        stream: &Stream,
    ) -> Self {
        Self {
            direction,
            comm: comm.clone(),
            array: array.clone(),
            count,
            dtype,
            peer,
            stream: stream.clone(),
        }
    }

    fn pairs_with(&self, recv: &PointToPoint) -> bool {
        let (send, recv_comm) = (&self.comm.inner, &recv.comm.inner);
        send.world == recv_comm.world
            && self.peer == recv_comm.rank
            && recv.peer == send.rank
            && self.count == recv.count
            && self.dtype == recv.dtype
    }
}

/// Operations submitted together
///
/// Holding a scope excludes every other group on the library. Operations are
/// only validated and submitted by [`finish`](Self::finish); dropping an
/// unfinished scope discards them.
pub struct GroupScope<'a> {
    library: &'a CollectiveLibrary,
    _guard: MutexGuard<'a, ()>,
    ops: Vec<PointToPoint>,
    finished: bool,
}

impl GroupScope<'_> {
    /// Bracket a send
    pub fn send(
        &mut self,
        comm: &CollectiveComm,
        array: &DeviceArray,
        count: usize,
        dtype: WireDataType,
        peer: PeerId,
        stream: &Stream,
    ) {
        self.ops.push(PointToPoint::new(
            Direction::Send,
            comm,
            array,
            count,
            dtype,
            peer,
            stream,
        ));
    }

    /// Bracket a receive
    pub fn recv(
        &mut self,
        comm: &CollectiveComm,
        array: &DeviceArray,
        count: usize,
        dtype: WireDataType,
        peer: PeerId,
        stream: &Stream,
    ) {
        self.ops.push(PointToPoint::new(
            Direction::Recv,
            comm,
            array,
            count,
            dtype,
            peer,
            stream,
        ));
    }

    /// Number of bracketed operations
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether nothing has been bracketed
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Validate and submit every bracketed operation
    ///
    /// Each send needs a receive for the same pair, count and datatype. On any
    /// error nothing is submitted.
    pub fn finish(mut self) -> Result<()> {
        self.finished = true;
        let ops = std::mem::take(&mut self.ops);
        if self.library.has_fault(|f| *f == CollectiveFault::GroupEnd) {
            return Err(CarrackError::transfer("group end failed"));
        }
        for op in &ops {
            self.library.check(op)?;
        }

        let mut links: Vec<Option<Link>> = ops.iter().map(|_| None).collect();
        for (i, send) in ops.iter().enumerate() {
            if send.direction != Direction::Send {
                continue;
            }
            let partner = ops.iter().enumerate().position(|(j, recv)| {
                recv.direction == Direction::Recv && links[j].is_none() && send.pairs_with(recv)
            });
            match partner {
                Some(j) => {
                    let (tx, rx) = oneshot::channel();
                    links[i] = Some(Link::Send(tx));
                    links[j] = Some(Link::Recv(rx));
                }
                None => {
                    return Err(CarrackError::transfer(format!(
                        "send from {} to {} has no matching receive",
                        send.comm.inner.rank, send.peer
                    )));
                }
            }
        }
        if let Some(j) = links.iter().position(Option::is_none) {
            return Err(CarrackError::transfer(format!(
                "receive on {} from {} has no matching send",
                ops[j].comm.inner.rank, ops[j].peer
            )));
        }

        for (op, link) in ops.into_iter().zip(links.into_iter().flatten()) {
            CollectiveLibrary::enqueue(op, link)?;
        }
        Ok(())
    }
}

impl Drop for GroupScope<'_> {
    fn drop(&mut self) {
        if !self.finished && !self.ops.is_empty() {
            tracing::warn!(operations = self.ops.len(), "group scope dropped without finish");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use carrack_core::{ElementType, HostArray, RuntimeConfig};
    use std::time::Duration;

    fn library_is_idle(runtime: &DeviceRuntime) -> bool {
        runtime.collective().unwrap().state.lock().unmatched.is_empty()
    }

    async fn setup(n: u32) -> (Arc<DeviceRuntime>, Vec<CollectiveComm>) {
        let runtime = DeviceRuntime::new(&RuntimeConfig::testing(n)).unwrap();
        let library = runtime.collective().unwrap();
        let comms = library.init_all(&runtime, &runtime.devices()).unwrap();
        (runtime, comms)
    }

    #[tokio::test]
    async fn test_init_rejects_bad_device_sets() {
        let runtime = DeviceRuntime::new(&RuntimeConfig::testing(2)).unwrap();
        let library = runtime.collective().unwrap();
        assert_matches!(
            library.init_all(&runtime, &[]),
            Err(CarrackError::CommunicationInit { .. })
        );
        assert_matches!(
            library.init_all(&runtime, &[DeviceId(0), DeviceId(0)]),
            Err(CarrackError::CommunicationInit { .. })
        );
        assert_matches!(
            library.init_all(&runtime, &[DeviceId(0), DeviceId(9)]),
            Err(CarrackError::CommunicationInit { .. })
        );
    }

    #[tokio::test]
    async fn test_init_fault_reports_failure() {
        let runtime = DeviceRuntime::new(&RuntimeConfig::testing(3)).unwrap();
        let library = runtime.collective().unwrap();
        library.inject(CollectiveFault::Init {
            device: DeviceId(2),
        });
        assert_matches!(
            library.init_all(&runtime, &runtime.devices()),
            Err(CarrackError::CommunicationInit { .. })
        );
        library.clear_faults();
        assert_eq!(library.init_all(&runtime, &runtime.devices()).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_grouped_send_recv_moves_bytes() {
        let (runtime, comms) = setup(2).await;
        let d0 = runtime.device(DeviceId(0)).unwrap();
        let d1 = runtime.device(DeviceId(1)).unwrap();
        let host = HostArray::from_slice(&[4], &[1i64, 2, 3, 4]).unwrap();
        let src = d0.upload(&host).unwrap();
        let dst = d1.empty(ElementType::Int64, &[4]).unwrap();

        let library = runtime.collective().unwrap();
        let mut group = library.group();
        group.send(&comms[0], &src, 4, WireDataType::Int64, PeerId(1), d0.default_stream());
        group.recv(&comms[1], &dst, 4, WireDataType::Int64, PeerId(0), d1.default_stream());
        group.finish().unwrap();

        d1.synchronize().await.unwrap();
        assert_eq!(dst.read_bytes(), host.bytes());
    }

    #[tokio::test]
    async fn test_unmatched_group_submits_nothing() {
        let (runtime, comms) = setup(2).await;
        let d0 = runtime.device(DeviceId(0)).unwrap();
        let src = d0.empty(ElementType::Float32, &[3]).unwrap();

        let library = runtime.collective().unwrap();
        let mut group = library.group();
        group.send(&comms[0], &src, 3, WireDataType::Float32, PeerId(1), d0.default_stream());
        assert_matches!(group.finish(), Err(CarrackError::Transfer { .. }));

        d0.synchronize().await.unwrap();
        assert!(d0.default_stream().error().is_none());
    }

    #[tokio::test]
    async fn test_send_fault_and_abort() {
        let (runtime, comms) = setup(2).await;
        let d0 = runtime.device(DeviceId(0)).unwrap();
        let src = d0.empty(ElementType::UInt8, &[8]).unwrap();
        let library = runtime.collective().unwrap();

        library.inject(CollectiveFault::Send {
            device: DeviceId(0),
        });
        assert_matches!(
            comms[0].send(&src, 8, WireDataType::UInt8, PeerId(1), d0.default_stream()),
            Err(CarrackError::Transfer { .. })
        );
        library.clear_faults();

        comms[0].abort();
        assert!(comms[0].is_aborted());
        assert_matches!(
            comms[0].send(&src, 8, WireDataType::UInt8, PeerId(1), d0.default_stream()),
            Err(CarrackError::Transfer { .. })
        );
    }

    #[tokio::test]
    async fn test_group_pairs_hold_under_reversed_execution() {
        let (runtime, comms) = setup(2).await;
        let library = runtime.collective().unwrap();
        let d0 = runtime.device(DeviceId(0)).unwrap();
        let d1 = runtime.device(DeviceId(1)).unwrap();
        let (slow, fast) = (d0.create_stream().unwrap(), d0.create_stream().unwrap());
        slow.enqueue_delay(Duration::from_millis(30)).unwrap();

        let first = d0.upload(&HostArray::from_slice(&[4], &[1i32; 4]).unwrap()).unwrap();
        let second = d0.upload(&HostArray::from_slice(&[4], &[2i32; 4]).unwrap()).unwrap();
        let landed: Vec<DeviceArray> = [(&first, &slow), (&second, &fast)]
            .into_iter()
            .map(|(src, stream)| {
                let dst = d1.empty(ElementType::Int32, &[4]).unwrap();
                let mut group = library.group();
                group.send(&comms[0], src, 4, WireDataType::Int32, PeerId(1), stream);
                group.recv(&comms[1], &dst, 4, WireDataType::Int32, PeerId(0), d1.default_stream());
                group.finish().unwrap();
                dst
            })
            .collect();

        d1.synchronize().await.unwrap();
        assert_eq!(landed[0].read_bytes(), first.read_bytes());
        assert_eq!(landed[1].read_bytes(), second.read_bytes());
    }

    #[tokio::test]
    async fn test_ungrouped_operations_pair_in_posting_order() {
        let (runtime, comms) = setup(2).await;
        let d0 = runtime.device(DeviceId(0)).unwrap();
        let d1 = runtime.device(DeviceId(1)).unwrap();
        let (slow, fast) = (d0.create_stream().unwrap(), d0.create_stream().unwrap());
        slow.enqueue_delay(Duration::from_millis(30)).unwrap();

        let first = d0.upload(&HostArray::from_slice(&[2], &[7u64, 8]).unwrap()).unwrap();
        let second = d0.upload(&HostArray::from_slice(&[2], &[9u64, 10]).unwrap()).unwrap();
        let (a, b) = (
            d1.empty(ElementType::UInt64, &[2]).unwrap(),
            d1.empty(ElementType::UInt64, &[2]).unwrap(),
        );
        comms[1].recv(&a, 2, WireDataType::UInt64, PeerId(0), d1.default_stream()).unwrap();
        comms[1].recv(&b, 2, WireDataType::UInt64, PeerId(0), d1.default_stream()).unwrap();
        comms[0].send(&first, 2, WireDataType::UInt64, PeerId(1), &slow).unwrap();
        comms[0].send(&second, 2, WireDataType::UInt64, PeerId(1), &fast).unwrap();

        d1.synchronize().await.unwrap();
        assert_eq!(a.read_bytes(), first.read_bytes());
        assert_eq!(b.read_bytes(), second.read_bytes());
        assert!(library_is_idle(&runtime));
    }

    #[tokio::test]
    async fn test_skipped_send_fails_its_receive() {
        let (runtime, comms) = setup(2).await;
        let library = runtime.collective().unwrap();
        let d0 = runtime.device(DeviceId(0)).unwrap();
        let d1 = runtime.device(DeviceId(1)).unwrap();
        let broken = d0.create_stream().unwrap();
        broken
            .enqueue("fail", || Err(CarrackError::internal("earlier kernel failed")))
            .unwrap();

        let src = d0.empty(ElementType::Float32, &[3]).unwrap();
        let dst = d1.empty(ElementType::Float32, &[3]).unwrap();
        let mut group = library.group();
        group.send(&comms[0], &src, 3, WireDataType::Float32, PeerId(1), &broken);
        group.recv(&comms[1], &dst, 3, WireDataType::Float32, PeerId(0), d1.default_stream());
        group.finish().unwrap();

        assert_matches!(d1.synchronize().await, Err(CarrackError::Transfer { .. }));
    }

    #[tokio::test]
    async fn test_abort_releases_waiting_receives() {
        let (runtime, comms) = setup(2).await;
        let d1 = runtime.device(DeviceId(1)).unwrap();
        let dst = d1.empty(ElementType::UInt8, &[4]).unwrap();
        comms[1].recv(&dst, 4, WireDataType::UInt8, PeerId(0), d1.default_stream()).unwrap();
        assert!(!library_is_idle(&runtime));

        comms[0].abort();

        assert!(library_is_idle(&runtime));
        assert_matches!(d1.synchronize().await, Err(CarrackError::Transfer { .. }));
    }

    #[tokio::test]
    async fn test_invalid_peer_is_rejected() {
        let (runtime, comms) = setup(2).await;
        let d0 = runtime.device(DeviceId(0)).unwrap();
        let src = d0.empty(ElementType::UInt8, &[8]).unwrap();
        assert_matches!(
            comms[0].send(&src, 8, WireDataType::UInt8, PeerId(5), d0.default_stream()),
            Err(CarrackError::Transfer { .. })
        );
    }
}
