//! The process-wide stream registry.
//!
//! The first producer for a stream id creates the [StreamEntry] (queue, shaper task,
//! fan-out) and owns its teardown; later producers feed the shared queue. All registry
//! mutations happen under one lock so create-if-absent is race-free.

use std::{
	collections::{hash_map, HashMap},
	fmt,
	ops::Deref,
	sync::{
		atomic::{AtomicBool, AtomicU64, Ordering},
		Arc,
	},
};

use parking_lot::Mutex;

use crate::{
	frame_queue, Error, Frame, FrameQueue, PacketShaper, RelayProducer, RelaySubscriber, Result,
	QUEUE_CAPACITY,
};

static PRODUCER_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Identifies one producer attachment, for teardown ownership checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProducerId(u64);

impl ProducerId {
	#[allow(clippy::new_without_default)]
	pub fn new() -> Self {
		Self(PRODUCER_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
	}
}

impl fmt::Display for ProducerId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "producer-{}", self.0)
	}
}

/// A validated stream identifier: any non-empty string, compared byte-wise.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(Arc<str>);

impl StreamId {
	pub fn new<S: AsRef<str>>(id: S) -> Result<Self> {
		let id = id.as_ref();
		if id.is_empty() {
			return Err(Error::InvalidStreamId);
		}

		Ok(Self(id.into()))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl Deref for StreamId {
	type Target = str;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

impl fmt::Display for StreamId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Per-stream state: the ingest queue, the fan-out, and the owning producer.
///
/// Cloneable; all clones share the same underlying stream.
#[derive(Clone)]
pub struct StreamEntry {
	id: StreamId,
	queue: FrameQueue,
	relay: RelayProducer,
	ended: Arc<AtomicBool>,
	owner: ProducerId,
}

impl StreamEntry {
	fn create(id: StreamId, owner: ProducerId) -> Self {
		let (queue, consumer) = frame_queue(QUEUE_CAPACITY);
		let relay = RelayProducer::new();

		// The shaper is pinned to one task so packets keep queue order.
		tokio::spawn(Self::pump(id.clone(), PacketShaper::new(consumer), relay.clone()));

		Self {
			id,
			queue,
			relay,
			ended: Default::default(),
			owner,
		}
	}

	async fn pump(id: StreamId, mut shaper: PacketShaper, relay: RelayProducer) {
		while let Some(packet) = shaper.next().await {
			relay.publish(packet);
		}

		relay.close();
		tracing::debug!(stream = %id, "source track ended");
	}

	pub fn id(&self) -> &StreamId {
		&self.id
	}

	/// Feed one ingest frame into the stream.
	pub fn push_frame(&self, frame: Frame) {
		self.queue.push(frame);
	}

	/// Frames dropped by the ingest queue due to overflow.
	pub fn dropped_frames(&self) -> u64 {
		self.queue.dropped()
	}

	/// True once the owning producer departed. Monotonic.
	pub fn is_ended(&self) -> bool {
		self.ended.load(Ordering::Acquire)
	}

	/// Attach a subscriber at the live edge.
	pub fn subscribe(&self) -> Result<RelaySubscriber> {
		if self.is_ended() {
			return Err(Error::Ended);
		}

		Ok(self.relay.subscribe())
	}

	fn end(&self) {
		self.ended.store(true, Ordering::Release);
		self.queue.finish();
	}
}

/// The process-wide map from [StreamId] to [StreamEntry].
#[derive(Clone, Default)]
pub struct Registry {
	streams: Arc<Mutex<HashMap<StreamId, StreamEntry>>>,
}

impl Registry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Attach a producer, creating the stream when absent.
	///
	/// Returns the entry plus whether this call created it. Exactly one concurrent
	/// caller per id observes true; only that creator owns teardown. Later producers
	/// feed the shared queue and share its rebased timeline.
	pub fn attach_producer(&self, id: StreamId, owner: ProducerId) -> (StreamEntry, bool) {
		let mut streams = self.streams.lock();

		match streams.entry(id) {
			hash_map::Entry::Occupied(occupied) => (occupied.get().clone(), false),
			hash_map::Entry::Vacant(vacant) => {
				let entry = StreamEntry::create(vacant.key().clone(), owner);
				vacant.insert(entry.clone());
				(entry, true)
			}
		}
	}

	/// A snapshot of a live stream, used by subscriber signaling.
	pub fn lookup(&self, id: &StreamId) -> Option<StreamEntry> {
		self.streams.lock().get(id).cloned()
	}

	/// Detach a producer, tearing the stream down when the owner matches.
	///
	/// The source is signaled to end before the entry leaves the registry, under the
	/// same lock, so a subscribe through the registry never observes an ended entry.
	/// Detaching a non-owner is a no-op.
	pub fn detach_producer(&self, id: &StreamId, owner: ProducerId) -> Option<StreamEntry> {
		let mut streams = self.streams.lock();

		match streams.get(id) {
			Some(entry) if entry.owner == owner => entry.end(),
			_ => return None,
		}

		streams.remove(id)
	}

	/// The number of live streams.
	pub fn len(&self) -> usize {
		self.streams.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.streams.lock().is_empty()
	}

	/// End every stream. Used on shutdown.
	pub fn close_all(&self) {
		let mut streams = self.streams.lock();
		for entry in streams.values() {
			entry.end();
		}

		streams.clear();
	}
}
