//! The per-stream ingest queue, split into a [FrameQueue] and [FrameQueueConsumer] handle.
//!
//! Producers never block: when the queue is at capacity the oldest frame is evicted and
//! counted. The queue carries a terminal marker ([FrameQueue::finish]) which is always the
//! last item the consumer observes; frames pushed after it are discarded.

use std::sync::{
	atomic::{AtomicBool, AtomicU64, Ordering},
	Arc,
};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

/// Per-stream maximum of buffered frames before the oldest is dropped.
pub const QUEUE_CAPACITY: usize = 60;

/// Nanoseconds since the unix epoch, stamped at ingest.
pub fn now_ns() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.unwrap_or_default()
		.as_nanos() as u64
}

/// A raw ingest frame: one binary message plus its arrival time at the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
	/// Arrival timestamp in nanoseconds, measured at the relay, not the producer.
	pub arrival_ns: u64,

	/// One H.264 Annex-B access unit.
	pub payload: Bytes,
}

impl Frame {
	pub fn new<B: Into<Bytes>>(arrival_ns: u64, payload: B) -> Self {
		Self {
			arrival_ns,
			payload: payload.into(),
		}
	}
}

/// Create a bounded frame queue with the drop-oldest overflow policy.
pub fn frame_queue(capacity: usize) -> (FrameQueue, FrameQueueConsumer) {
	let (tx, rx) = async_channel::bounded(capacity);

	let queue = FrameQueue {
		tx,
		evict: rx.clone(),
		ended: Default::default(),
		dropped: Default::default(),
	};

	(queue, FrameQueueConsumer { rx })
}

/// The producer side of the ingest queue.
///
/// Cloneable so multiple producer sessions can feed the same stream; pushes are
/// serialized by the channel and never block.
#[derive(Clone)]
pub struct FrameQueue {
	tx: async_channel::Sender<Option<Frame>>,

	// Held only to evict the head when the queue is full.
	evict: async_channel::Receiver<Option<Frame>>,

	ended: Arc<AtomicBool>,
	dropped: Arc<AtomicU64>,
}

impl FrameQueue {
	/// Append a frame, evicting the oldest when at capacity.
	///
	/// Discarded once [Self::finish] was called. Empty payloads are discarded too.
	pub fn push(&self, frame: Frame) {
		if self.ended.load(Ordering::Acquire) {
			return;
		}

		if frame.payload.is_empty() {
			tracing::debug!("discarding empty frame");
			return;
		}

		self.send(Some(frame));
	}

	/// Signal end-of-stream; the consumer will observe it after any buffered frames.
	///
	/// Idempotent and infallible: at capacity, a frame is evicted to make room.
	pub fn finish(&self) {
		if self.ended.swap(true, Ordering::AcqRel) {
			return;
		}

		self.send(None);
		self.tx.close();
	}

	/// The number of frames dropped due to overflow.
	pub fn dropped(&self) -> u64 {
		self.dropped.load(Ordering::Relaxed)
	}

	/// True once [Self::finish] was called.
	pub fn is_ended(&self) -> bool {
		self.ended.load(Ordering::Acquire)
	}

	fn send(&self, mut item: Option<Frame>) {
		loop {
			match self.tx.try_send(item) {
				Ok(()) => return,
				Err(async_channel::TrySendError::Full(back)) => {
					match self.evict.try_recv() {
						Ok(Some(_)) => {
							let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
							tracing::warn!(dropped, "queue full, dropped oldest frame");
							item = back;
						}
						// We stole the terminal marker from a racing finish();
						// put it back and forget the frame, the stream is over.
						Ok(None) => item = None,
						// The consumer drained the head in the meantime.
						Err(_) => item = back,
					}
				}
				// Closed after the terminal marker; nothing left to deliver.
				Err(async_channel::TrySendError::Closed(_)) => return,
			}
		}
	}
}

/// The sole consumer of a frame queue, owned by the stream's shaper.
pub struct FrameQueueConsumer {
	rx: async_channel::Receiver<Option<Frame>>,
}

impl FrameQueueConsumer {
	/// The next frame in FIFO order, or None once the stream terminated.
	pub async fn next(&mut self) -> Option<Frame> {
		match self.rx.recv().await {
			Ok(frame) => frame,
			Err(async_channel::RecvError) => None,
		}
	}
}

#[cfg(test)]
use futures::FutureExt;

#[cfg(test)]
impl FrameQueueConsumer {
	pub fn assert_frame(&mut self) -> Frame {
		self.next()
			.now_or_never()
			.expect("next frame would have blocked")
			.expect("queue terminated")
	}

	pub fn assert_pending(&mut self) {
		assert!(self.next().now_or_never().is_none(), "next frame would not have blocked");
	}

	pub fn assert_terminated(&mut self) {
		assert!(self.next().now_or_never().expect("would have blocked").is_none());
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn frame(seq: u64) -> Frame {
		Frame::new(seq * 1_000_000, vec![0, 0, 0, 1, 0x41, seq as u8])
	}

	#[tokio::test]
	async fn fifo() {
		let (queue, mut consumer) = frame_queue(QUEUE_CAPACITY);
		consumer.assert_pending();

		queue.push(frame(1));
		queue.push(frame(2));
		queue.push(frame(3));

		assert_eq!(consumer.assert_frame(), frame(1));
		assert_eq!(consumer.assert_frame(), frame(2));
		assert_eq!(consumer.assert_frame(), frame(3));
		consumer.assert_pending();
	}

	#[tokio::test]
	async fn overflow_drops_oldest() {
		let (queue, mut consumer) = frame_queue(QUEUE_CAPACITY);

		for seq in 1..=70 {
			queue.push(frame(seq));
		}

		// The first 10 frames were evicted; the 11th is now the head.
		assert_eq!(queue.dropped(), 10);
		assert_eq!(consumer.assert_frame(), frame(11));

		for seq in 12..=70 {
			assert_eq!(consumer.assert_frame(), frame(seq));
		}
		consumer.assert_pending();
	}

	#[tokio::test]
	async fn terminal_is_last() {
		let (queue, mut consumer) = frame_queue(QUEUE_CAPACITY);

		queue.push(frame(1));
		queue.finish();
		queue.push(frame(2));

		assert_eq!(consumer.assert_frame(), frame(1));
		consumer.assert_terminated();

		// Terminated queues stay terminated.
		consumer.assert_terminated();
	}

	#[tokio::test]
	async fn finish_idempotent() {
		let (queue, mut consumer) = frame_queue(QUEUE_CAPACITY);

		queue.finish();
		queue.finish();
		assert!(queue.is_ended());

		consumer.assert_terminated();
		consumer.assert_terminated();
	}

	#[tokio::test]
	async fn finish_when_full() {
		let (queue, mut consumer) = frame_queue(4);

		for seq in 1..=4 {
			queue.push(frame(seq));
		}
		queue.finish();

		// One frame was evicted to make room for the terminal marker.
		assert_eq!(queue.dropped(), 1);
		assert_eq!(consumer.assert_frame(), frame(2));
		assert_eq!(consumer.assert_frame(), frame(3));
		assert_eq!(consumer.assert_frame(), frame(4));
		consumer.assert_terminated();
	}

	#[tokio::test]
	async fn empty_payload_discarded() {
		let (queue, mut consumer) = frame_queue(QUEUE_CAPACITY);

		queue.push(Frame::new(0, Bytes::new()));
		consumer.assert_pending();
		assert_eq!(queue.dropped(), 0);
	}

	#[tokio::test]
	async fn cloned_producers_share_order() {
		let (queue, mut consumer) = frame_queue(QUEUE_CAPACITY);
		let other = queue.clone();

		queue.push(frame(1));
		other.push(frame(2));
		queue.push(frame(3));

		assert_eq!(consumer.assert_frame(), frame(1));
		assert_eq!(consumer.assert_frame(), frame(2));
		assert_eq!(consumer.assert_frame(), frame(3));

		// Either clone may finish; the drop counter is shared.
		other.finish();
		assert!(queue.is_ended());
		consumer.assert_terminated();
	}
}
