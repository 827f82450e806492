use crate::{FrameQueueConsumer, Packet, CLOCK_RATE};

// An arrival this far before the anchor means the producer clock jumped backwards.
const RESET_THRESHOLD_NS: i64 = 500_000_000;

/// Converts queued ingest frames into a finite, ordered sequence of [Packet]s.
///
/// Timestamps are rebased to the arrival time of the first shaped frame, so subscribers
/// share one presentation timeline without any clock negotiation with the producer.
pub struct PacketShaper {
	queue: FrameQueueConsumer,

	// Arrival timestamp of the first shaped frame, set lazily.
	anchor_ns: Option<u64>,
}

impl PacketShaper {
	pub fn new(queue: FrameQueueConsumer) -> Self {
		Self { queue, anchor_ns: None }
	}

	/// The next shaped packet, or None once the stream terminated.
	///
	/// A frame that fails to shape is skipped; a single bad frame never ends the stream.
	pub async fn next(&mut self) -> Option<Packet> {
		loop {
			let frame = self.queue.next().await?;
			let pts = self.rebase(frame.arrival_ns);

			match Packet::new(frame.payload, pts) {
				Ok(packet) => return Some(packet),
				Err(err) => tracing::warn!(%err, "dropping frame"),
			}
		}
	}

	fn rebase(&mut self, arrival_ns: u64) -> u32 {
		let anchor_ns = *self.anchor_ns.get_or_insert(arrival_ns);
		let mut elapsed_ns = arrival_ns as i64 - anchor_ns as i64;

		if elapsed_ns < -RESET_THRESHOLD_NS {
			// The producer clock jumped far backwards; restart the timeline here.
			tracing::warn!(arrival_ns, anchor_ns, "arrival predates anchor, re-anchoring");
			self.anchor_ns = Some(arrival_ns);
			elapsed_ns = 0;
		} else if elapsed_ns < 0 {
			elapsed_ns = 0;
		}

		// Convert to 90 kHz ticks, truncated toward zero, wrapping at 32 bits.
		((elapsed_ns as u128 * CLOCK_RATE as u128) / 1_000_000_000) as u32
	}
}

#[cfg(test)]
use futures::FutureExt;

#[cfg(test)]
impl PacketShaper {
	pub fn assert_packet(&mut self) -> Packet {
		self.next()
			.now_or_never()
			.expect("next packet would have blocked")
			.expect("stream terminated")
	}

	pub fn assert_terminated(&mut self) {
		assert!(self.next().now_or_never().expect("would have blocked").is_none());
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::{frame_queue, Frame, QUEUE_CAPACITY};

	const IDR: &[u8] = &[0, 0, 0, 1, 0x65, 0x88, 0x84, 0x00];
	const SLICE: &[u8] = &[0, 0, 0, 1, 0x41, 0x9a, 0x02];

	fn shaper() -> (crate::FrameQueue, PacketShaper) {
		let (queue, consumer) = frame_queue(QUEUE_CAPACITY);
		(queue, PacketShaper::new(consumer))
	}

	#[tokio::test]
	async fn rebased_timeline() {
		let (queue, mut shaper) = shaper();

		// Three frames at ~30fps; the first arrival anchors the timeline and each
		// 33,333,333ns step floors to 2999 ticks.
		queue.push(Frame::new(0, IDR));
		queue.push(Frame::new(33_333_333, IDR));
		queue.push(Frame::new(66_666_666, IDR));
		queue.finish();

		for expected in [0, 2999, 5999] {
			let packet = shaper.assert_packet();
			assert_eq!(packet.pts, expected);
			assert!(packet.keyframe);
		}

		shaper.assert_terminated();
	}

	#[tokio::test]
	async fn anchor_is_first_arrival() {
		let (queue, mut shaper) = shaper();

		queue.push(Frame::new(5_000_000_000, SLICE));
		queue.push(Frame::new(6_000_000_000, SLICE));

		assert_eq!(shaper.assert_packet().pts, 0);
		assert_eq!(shaper.assert_packet().pts, 90_000);
	}

	#[tokio::test]
	async fn clock_reset() {
		let (queue, mut shaper) = shaper();

		// A jump more than 500ms backwards restarts the timeline.
		queue.push(Frame::new(10_000_000_000, IDR));
		queue.push(Frame::new(5_000_000_000, IDR));
		queue.push(Frame::new(5_033_333_333, IDR));

		assert_eq!(shaper.assert_packet().pts, 0);
		assert_eq!(shaper.assert_packet().pts, 0);
		assert_eq!(shaper.assert_packet().pts, 2999);
	}

	#[tokio::test]
	async fn small_jitter_clamped() {
		let (queue, mut shaper) = shaper();

		// A jump of 100ms backwards is clamped to zero without moving the anchor.
		queue.push(Frame::new(1_000_000_000, SLICE));
		queue.push(Frame::new(900_000_000, SLICE));
		queue.push(Frame::new(1_033_333_333, SLICE));

		assert_eq!(shaper.assert_packet().pts, 0);
		assert_eq!(shaper.assert_packet().pts, 0);
		assert_eq!(shaper.assert_packet().pts, 2999);
	}

	#[tokio::test]
	async fn keyframe_flags_preserved() {
		let (queue, mut shaper) = shaper();

		queue.push(Frame::new(0, IDR));
		queue.push(Frame::new(33_333_333, SLICE));
		queue.finish();

		assert!(shaper.assert_packet().keyframe);
		assert!(!shaper.assert_packet().keyframe);
		shaper.assert_terminated();
	}
}
