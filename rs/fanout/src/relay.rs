//! The one-to-many fan-out, split into a [RelayProducer] and [RelaySubscriber] handle.
//!
//! Every subscriber advances an independent cursor over a shared window of recent
//! packets. A slow subscriber only ever loses its own oldest packets; it never blocks
//! the producer or its siblings. Late joiners start at the live edge.

use std::collections::VecDeque;

use tokio::sync::watch;

use crate::Packet;

/// Packets retained per stream for subscribers that fall behind.
pub const SUBSCRIBER_WINDOW: usize = 16;

#[derive(Default)]
struct State {
	// Recent packets, oldest first.
	window: VecDeque<Packet>,

	// +1 every time a packet is evicted from the front of the window.
	offset: u64,

	// Set once the source track ended.
	closed: bool,
}

impl State {
	fn tail(&self) -> u64 {
		self.offset + self.window.len() as u64
	}
}

/// The publish side of a per-stream fan-out. Cloneable.
#[derive(Clone)]
pub struct RelayProducer {
	state: watch::Sender<State>,
}

impl Default for RelayProducer {
	fn default() -> Self {
		Self::new()
	}
}

impl RelayProducer {
	pub fn new() -> Self {
		Self {
			state: watch::Sender::new(State::default()),
		}
	}

	/// Publish a packet to every active subscriber. Ignored once closed.
	pub fn publish(&self, packet: Packet) {
		self.state.send_if_modified(|state| {
			if state.closed {
				return false;
			}

			state.window.push_back(packet);
			if state.window.len() > SUBSCRIBER_WINDOW {
				state.window.pop_front();
				state.offset += 1;
			}

			true
		});
	}

	/// Signal end-of-stream to every subscriber. Idempotent.
	pub fn close(&self) {
		self.state.send_if_modified(|state| {
			if state.closed {
				return false;
			}

			state.closed = true;
			true
		});
	}

	pub fn is_closed(&self) -> bool {
		self.state.borrow().closed
	}

	/// Attach a subscriber at the live edge; packets already published are not replayed.
	pub fn subscribe(&self) -> RelaySubscriber {
		let cursor = self.state.borrow().tail();

		RelaySubscriber {
			state: self.state.subscribe(),
			cursor,
			skipped: 0,
		}
	}
}

/// An independent view over a stream's packet sequence.
pub struct RelaySubscriber {
	state: watch::Receiver<State>,

	// Absolute index of the next packet to deliver.
	cursor: u64,

	// Packets this subscriber missed by falling behind the window.
	skipped: u64,
}

impl RelaySubscriber {
	/// The next packet in publish order, or None once the source ended.
	///
	/// A subscriber that fell behind the retention window resumes at the oldest
	/// retained packet; the gap is counted, not delivered.
	pub async fn next(&mut self) -> Option<Packet> {
		loop {
			let cursor = self.cursor;
			let state = match self
				.state
				.wait_for(|state| state.closed || state.tail() > cursor)
				.await
			{
				Ok(state) => state,
				// The producer vanished without closing; same as closed.
				Err(_) => return None,
			};

			if self.cursor < state.offset {
				let gap = state.offset - self.cursor;
				tracing::debug!(gap, "subscriber behind, skipping ahead");
				self.skipped += gap;
				self.cursor = state.offset;
			}

			if let Some(packet) = state.window.get((self.cursor - state.offset) as usize) {
				self.cursor += 1;
				return Some(packet.clone());
			}

			if state.closed {
				return None;
			}
		}
	}

	/// Packets dropped for this subscriber because it fell behind.
	pub fn skipped(&self) -> u64 {
		self.skipped
	}
}

#[cfg(test)]
use futures::FutureExt;

#[cfg(test)]
impl RelaySubscriber {
	pub fn assert_packet(&mut self) -> Packet {
		self.next()
			.now_or_never()
			.expect("next packet would have blocked")
			.expect("relay closed")
	}

	pub fn assert_pending(&mut self) {
		assert!(self.next().now_or_never().is_none(), "next packet would not have blocked");
	}

	pub fn assert_closed(&mut self) {
		assert!(self.next().now_or_never().expect("would have blocked").is_none());
	}
}
