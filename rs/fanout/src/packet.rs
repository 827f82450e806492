use bytes::Bytes;

use crate::{h264, Error, Result};

/// The 90 kHz presentation clock conventionally used for H.264 in real-time sessions.
pub const CLOCK_RATE: u32 = 90_000;

/// A rational time base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBase {
	pub numer: u32,
	pub denom: u32,
}

/// One tick per 1/90000th of a second.
pub const VIDEO_TIME_BASE: TimeBase = TimeBase {
	numer: 1,
	denom: CLOCK_RATE,
};

/// A shaped media packet: one access unit with a rebased presentation timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
	/// The Annex-B payload, unmodified from ingest.
	pub payload: Bytes,

	/// Presentation timestamp in [CLOCK_RATE] ticks, wrapping at 32 bits.
	pub pts: u32,

	pub time_base: TimeBase,

	/// True when the access unit leads with an IDR slice.
	pub keyframe: bool,
}

impl Packet {
	/// Shape a packet out of an ingest payload, classifying the keyframe status.
	///
	/// The payload is not copied.
	pub fn new(payload: Bytes, pts: u32) -> Result<Self> {
		if payload.is_empty() {
			return Err(Error::InvalidFrame);
		}

		let keyframe = h264::is_keyframe(&payload);

		Ok(Self {
			payload,
			pts,
			time_base: VIDEO_TIME_BASE,
			keyframe,
		})
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn keyframe_classification() {
		let idr = Packet::new(Bytes::from_static(&[0, 0, 0, 1, 0x65, 0x88]), 0).unwrap();
		assert!(idr.keyframe);
		assert_eq!(idr.time_base, VIDEO_TIME_BASE);

		let slice = Packet::new(Bytes::from_static(&[0, 0, 1, 0x41, 0x9a]), 2999).unwrap();
		assert!(!slice.keyframe);
		assert_eq!(slice.pts, 2999);
	}

	#[test]
	fn opaque_payload() {
		// No start code: forwarded as-is, never marked as a keyframe.
		let packet = Packet::new(Bytes::from_static(&[0x65, 0x88, 0x84]), 0).unwrap();
		assert!(!packet.keyframe);
	}

	#[test]
	fn empty_rejected() {
		assert_eq!(Packet::new(Bytes::new(), 0), Err(Error::InvalidFrame));
	}
}
