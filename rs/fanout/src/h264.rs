//! Just enough Annex-B parsing to classify an access unit: find the first start code,
//! read the NAL header byte, and mask out the unit type.

use num_enum::TryFromPrimitive;

/// The low 5 bits of the NAL header byte.
pub const NAL_TYPE_MASK: u8 = 0x1f;

/// NAL unit types, per ITU-T H.264 table 7-1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum NalUnitType {
	NonIdrSlice = 1,
	PartitionA = 2,
	PartitionB = 3,
	PartitionC = 4,
	IdrSlice = 5,
	Sei = 6,
	Sps = 7,
	Pps = 8,
	AccessUnitDelimiter = 9,
	EndOfSequence = 10,
	EndOfStream = 11,
	Filler = 12,
}

/// Strip a leading Annex-B start code (4-byte or 3-byte), returning the first NAL unit.
///
/// Returns None when no start code is recognized or nothing follows it.
pub fn first_nal(payload: &[u8]) -> Option<&[u8]> {
	let rest = if payload.starts_with(&[0, 0, 0, 1]) {
		&payload[4..]
	} else if payload.starts_with(&[0, 0, 1]) {
		&payload[3..]
	} else {
		return None;
	};

	(!rest.is_empty()).then_some(rest)
}

/// The type of the first NAL unit in an Annex-B access unit, if recognizable.
pub fn first_nal_type(payload: &[u8]) -> Option<NalUnitType> {
	let nal = first_nal(payload)?;
	NalUnitType::try_from(nal[0] & NAL_TYPE_MASK).ok()
}

/// An access unit counts as a keyframe when it leads with an IDR slice.
pub fn is_keyframe(payload: &[u8]) -> bool {
	first_nal_type(payload) == Some(NalUnitType::IdrSlice)
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn long_start_code() {
		assert_eq!(first_nal_type(&[0, 0, 0, 1, 0x65, 0x88]), Some(NalUnitType::IdrSlice));
		assert!(is_keyframe(&[0, 0, 0, 1, 0x65, 0x88]));
	}

	#[test]
	fn short_start_code() {
		assert_eq!(first_nal_type(&[0, 0, 1, 0x41, 0x9a]), Some(NalUnitType::NonIdrSlice));
		assert!(!is_keyframe(&[0, 0, 1, 0x41, 0x9a]));
	}

	#[test]
	fn nri_bits_ignored() {
		// 0x25 and 0x65 are both IDR slices; only the low 5 bits matter.
		assert!(is_keyframe(&[0, 0, 0, 1, 0x25]));
		assert!(is_keyframe(&[0, 0, 0, 1, 0x65]));
	}

	#[test]
	fn leading_parameter_set() {
		// An access unit starting with an SPS is not classified as a keyframe.
		assert_eq!(first_nal_type(&[0, 0, 0, 1, 0x67, 0x42]), Some(NalUnitType::Sps));
		assert!(!is_keyframe(&[0, 0, 0, 1, 0x67, 0x42]));
	}

	#[test]
	fn no_start_code() {
		assert_eq!(first_nal(&[0x65, 0x88, 0x84]), None);
		assert!(!is_keyframe(&[0x65, 0x88, 0x84]));
	}

	#[test]
	fn truncated() {
		assert_eq!(first_nal(&[0, 0, 0, 1]), None);
		assert_eq!(first_nal(&[0, 0, 1]), None);
		assert_eq!(first_nal(&[]), None);
		assert!(!is_keyframe(&[0, 0, 0, 1]));
	}

	#[test]
	fn unknown_type() {
		// Type 17 is reserved; unrecognized units are simply not keyframes.
		assert_eq!(first_nal_type(&[0, 0, 0, 1, 0x11]), None);
		assert!(!is_keyframe(&[0, 0, 0, 1, 0x11]));
	}
}
