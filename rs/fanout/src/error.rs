/// A list of possible errors produced by the relay core.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
	/// The stream is not in the registry.
	#[error("not found")]
	NotFound,

	/// The stream's producer departed and the source track ended.
	#[error("stream ended")]
	Ended,

	/// Stream identifiers must be non-empty.
	#[error("invalid stream id")]
	InvalidStreamId,

	/// The frame could not be shaped into a packet.
	#[error("invalid frame")]
	InvalidFrame,
}

pub type Result<T> = std::result::Result<T, Error>;
