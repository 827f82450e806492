//! # fanout: a multi-stream H.264 relay core
//!
//! One producer per stream delivers pre-encoded Annex-B access units; any number of
//! subscribers receive the same stream with rebased timestamps and keyframe marking.
//! Nothing is transcoded.
//!
//! ## API
//!
//! The API is built around per-stream producer/consumer pairs:
//! - [Registry]: the process-wide map from [StreamId] to [StreamEntry].
//! - [FrameQueue]: the bounded ingest queue feeding a stream, with a drop-oldest policy.
//! - [PacketShaper]: turns queued frames into timestamped [Packet]s on a 90 kHz clock.
//! - [RelayProducer] / [RelaySubscriber]: the one-to-many fan-out; every subscriber
//!   advances independently and late joiners start at the live edge.
//!
//! A producer calls [Registry::attach_producer] and pushes frames via
//! [StreamEntry::push_frame]. The first producer for a stream id creates the entry and
//! owns its teardown through [Registry::detach_producer]; subscribers obtain a
//! [RelaySubscriber] via [StreamEntry::subscribe] and read packets until the source ends.

mod error;
mod h264;
mod packet;
mod queue;
mod registry;
mod relay;
mod shaper;

pub use error::*;
pub use h264::*;
pub use packet::*;
pub use queue::*;
pub use registry::*;
pub use relay::*;
pub use shaper::*;
