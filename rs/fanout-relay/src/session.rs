//! Binds negotiated WebRTC sessions to relay subscribers.
//!
//! Each session owns its peer connection and the task feeding the outbound track.
//! Transport observers never hold the session directly; they carry a session id back
//! into [Sessions], which makes teardown idempotent no matter how many observers fire.

use std::{
	collections::HashMap,
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc,
	},
	time::Duration,
};

use anyhow::Context;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use webrtc::{
	api::{
		interceptor_registry::register_default_interceptors,
		media_engine::{MediaEngine, MIME_TYPE_H264},
		APIBuilder, API,
	},
	ice_transport::ice_connection_state::RTCIceConnectionState,
	interceptor::registry::Registry,
	media::Sample,
	peer_connection::{
		configuration::RTCConfiguration, peer_connection_state::RTCPeerConnectionState,
		sdp::session_description::RTCSessionDescription, RTCPeerConnection,
	},
	rtp_transceiver::{
		rtp_codec::{RTCRtpCodecCapability, RTPCodecType},
		rtp_transceiver_direction::RTCRtpTransceiverDirection,
		RTCRtpTransceiverInit,
	},
	track::track_local::{track_local_static_sample::TrackLocalStaticSample, TrackLocal},
};

use fanout::{RelaySubscriber, StreamId, CLOCK_RATE};

// Sample durations fall back to one frame at ~30fps when timestamps stall.
const DEFAULT_FRAME_DURATION: Duration = Duration::from_millis(33);

struct Session {
	peer: Arc<RTCPeerConnection>,
	pump: JoinHandle<()>,
}

/// All active egress sessions, keyed by a numeric session id.
pub struct Sessions {
	api: API,
	next: AtomicU64,
	active: Mutex<HashMap<u64, Session>>,
}

impl Sessions {
	pub fn new() -> anyhow::Result<Self> {
		let mut media = MediaEngine::default();
		media.register_default_codecs()?;

		let interceptors = register_default_interceptors(Registry::new(), &mut media)?;

		let api = APIBuilder::new()
			.with_media_engine(media)
			.with_interceptor_registry(interceptors)
			.build();

		Ok(Self {
			api,
			next: AtomicU64::new(0),
			active: Mutex::new(HashMap::new()),
		})
	}

	/// Run the offer/answer exchange for one subscriber, returning the answer SDP.
	///
	/// On any failure the session is torn down before the error is reported, so a
	/// rejected negotiation leaks nothing.
	#[tracing::instrument("session", skip_all, fields(stream = %stream, id = tracing::field::Empty))]
	pub async fn negotiate(
		self: Arc<Self>,
		stream: &StreamId,
		offer_sdp: String,
		subscriber: RelaySubscriber,
	) -> anyhow::Result<String> {
		let id = self.next.fetch_add(1, Ordering::Relaxed);
		tracing::Span::current().record("id", id);

		let peer = Arc::new(self.api.new_peer_connection(RTCConfiguration::default()).await?);

		let track = Arc::new(TrackLocalStaticSample::new(
			RTCRtpCodecCapability {
				mime_type: MIME_TYPE_H264.to_owned(),
				clock_rate: CLOCK_RATE,
				sdp_fmtp_line: "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"
					.to_owned(),
				..Default::default()
			},
			"video".to_owned(),
			format!("fanout-{stream}"),
		));

		let pump = tokio::spawn(Self::pump(self.clone(), id, subscriber, track.clone()));
		self.active.lock().insert(id, Session { peer: peer.clone(), pump });

		Self::observe(&self, id, &peer);

		match Self::establish(&peer, track, &offer_sdp).await {
			Ok(answer) => Ok(answer),
			Err(err) => {
				// The failed session must not leak; close before reporting.
				self.cleanup(id).await;
				Err(err)
			}
		}
	}

	async fn establish(
		peer: &Arc<RTCPeerConnection>,
		track: Arc<TrackLocalStaticSample>,
		offer_sdp: &str,
	) -> anyhow::Result<String> {
		let offer = RTCSessionDescription::offer(offer_sdp.to_owned())?;

		let init = RTCRtpTransceiverInit {
			direction: RTCRtpTransceiverDirection::Sendonly,
			send_encodings: Vec::new(),
		};
		let transceiver = peer
			.add_transceiver_from_track(track as Arc<dyn TrackLocal + Send + Sync>, Some(init))
			.await?;

		// The sender must be drained or the interceptors stop processing RTCP.
		let sender = transceiver.sender().await;
		tokio::spawn(async move {
			let mut buf = vec![0u8; 1500];
			while sender.read(&mut buf).await.is_ok() {}
		});

		// Answer with a matching inactive audio section when the offer advertises one.
		if wants_audio(offer_sdp) {
			let init = RTCRtpTransceiverInit {
				direction: RTCRtpTransceiverDirection::Inactive,
				send_encodings: Vec::new(),
			};
			peer.add_transceiver_from_kind(RTPCodecType::Audio, Some(init)).await?;
		}

		peer.set_remote_description(offer).await?;
		let answer = peer.create_answer(None).await?;

		// Wait out ICE gathering so the answer carries its candidates; there is no
		// trickle path back to the subscriber after this response.
		let mut gathered = peer.gathering_complete_promise().await;
		peer.set_local_description(answer).await?;
		let _ = gathered.recv().await;

		let answer = peer.local_description().await.context("missing local description")?;

		Ok(answer.sdp)
	}

	fn observe(this: &Arc<Self>, id: u64, peer: &RTCPeerConnection) {
		let sessions = this.clone();
		peer.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
			tracing::debug!(session = id, %state, "connection state changed");
			let sessions = sessions.clone();
			Box::pin(async move {
				if matches!(
					state,
					RTCPeerConnectionState::Failed
						| RTCPeerConnectionState::Closed
						| RTCPeerConnectionState::Disconnected
				) {
					sessions.cleanup(id).await;
				}
			})
		}));

		let sessions = this.clone();
		peer.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
			tracing::debug!(session = id, %state, "ice state changed");
			let sessions = sessions.clone();
			Box::pin(async move {
				if matches!(
					state,
					RTCIceConnectionState::Failed
						| RTCIceConnectionState::Closed
						| RTCIceConnectionState::Disconnected
				) {
					sessions.cleanup(id).await;
				}
			})
		}));
	}

	/// Feed relayed packets into the outbound track until the source or transport ends.
	async fn pump(
		sessions: Arc<Sessions>,
		id: u64,
		mut subscriber: RelaySubscriber,
		track: Arc<TrackLocalStaticSample>,
	) {
		let mut last_pts = None;

		while let Some(packet) = subscriber.next().await {
			// Samples carry durations; derive them from consecutive timestamps.
			let ticks = match last_pts.replace(packet.pts) {
				Some(prev) => packet.pts.wrapping_sub(prev),
				None => 0,
			};
			let duration = match ticks {
				0 => DEFAULT_FRAME_DURATION,
				ticks => Duration::from_nanos(ticks as u64 * 1_000_000_000 / CLOCK_RATE as u64),
			};

			let sample = Sample {
				data: packet.payload,
				duration,
				..Default::default()
			};

			if let Err(err) = track.write_sample(&sample).await {
				tracing::debug!(session = id, %err, "write failed, ending session");
				break;
			}
		}

		tracing::debug!(session = id, skipped = subscriber.skipped(), "track finished");

		// The source ended or the transport failed. Finish teardown on a fresh task so
		// aborting this one cannot interrupt the close.
		tokio::spawn(async move { sessions.cleanup(id).await });
	}

	/// Tear down one session: stop its pump, close its peer, drop all references.
	///
	/// Safe to call from any number of observers; the first caller wins.
	pub async fn cleanup(&self, id: u64) {
		let Some(session) = self.active.lock().remove(&id) else {
			return;
		};

		tracing::info!(session = id, "closing session");
		session.pump.abort();

		if let Err(err) = session.peer.close().await {
			tracing::warn!(session = id, %err, "error closing peer");
		}
	}

	/// Close every active session. Used on shutdown.
	pub async fn close_all(&self) {
		let sessions: Vec<Session> = self.active.lock().drain().map(|(_, session)| session).collect();
		if sessions.is_empty() {
			return;
		}

		tracing::info!(count = sessions.len(), "closing all sessions");
		for session in sessions {
			session.pump.abort();
			let _ = session.peer.close().await;
		}
	}

	/// The number of active sessions.
	pub fn len(&self) -> usize {
		self.active.lock().len()
	}
}

/// True when the offer carries an audio media section.
fn wants_audio(sdp: &str) -> bool {
	sdp.lines().any(|line| line.starts_with("m=audio"))
}
