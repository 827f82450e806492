//! The ingest side: one WebSocket per producer, binary messages carrying one Annex-B
//! access unit each. The first producer for a stream id creates the stream and tears it
//! down on exit; any later producers just feed the shared queue.

use axum::{
	extract::{
		ws::{close_code, CloseFrame, Message, WebSocket},
		Path, State, WebSocketUpgrade,
	},
	response::Response,
};

use fanout::{now_ns, Frame, ProducerId, StreamId};

use crate::web::AppState;

/// Upgrade an ingest connection; the stream id rides in the path.
pub async fn upgrade(
	ws: WebSocketUpgrade,
	Path(stream_id): Path<String>,
	State(app): State<AppState>,
) -> Response {
	ws.on_upgrade(move |socket| async move {
		match StreamId::new(&stream_id) {
			Ok(id) => session(socket, id, app).await,
			Err(err) => {
				tracing::warn!(%err, "rejecting ingest");
				reject(socket, "invalid stream id").await;
			}
		}
	})
}

async fn reject(mut socket: WebSocket, reason: &'static str) {
	let frame = CloseFrame {
		code: close_code::POLICY,
		reason: reason.into(),
	};

	let _ = socket.send(Message::Close(Some(frame))).await;
}

/// One producer attachment: pump binary messages into the stream until the peer leaves.
#[tracing::instrument("ingest", skip_all, fields(stream = %id))]
async fn session(mut socket: WebSocket, id: StreamId, app: AppState) {
	let owner = ProducerId::new();
	let (entry, created) = app.registry.attach_producer(id.clone(), owner);

	if created {
		tracing::info!(%owner, "created stream");
	} else {
		tracing::info!(%owner, "feeding existing stream");
	}

	while let Some(message) = socket.recv().await {
		match message {
			Ok(Message::Binary(payload)) => entry.push_frame(Frame::new(now_ns(), payload)),
			// Text messages are reserved; log and move on.
			Ok(Message::Text(text)) => tracing::debug!(%text, "ignoring text message"),
			Ok(Message::Ping(_) | Message::Pong(_)) => {}
			Ok(Message::Close(_)) => break,
			Err(err) => {
				tracing::warn!(%err, "ingest socket error");
				break;
			}
		}
	}

	if created {
		app.registry.detach_producer(&id, owner);
		tracing::info!(dropped = entry.dropped_frames(), "stream ended");
	} else {
		tracing::debug!(%owner, "secondary producer left");
	}
}
