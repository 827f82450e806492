//! The signaling side: one HTTP POST per subscriber carrying an SDP offer, answered
//! with an SDP answer once the stream subscription and negotiation succeed.

use axum::{
	extract::{rejection::JsonRejection, Path, State},
	http::StatusCode,
	response::{IntoResponse, Response},
	Json,
};
use serde::{Deserialize, Serialize};

use fanout::{Error, StreamId};

use crate::web::AppState;

/// The signaling body: a bare SDP exchange.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SessionDescription {
	pub sdp: String,

	#[serde(rename = "type")]
	pub kind: String,
}

/// Failures surfaced to signaling clients.
#[derive(thiserror::Error, Debug)]
pub enum SignalError {
	#[error("invalid stream id")]
	InvalidStreamId,

	#[error("invalid offer: {0}")]
	InvalidOffer(String),

	#[error("unknown or ended stream")]
	UnknownStream,

	#[error("negotiation failed: {0}")]
	Negotiation(String),
}

impl SignalError {
	fn status(&self) -> StatusCode {
		match self {
			Self::InvalidStreamId | Self::InvalidOffer(_) => StatusCode::BAD_REQUEST,
			Self::UnknownStream => StatusCode::NOT_FOUND,
			Self::Negotiation(_) => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}
}

impl From<Error> for SignalError {
	fn from(err: Error) -> Self {
		match err {
			Error::InvalidStreamId => Self::InvalidStreamId,
			// Absent and ended streams are indistinguishable to subscribers.
			Error::NotFound | Error::Ended => Self::UnknownStream,
			err => Self::Negotiation(err.to_string()),
		}
	}
}

impl IntoResponse for SignalError {
	fn into_response(self) -> Response {
		tracing::warn!(err = %self, "signaling failed");

		let body = Json(serde_json::json!({ "error": self.to_string() }));
		(self.status(), body).into_response()
	}
}

/// Negotiate one egress session: look up the stream, subscribe at the live edge, run
/// the offer/answer exchange.
#[tracing::instrument("offer", skip_all, fields(stream = %stream_id))]
pub async fn offer(
	Path(stream_id): Path<String>,
	State(app): State<AppState>,
	body: Result<Json<SessionDescription>, JsonRejection>,
) -> Result<Json<SessionDescription>, SignalError> {
	let id = StreamId::new(&stream_id)?;

	let Json(request) = body.map_err(|err| SignalError::InvalidOffer(err.body_text()))?;
	if request.kind != "offer" {
		return Err(SignalError::InvalidOffer(format!(
			"expected type \"offer\", got {:?}",
			request.kind
		)));
	}

	let entry = app.registry.lookup(&id).ok_or(Error::NotFound)?;

	// The producer may have departed between lookup and subscribe.
	let subscriber = entry.subscribe()?;

	let answer = app
		.sessions
		.clone()
		.negotiate(&id, request.sdp, subscriber)
		.await
		.map_err(|err| SignalError::Negotiation(err.to_string()))?;

	tracing::info!("session negotiated");

	Ok(Json(SessionDescription {
		sdp: answer,
		kind: "answer".to_string(),
	}))
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn body_field_names() {
		let body: SessionDescription =
			serde_json::from_str(r#"{"sdp":"v=0\r\n","type":"offer"}"#).unwrap();
		assert_eq!(body.kind, "offer");
		assert_eq!(body.sdp, "v=0\r\n");

		let out = serde_json::to_value(SessionDescription {
			sdp: "v=0".into(),
			kind: "answer".into(),
		})
		.unwrap();
		assert_eq!(out["type"], "answer");
		assert_eq!(out["sdp"], "v=0");
	}

	#[test]
	fn error_statuses() {
		assert_eq!(SignalError::InvalidStreamId.status(), StatusCode::BAD_REQUEST);
		assert_eq!(SignalError::InvalidOffer("bad json".into()).status(), StatusCode::BAD_REQUEST);
		assert_eq!(SignalError::UnknownStream.status(), StatusCode::NOT_FOUND);
		assert_eq!(
			SignalError::Negotiation("engine".into()).status(),
			StatusCode::INTERNAL_SERVER_ERROR
		);
	}

	#[test]
	fn core_error_mapping() {
		// Absent and ended streams both surface as 404; bad ids as 400.
		assert_eq!(SignalError::from(Error::NotFound).status(), StatusCode::NOT_FOUND);
		assert_eq!(SignalError::from(Error::Ended).status(), StatusCode::NOT_FOUND);
		assert_eq!(SignalError::from(Error::InvalidStreamId).status(), StatusCode::BAD_REQUEST);
	}

	#[test]
	fn error_body_is_json() {
		let response = SignalError::UnknownStream.into_response();
		assert_eq!(response.status(), StatusCode::NOT_FOUND);
	}
}
