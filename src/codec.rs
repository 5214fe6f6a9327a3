//! Session description token codec
//!
//! A [`SessionDescription`] travels between the two peers by hand: as the
//! `invite` query value of a link, or as a response code pasted into the
//! other side. The token is the description's JSON form (the same shape a
//! browser produces for `RTCSessionDescription.toJSON()`) encoded as
//! URL-safe base64 without padding, so it survives URLs, chat clients and
//! clipboards unchanged.
//!
//! Decoding is lenient about the alphabet (standard or URL-safe, padded or
//! not) but strict about structure: the payload must be a JSON object with a
//! `type` of `offer` or `answer` and a string `sdp`.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which half of the exchange a description is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

impl SdpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SdpType::Offer => "offer",
            SdpType::Answer => "answer",
        }
    }
}

impl std::fmt::Display for SdpType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signaling payload produced by the peer-connection capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Reasons a token fails to decode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedTokenError {
    #[error("token is empty")]
    Empty,
    #[error("token is not valid base64: {0}")]
    Encoding(String),
    #[error("token does not contain a session description: {0}")]
    Json(String),
    #[error("unsupported description type `{0}`")]
    UnsupportedType(String),
    #[error("expected an {expected} but the token holds an {found}")]
    UnexpectedType { expected: SdpType, found: SdpType },
}

#[derive(Deserialize)]
struct RawDescription {
    #[serde(rename = "type")]
    sdp_type: String,
    sdp: String,
}

/// Encode a description into a transport-safe token.
pub fn encode(description: &SessionDescription) -> String {
    // Display on a json Value cannot fail, unlike to_vec on a Serialize impl.
    let json = serde_json::json!({
        "type": description.sdp_type.as_str(),
        "sdp": description.sdp,
    })
    .to_string();
    URL_SAFE_NO_PAD.encode(json.as_bytes())
}

/// Decode a token produced by [`encode`] (or by a browser's `btoa`).
pub fn decode(token: &str) -> Result<SessionDescription, MalformedTokenError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(MalformedTokenError::Empty);
    }

    let bytes = decode_base64(token)?;
    let raw: RawDescription = serde_json::from_slice(&bytes)
        .map_err(|e| MalformedTokenError::Json(e.to_string()))?;

    let sdp_type = match raw.sdp_type.as_str() {
        "offer" => SdpType::Offer,
        "answer" => SdpType::Answer,
        other => return Err(MalformedTokenError::UnsupportedType(other.to_string())),
    };

    Ok(SessionDescription {
        sdp_type,
        sdp: raw.sdp,
    })
}

/// Decode a token and require a specific description type.
pub fn decode_as(token: &str, expected: SdpType) -> Result<SessionDescription, MalformedTokenError> {
    let description = decode(token)?;
    if description.sdp_type != expected {
        return Err(MalformedTokenError::UnexpectedType {
            expected,
            found: description.sdp_type,
        });
    }
    Ok(description)
}

fn decode_base64(token: &str) -> Result<Vec<u8>, MalformedTokenError> {
    let standard_alphabet = token.contains(['+', '/']);
    let padded = token.ends_with('=');
    let engine = match (standard_alphabet, padded) {
        (true, true) => &STANDARD,
        (true, false) => &STANDARD_NO_PAD,
        (false, true) => &URL_SAFE,
        (false, false) => &URL_SAFE_NO_PAD,
    };
    engine
        .decode(token)
        .map_err(|e| MalformedTokenError::Encoding(e.to_string()))
}
