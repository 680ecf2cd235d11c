//! Media-engine capability consumed by the signaling core.
//!
//! The coordinator never fabricates negotiation payloads itself; it asks the
//! engine for them through this trait and only stores the returned
//! identifiers. The trait is object-safe so the server can hold
//! `Arc<dyn MediaEngine>` and tests can swap in a fake.

mod webrtc;

pub use self::webrtc::WebRtcMediaEngine;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaEngineError {
    #[error("transport {0} not found in engine")]
    TransportNotFound(String),

    #[error("negotiation failed: {0}")]
    Negotiation(String),

    #[error(transparent)]
    WebRtc(#[from] ::webrtc::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportDirection {
    Send,
    Recv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceParameters {
    pub username_fragment: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub foundation: String,
    pub component: u16,
    pub protocol: String,
    pub priority: u32,
    pub ip: String,
    pub port: u16,
    #[serde(rename = "type")]
    pub candidate_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fingerprint {
    pub algorithm: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DtlsParameters {
    pub role: String,
    pub fingerprints: Vec<Fingerprint>,
}

/// Engine-allocated transport and its negotiation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportOptions {
    pub id: String,
    pub ice_parameters: IceParameters,
    pub ice_candidates: Vec<IceCandidate>,
    pub dtls_parameters: DtlsParameters,
}

/// Engine-allocated producer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerOptions {
    pub id: String,
}

/// RTP parameters are opaque to the coordinator; the engine interprets them.
pub type RtpParameters = serde_json::Value;

pub trait MediaEngine: Send + Sync {
    /// Allocate a transport and return its negotiation parameters.
    fn create_transport(
        &self,
        direction: TransportDirection,
    ) -> BoxFuture<'_, Result<TransportOptions, MediaEngineError>>;

    /// Finalize a transport's connection with the client's DTLS parameters.
    fn connect_transport(
        &self,
        transport_id: String,
        dtls_parameters: DtlsParameters,
    ) -> BoxFuture<'_, Result<(), MediaEngineError>>;

    /// Create a producer on a connected transport.
    fn create_producer(
        &self,
        transport_id: String,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> BoxFuture<'_, Result<ProducerOptions, MediaEngineError>>;

    /// Release a transport and everything flowing over it.
    fn close_transport(&self, transport_id: String) -> BoxFuture<'_, ()>;
}
