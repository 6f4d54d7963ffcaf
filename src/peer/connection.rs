use crate::error::{CallError, Result};
use crate::logger::{candidate_summary, log_candidate, log_selected_pair};
use crate::media::{LocalTrack, MediaStream, TrackKind};
use crate::peer::types::{ConnectionState, IceCandidate, ParticipantId, SdpKind, SessionDescription};
use async_trait::async_trait;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_remote::TrackRemote;

/// Most recent inbound stream of a peer. Not owned: the connection keeps the track alive.
#[derive(Clone)]
pub struct RemoteStream {
    pub stream_id: String,
    pub track_id: String,
    pub kind: TrackKind,
    pub track: Weak<TrackRemote>,
}

impl fmt::Debug for RemoteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteStream")
            .field("stream_id", &self.stream_id)
            .field("track_id", &self.track_id)
            .field("kind", &self.kind)
            .field("alive", &(self.track.strong_count() > 0))
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum ConnectionEventKind {
    LocalCandidate(IceCandidate),
    GatheringComplete,
    RemoteTrack(RemoteStream),
    StateChanged(ConnectionState),
}

/// Callback from an underlying connection, tagged with the session it belongs to
#[derive(Debug, Clone)]
pub struct ConnectionEvent {
    pub peer: ParticipantId,
    pub generation: u64,
    pub kind: ConnectionEventKind,
}

/// Sender handed to a new connection for its callbacks
#[derive(Debug, Clone)]
pub struct ConnectionEvents {
    peer: ParticipantId,
    generation: u64,
    tx: mpsc::UnboundedSender<ConnectionEvent>,
}

impl ConnectionEvents {
    pub fn new(
        peer: ParticipantId,
        generation: u64,
        tx: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Self {
        Self {
            peer,
            generation,
            tx,
        }
    }

    pub fn peer(&self) -> &ParticipantId {
        &self.peer
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn emit(&self, kind: ConnectionEventKind) {
        let event = ConnectionEvent {
            peer: self.peer.clone(),
            generation: self.generation,
            kind,
        };
        if self.tx.send(event).is_err() {
            debug!("Call loop gone, dropping connection event for {}", self.peer);
        }
    }
}

/// Capability interface over one ICE/SDP/media transport object
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn add_local_tracks(&self, stream: &MediaStream) -> Result<()>;

    /// Creates an offer and applies it as the local description.
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Creates an answer and applies it as the local description.
    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Swaps the outbound video source in place, without renegotiation.
    /// Returns `false` when the connection carries no video sender.
    async fn replace_video_track(&self, track: &LocalTrack) -> Result<bool>;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn create(&self, events: ConnectionEvents) -> Result<Box<dyn PeerConnection>>;
}

/// Factory for webrtc-rs peer connections
pub struct WebRtcConnectionFactory {
    ice_servers: Vec<RTCIceServer>,
}

impl WebRtcConnectionFactory {
    pub fn new(ice_servers: Vec<RTCIceServer>) -> Self {
        Self { ice_servers }
    }

    fn rtc_config(&self) -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ice_candidate_pool_size: 10,
            bundle_policy: RTCBundlePolicy::MaxBundle,
            rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
            ..Default::default()
        }
    }
}

#[async_trait]
impl ConnectionFactory for WebRtcConnectionFactory {
    async fn create(&self, events: ConnectionEvents) -> Result<Box<dyn PeerConnection>> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(api.new_peer_connection(self.rtc_config()).await?);
        info!("Created peer connection for {}", events.peer());
        Ok(Box::new(WebRtcConnection::attach(pc, events)))
    }
}

pub struct WebRtcConnection {
    peer: ParticipantId,
    pc: Arc<RTCPeerConnection>,
    senders: tokio::sync::Mutex<Vec<(TrackKind, Arc<RTCRtpSender>)>>,
}

impl WebRtcConnection {
    fn attach(pc: Arc<RTCPeerConnection>, events: ConnectionEvents) -> Self {
        let peer = events.peer().clone();
        let gathered: Arc<Mutex<Vec<IceCandidate>>> = Arc::new(Mutex::new(Vec::new()));

        let ice_events = events.clone();
        pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
            let events = ice_events.clone();
            let gathered = gathered.clone();
            match cand {
                Some(c) => match c.to_json() {
                    Ok(init) => {
                        let candidate = IceCandidate::from(init);
                        log_candidate("LOCAL", events.peer(), &candidate);
                        if let Ok(mut list) = gathered.lock() {
                            list.push(candidate.clone());
                        }
                        events.emit(ConnectionEventKind::LocalCandidate(candidate));
                    }
                    Err(e) => warn!("Unserialisable local candidate for {}: {e}", events.peer()),
                },
                None => {
                    // null candidate marks the end of gathering
                    if let Ok(list) = gathered.lock() {
                        candidate_summary(events.peer(), &list);
                    }
                    events.emit(ConnectionEventKind::GatheringComplete);
                }
            }
            Box::pin(async {})
        }));

        let state_events = events.clone();
        let pc_stats = Arc::downgrade(&pc);
        pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
            let state = match st {
                RTCPeerConnectionState::New => Some(ConnectionState::New),
                RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
                RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
                RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
                RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
                RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
                _ => None,
            };

            if let Some(state) = state {
                info!("Peer connection {} state changed to {:?}", state_events.peer(), state);
                if state == ConnectionState::Failed {
                    if let Some(pc) = pc_stats.upgrade() {
                        let peer = state_events.peer().clone();
                        tokio::spawn(async move {
                            log_selected_pair(&pc, &peer, "BEFORE-FAIL").await;
                        });
                    }
                }
                state_events.emit(ConnectionEventKind::StateChanged(state));
            }
            Box::pin(async {})
        }));

        let track_events = events;
        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
            let kind = match track.kind() {
                RTPCodecType::Audio => TrackKind::Audio,
                _ => TrackKind::Video,
            };
            let stream = RemoteStream {
                stream_id: track.stream_id(),
                track_id: track.id(),
                kind,
                track: Arc::downgrade(&track),
            };
            info!(
                "Remote {:?} track {} from {}",
                kind,
                stream.track_id,
                track_events.peer()
            );
            track_events.emit(ConnectionEventKind::RemoteTrack(stream));
            Box::pin(async {})
        }));

        Self {
            peer,
            pc,
            senders: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    async fn local_description(&self, kind: SdpKind) -> Result<SessionDescription> {
        let local = self.pc.local_description().await.ok_or_else(|| {
            CallError::Negotiation(format!("no local description for {}", self.peer))
        })?;
        Ok(SessionDescription {
            kind,
            sdp: local.sdp,
        })
    }
}

#[async_trait]
impl PeerConnection for WebRtcConnection {
    async fn add_local_tracks(&self, stream: &MediaStream) -> Result<()> {
        let mut senders = self.senders.lock().await;
        for track in stream.tracks() {
            let sender = self.pc.add_track(track.rtp_track()).await?;
            debug!("Attached {} to connection for {}", track.id(), self.peer);

            // RTCP must be drained for interceptors to run
            let rtcp_sender = sender.clone();
            tokio::spawn(async move {
                let mut rtcp_buf = vec![0u8; 1500];
                while rtcp_sender.read(&mut rtcp_buf).await.is_ok() {}
            });
            senders.push((track.kind(), sender));
        }
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| CallError::Negotiation(format!("create offer: {e}")))?;
        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| CallError::Negotiation(format!("set local offer: {e}")))?;
        self.local_description(SdpKind::Offer).await
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| CallError::Negotiation(format!("create answer: {e}")))?;
        self.pc
            .set_local_description(answer)
            .await
            .map_err(|e| CallError::Negotiation(format!("set local answer: {e}")))?;
        self.local_description(SdpKind::Answer).await
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        let remote = match desc.kind {
            SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
            SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
        }
        .map_err(|e| CallError::Negotiation(format!("parse remote description: {e}")))?;
        self.pc
            .set_remote_description(remote)
            .await
            .map_err(|e| CallError::Negotiation(format!("set remote description: {e}")))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.pc.add_ice_candidate(candidate.into()).await?;
        Ok(())
    }

    async fn replace_video_track(&self, track: &LocalTrack) -> Result<bool> {
        let senders = self.senders.lock().await;
        let Some((_, sender)) = senders.iter().find(|(kind, _)| *kind == TrackKind::Video) else {
            return Ok(false);
        };
        sender.replace_track(Some(track.rtp_track())).await?;
        debug!("Replaced outbound video for {} with {}", self.peer, track.id());
        Ok(true)
    }

    async fn close(&self) -> Result<()> {
        info!("Closing peer connection for {}", self.peer);
        self.pc.close().await?;
        Ok(())
    }
}
