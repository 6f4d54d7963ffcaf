//! Local outbound tracks and streams

use crate::error::Result;
use crate::utils::random_id;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// Opus frame that decodes to silence
const OPUS_SILENCE_FRAME: [u8; 3] = [0xf8, 0xff, 0xfe];

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrackSource {
    Camera,
    Microphone,
    Screen,
}

impl TrackSource {
    pub fn kind(self) -> TrackKind {
        match self {
            TrackSource::Microphone => TrackKind::Audio,
            TrackSource::Camera | TrackSource::Screen => TrackKind::Video,
        }
    }
}

struct TrackInner {
    id: String,
    source: TrackSource,
    enabled: AtomicBool,
    stopped: AtomicBool,
    /// Flips to `true` when the capture source goes away on its own
    ended: watch::Sender<bool>,
    rtp: Arc<TrackLocalStaticSample>,
}

/// Outbound track fed with encoded samples.
///
/// Clones share the same underlying track; [`LocalTrack::same_track`] compares identity.
#[derive(Clone)]
pub struct LocalTrack {
    inner: Arc<TrackInner>,
}

impl LocalTrack {
    pub fn new(source: TrackSource, stream_id: &str) -> Self {
        let kind = source.kind();
        let codec = match kind {
            TrackKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48_000,
                channels: 2,
                ..Default::default()
            },
            TrackKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90_000,
                ..Default::default()
            },
        };
        let id = format!("{}-{}", kind_label(kind), random_id());
        let rtp = Arc::new(TrackLocalStaticSample::new(
            codec,
            id.clone(),
            stream_id.to_owned(),
        ));

        Self {
            inner: Arc::new(TrackInner {
                id,
                source,
                enabled: AtomicBool::new(true),
                stopped: AtomicBool::new(false),
                ended: watch::channel(false).0,
                rtp,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.source.kind()
    }

    pub fn source(&self) -> TrackSource {
        self.inner.source
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Relaxed)
    }

    /// Mutes without unbinding: peers keep receiving silence or no frames.
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Relaxed)
    }

    /// The capture source ended outside the app (e.g. sharing stopped from
    /// the OS). Stops the track and wakes every [`LocalTrack::ended`] watcher.
    /// A plain [`LocalTrack::stop`] does not count as ended.
    pub fn end_capture(&self) {
        self.stop();
        self.inner.ended.send_replace(true);
    }

    pub fn ended(&self) -> watch::Receiver<bool> {
        self.inner.ended.subscribe()
    }

    pub fn same_track(&self, other: &LocalTrack) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Handle passed to `add_track` / `replace_track`
    pub fn rtp_track(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        self.inner.rtp.clone()
    }

    /// Writes one encoded frame. Stopped tracks swallow it; disabled audio
    /// writes a silence frame and disabled video drops it.
    pub async fn write_sample(&self, data: Bytes, duration: Duration) -> Result<()> {
        if self.is_stopped() {
            return Ok(());
        }
        let data = if self.is_enabled() {
            data
        } else {
            match self.kind() {
                TrackKind::Audio => Bytes::from_static(&OPUS_SILENCE_FRAME),
                TrackKind::Video => return Ok(()),
            }
        };
        self.inner
            .rtp
            .write_sample(&Sample {
                data,
                duration,
                ..Default::default()
            })
            .await?;
        Ok(())
    }
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.inner.id)
            .field("source", &self.inner.source)
            .field("enabled", &self.is_enabled())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

fn kind_label(kind: TrackKind) -> &'static str {
    match kind {
        TrackKind::Audio => "audio",
        TrackKind::Video => "video",
    }
}

/// A set of local tracks captured together
#[derive(Debug, Clone)]
pub struct MediaStream {
    id: String,
    tracks: Vec<LocalTrack>,
}

impl MediaStream {
    pub fn new(id: impl Into<String>, tracks: Vec<LocalTrack>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    /// Fresh stream with one track per source
    pub fn capture(sources: &[TrackSource]) -> Self {
        let id = format!("stream-{}", random_id());
        let tracks = sources.iter().map(|s| LocalTrack::new(*s, &id)).collect();
        Self { id, tracks }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    pub fn video_track(&self) -> Option<&LocalTrack> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Video)
    }

    pub fn audio_track(&self) -> Option<&LocalTrack> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Audio)
    }

    pub fn tracks_of(&self, kind: TrackKind) -> impl Iterator<Item = &LocalTrack> {
        self.tracks.iter().filter(move |t| t.kind() == kind)
    }

    /// Same id and the very same track objects
    pub fn same_stream(&self, other: &MediaStream) -> bool {
        self.id == other.id
            && self.tracks.len() == other.tracks.len()
            && self
                .tracks
                .iter()
                .zip(other.tracks.iter())
                .all(|(a, b)| a.same_track(b))
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}
