//! In-memory stand-ins for peer connections, for test harnesses.
//!
//! Built with `cfg(test)` or the `test-util` feature only.

use crate::error::{CallError, Result};
use crate::media::{LocalTrack, MediaStream};
use crate::peer::connection::{
    ConnectionEventKind, ConnectionEvents, ConnectionFactory, PeerConnection,
};
use crate::peer::types::{IceCandidate, ParticipantId, SessionDescription};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};

/// Everything a [`FakeConnection`] was asked to do
#[derive(Debug, Default, Clone)]
pub struct FakeLog {
    pub local_tracks: Vec<String>,
    pub offers: usize,
    pub answers: usize,
    pub remote_descriptions: Vec<SessionDescription>,
    pub candidates: Vec<IceCandidate>,
    pub video_track: Option<String>,
    pub replaced_video: Vec<String>,
    pub closed: bool,
}

/// Failure injection
#[derive(Debug, Default, Clone, Copy)]
pub struct FakeBehavior {
    pub fail_create: bool,
    pub fail_offer: bool,
    pub fail_answer: bool,
    pub fail_remote_description: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FakeConnection {
    label: String,
    behavior: FakeBehavior,
    log: Arc<Mutex<FakeLog>>,
}

impl FakeConnection {
    pub fn new(label: impl Into<String>, behavior: FakeBehavior) -> Self {
        Self {
            label: label.into(),
            behavior,
            log: Arc::default(),
        }
    }

    fn guard(&self) -> MutexGuard<'_, FakeLog> {
        self.log.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn log(&self) -> FakeLog {
        self.guard().clone()
    }
}

#[async_trait]
impl PeerConnection for FakeConnection {
    async fn add_local_tracks(&self, stream: &MediaStream) -> Result<()> {
        let mut log = self.guard();
        for track in stream.tracks() {
            log.local_tracks.push(track.id().to_string());
        }
        if let Some(video) = stream.video_track() {
            log.video_track = Some(video.id().to_string());
        }
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        if self.behavior.fail_offer {
            return Err(CallError::Negotiation("offer rejected".into()));
        }
        let mut log = self.guard();
        log.offers += 1;
        Ok(SessionDescription::offer(format!(
            "v=0 offer {} from {}",
            log.offers, self.label
        )))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        if self.behavior.fail_answer {
            return Err(CallError::Negotiation("answer rejected".into()));
        }
        let mut log = self.guard();
        log.answers += 1;
        Ok(SessionDescription::answer(format!(
            "v=0 answer {} from {}",
            log.answers, self.label
        )))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        if self.behavior.fail_remote_description {
            return Err(CallError::Negotiation("remote description rejected".into()));
        }
        self.guard().remote_descriptions.push(desc);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.guard().candidates.push(candidate);
        Ok(())
    }

    async fn replace_video_track(&self, track: &LocalTrack) -> Result<bool> {
        let mut log = self.guard();
        if log.video_track.is_none() {
            return Ok(false);
        }
        log.video_track = Some(track.id().to_string());
        log.replaced_video.push(track.id().to_string());
        Ok(true)
    }

    async fn close(&self) -> Result<()> {
        self.guard().closed = true;
        Ok(())
    }
}

/// A connection the factory handed out, with the callback sender it was given
#[derive(Debug, Clone)]
pub struct FakeHandle {
    pub events: ConnectionEvents,
    pub connection: FakeConnection,
}

impl FakeHandle {
    pub fn peer(&self) -> &ParticipantId {
        self.events.peer()
    }

    pub fn log(&self) -> FakeLog {
        self.connection.log()
    }

    /// Fires a callback as the underlying connection would
    pub fn emit(&self, kind: ConnectionEventKind) {
        self.events.emit(kind);
    }
}

#[derive(Debug, Default)]
pub struct FakeConnectionFactory {
    label: String,
    behavior: Mutex<FakeBehavior>,
    created: Mutex<Vec<FakeHandle>>,
}

impl FakeConnectionFactory {
    pub fn new(label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            ..Default::default()
        })
    }

    /// Applies to connections created from now on
    pub fn set_behavior(&self, behavior: FakeBehavior) {
        *self.behavior.lock().unwrap_or_else(|p| p.into_inner()) = behavior;
    }

    pub fn created(&self) -> Vec<FakeHandle> {
        self.created
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Most recent connection created for `peer`
    pub fn latest(&self, peer: &ParticipantId) -> Option<FakeHandle> {
        self.created().into_iter().rev().find(|h| h.peer() == peer)
    }

    pub fn created_for(&self, peer: &ParticipantId) -> usize {
        self.created().iter().filter(|h| h.peer() == peer).count()
    }
}

#[async_trait]
impl ConnectionFactory for FakeConnectionFactory {
    async fn create(&self, events: ConnectionEvents) -> Result<Box<dyn PeerConnection>> {
        let behavior = *self.behavior.lock().unwrap_or_else(|p| p.into_inner());
        if behavior.fail_create {
            return Err(CallError::Negotiation("connection refused".into()));
        }
        let connection = FakeConnection::new(format!("{}->{}", self.label, events.peer()), behavior);
        self.created
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(FakeHandle {
                events,
                connection: connection.clone(),
            });
        Ok(Box::new(connection))
    }
}
