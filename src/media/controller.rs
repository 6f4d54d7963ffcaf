//! Local media state: camera/mic, screen share and mute flags

use super::devices::CaptureDevices;
use super::track::{LocalTrack, MediaStream, TrackKind};
use crate::error::{CallError, Result};
use std::sync::Arc;
use tracing::{debug, info};

/// Singleton-per-call outbound media
#[derive(Debug, Clone)]
pub struct LocalMediaState {
    /// Camera + microphone, kept for the whole call
    camera: MediaStream,
    /// Screen video + the camera's microphone track while sharing
    screen: Option<MediaStream>,
    video_enabled: bool,
    audio_enabled: bool,
}

impl LocalMediaState {
    pub fn active(&self) -> &MediaStream {
        self.screen.as_ref().unwrap_or(&self.camera)
    }

    pub fn camera(&self) -> &MediaStream {
        &self.camera
    }
}

/// Owner of the local capture streams.
///
/// Only this type mutates [`LocalMediaState`]; the negotiation engine reads
/// the active stream through [`LocalMediaController::active_stream`].
pub struct LocalMediaController {
    devices: Arc<dyn CaptureDevices>,
    state: Option<LocalMediaState>,
}

impl LocalMediaController {
    pub fn new(devices: Arc<dyn CaptureDevices>) -> Self {
        Self {
            devices,
            state: None,
        }
    }

    pub async fn acquire_camera_and_mic(&mut self) -> Result<&MediaStream> {
        if let Some(state) = self.state.take() {
            // re-acquiring replaces the previous capture
            state.active().stop_all();
            state.camera.stop_all();
        }

        let camera = self.devices.open_camera_and_mic().await?;
        info!("Local camera stream {} acquired", camera.id());
        let state = self.state.insert(LocalMediaState {
            camera,
            screen: None,
            video_enabled: true,
            audio_enabled: true,
        });
        Ok(&state.camera)
    }

    /// Swaps outbound video to a screen capture and returns the new video track.
    pub async fn start_screen_share(&mut self) -> Result<LocalTrack> {
        let Some(state) = self.state.as_ref() else {
            return Err(CallError::NoPriorCameraStream);
        };
        if let Some(screen) = &state.screen {
            debug!("Screen share already active");
            return screen
                .video_track()
                .cloned()
                .ok_or_else(|| CallError::ScreenShareDenied("screen stream has no video".into()));
        }

        let captured = self.devices.open_screen().await?;
        let Some(video) = captured.video_track().cloned() else {
            captured.stop_all();
            return Err(CallError::ScreenShareDenied(
                "screen capture produced no video track".into(),
            ));
        };

        let state = self
            .state
            .as_mut()
            .ok_or(CallError::NoPriorCameraStream)?;
        video.set_enabled(state.video_enabled);

        let mut tracks = vec![video.clone()];
        tracks.extend(state.camera.tracks_of(TrackKind::Audio).cloned());
        let screen = MediaStream::new(captured.id(), tracks);
        info!("Screen share started as stream {}", screen.id());
        state.screen = Some(screen);
        Ok(video)
    }

    /// Restores the camera stream and returns its video track.
    pub async fn stop_screen_share(&mut self) -> Result<LocalTrack> {
        let state = self.state.as_mut().ok_or(CallError::NoPriorCameraStream)?;

        if let Some(screen) = state.screen.take() {
            for track in screen.tracks_of(TrackKind::Video) {
                track.stop();
            }
            info!(
                "Screen share {} stopped, back to camera {}",
                screen.id(),
                state.camera.id()
            );
        }

        state
            .camera
            .video_track()
            .cloned()
            .ok_or(CallError::NoPriorCameraStream)
    }

    pub fn set_video_enabled(&mut self, enabled: bool) {
        if let Some(state) = self.state.as_mut() {
            state.video_enabled = enabled;
            apply_enabled(state, TrackKind::Video, enabled);
        }
    }

    pub fn set_audio_enabled(&mut self, enabled: bool) {
        if let Some(state) = self.state.as_mut() {
            state.audio_enabled = enabled;
            apply_enabled(state, TrackKind::Audio, enabled);
        }
    }

    /// Stops every local track. Calling it again does nothing.
    pub fn end_call(&mut self) {
        if let Some(state) = self.state.take() {
            if let Some(screen) = &state.screen {
                screen.stop_all();
            }
            state.camera.stop_all();
            info!("Local media released");
        }
    }

    pub fn state(&self) -> Option<&LocalMediaState> {
        self.state.as_ref()
    }

    pub fn active_stream(&self) -> Option<&MediaStream> {
        self.state.as_ref().map(|s| s.active())
    }

    pub fn is_screen_sharing(&self) -> bool {
        self.state.as_ref().is_some_and(|s| s.screen.is_some())
    }

    pub fn video_enabled(&self) -> bool {
        self.state.as_ref().is_some_and(|s| s.video_enabled)
    }

    pub fn audio_enabled(&self) -> bool {
        self.state.as_ref().is_some_and(|s| s.audio_enabled)
    }
}

fn apply_enabled(state: &LocalMediaState, kind: TrackKind, enabled: bool) {
    for track in state.camera.tracks_of(kind) {
        track.set_enabled(enabled);
    }
    if let Some(screen) = &state.screen {
        for track in screen.tracks_of(kind) {
            track.set_enabled(enabled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::devices::{DevicePermissions, SampleDevices};
    use crate::media::track::TrackSource;

    fn controller(permissions: DevicePermissions) -> LocalMediaController {
        let (devices, _feed) = SampleDevices::new(permissions);
        LocalMediaController::new(Arc::new(devices))
    }

    #[tokio::test]
    async fn screen_share_round_trip_restores_camera() {
        let mut media = controller(DevicePermissions::default());
        let camera = media.acquire_camera_and_mic().await.unwrap().clone();
        media.set_audio_enabled(false);

        let screen_video = media.start_screen_share().await.unwrap();
        assert_eq!(screen_video.source(), TrackSource::Screen);
        assert!(media.is_screen_sharing());
        let active = media.active_stream().unwrap();
        assert!(active.video_track().unwrap().same_track(&screen_video));
        // microphone carried over
        assert!(active
            .audio_track()
            .unwrap()
            .same_track(camera.audio_track().unwrap()));

        let restored = media.stop_screen_share().await.unwrap();
        assert!(restored.same_track(camera.video_track().unwrap()));
        assert!(media.active_stream().unwrap().same_stream(&camera));
        assert!(screen_video.is_stopped());
        assert!(!camera.video_track().unwrap().is_stopped());
        assert!(media.video_enabled());
        assert!(!media.audio_enabled());
    }

    #[tokio::test]
    async fn denied_camera_leaves_no_state() {
        let mut media = controller(DevicePermissions {
            camera: false,
            ..Default::default()
        });
        let err = media.acquire_camera_and_mic().await.unwrap_err();
        assert!(matches!(err, CallError::MediaAccessDenied(_)));
        assert!(media.active_stream().is_none());
    }

    #[tokio::test]
    async fn cancelled_picker_keeps_camera_active() {
        let mut media = controller(DevicePermissions {
            screen: false,
            ..Default::default()
        });
        let camera = media.acquire_camera_and_mic().await.unwrap().clone();
        let err = media.start_screen_share().await.unwrap_err();
        assert!(matches!(err, CallError::ScreenShareDenied(_)));
        assert!(!media.is_screen_sharing());
        assert!(media.active_stream().unwrap().same_stream(&camera));
    }

    #[tokio::test]
    async fn stop_without_camera_fails() {
        let mut media = controller(DevicePermissions::default());
        assert!(matches!(
            media.stop_screen_share().await,
            Err(CallError::NoPriorCameraStream)
        ));
    }

    #[tokio::test]
    async fn video_flag_follows_into_screen_track() {
        let mut media = controller(DevicePermissions::default());
        media.acquire_camera_and_mic().await.unwrap();
        media.set_video_enabled(false);
        let screen = media.start_screen_share().await.unwrap();
        assert!(!screen.is_enabled());
        media.set_video_enabled(true);
        assert!(screen.is_enabled());
    }

    #[tokio::test]
    async fn end_call_is_idempotent() {
        let mut media = controller(DevicePermissions::default());
        let camera = media.acquire_camera_and_mic().await.unwrap().clone();
        media.start_screen_share().await.unwrap();
        media.end_call();
        media.end_call();
        assert!(camera.tracks().iter().all(|t| t.is_stopped()));
        assert!(media.active_stream().is_none());
    }
}
