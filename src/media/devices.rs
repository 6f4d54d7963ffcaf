//! Capture device capability

use super::track::{MediaStream, TrackSource};
use crate::error::{CallError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Source of local capture streams (camera+mic, screen)
#[async_trait]
pub trait CaptureDevices: Send + Sync {
    /// Camera video plus microphone audio. Fails with `MediaAccessDenied`.
    async fn open_camera_and_mic(&self) -> Result<MediaStream>;

    /// Screen video only. Fails with `ScreenShareDenied` when the picker is cancelled.
    async fn open_screen(&self) -> Result<MediaStream>;
}

/// What the user allowed the app to capture
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct DevicePermissions {
    pub camera: bool,
    pub microphone: bool,
    pub screen: bool,
}

impl Default for DevicePermissions {
    fn default() -> Self {
        Self {
            camera: true,
            microphone: true,
            screen: true,
        }
    }
}

/// Devices backed by sample-fed tracks.
///
/// Every opened stream is handed to the feed receiver so the encoder side
/// can push frames into its tracks.
pub struct SampleDevices {
    permissions: Mutex<DevicePermissions>,
    feed: mpsc::UnboundedSender<MediaStream>,
}

impl SampleDevices {
    pub fn new(permissions: DevicePermissions) -> (Self, mpsc::UnboundedReceiver<MediaStream>) {
        let (feed, rx) = mpsc::unbounded_channel();
        (
            Self {
                permissions: Mutex::new(permissions),
                feed,
            },
            rx,
        )
    }

    pub fn set_permissions(&self, permissions: DevicePermissions) {
        if let Ok(mut guard) = self.permissions.lock() {
            *guard = permissions;
        }
    }

    fn permissions(&self) -> DevicePermissions {
        self.permissions
            .lock()
            .map(|p| *p)
            .unwrap_or(DevicePermissions {
                camera: false,
                microphone: false,
                screen: false,
            })
    }

    fn publish(&self, stream: &MediaStream) {
        if self.feed.send(stream.clone()).is_err() {
            warn!("No encoder is listening for stream {}", stream.id());
        }
    }
}

#[async_trait]
impl CaptureDevices for SampleDevices {
    async fn open_camera_and_mic(&self) -> Result<MediaStream> {
        let permissions = self.permissions();
        if !permissions.camera {
            return Err(CallError::MediaAccessDenied("camera permission refused".into()));
        }
        if !permissions.microphone {
            return Err(CallError::MediaAccessDenied(
                "microphone permission refused".into(),
            ));
        }

        let stream = MediaStream::capture(&[TrackSource::Camera, TrackSource::Microphone]);
        info!("Opened camera and microphone as stream {}", stream.id());
        self.publish(&stream);
        Ok(stream)
    }

    async fn open_screen(&self) -> Result<MediaStream> {
        if !self.permissions().screen {
            return Err(CallError::ScreenShareDenied("screen picker cancelled".into()));
        }

        let stream = MediaStream::capture(&[TrackSource::Screen]);
        info!("Opened screen capture as stream {}", stream.id());
        self.publish(&stream);
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opened_streams_reach_the_feed() {
        let (devices, mut feed) = SampleDevices::new(DevicePermissions::default());
        let camera = devices.open_camera_and_mic().await.unwrap();
        let fed = feed.recv().await.unwrap();
        assert!(camera.same_stream(&fed));
    }

    #[tokio::test]
    async fn refused_permissions_map_to_errors() {
        let (devices, _feed) = SampleDevices::new(DevicePermissions {
            camera: true,
            microphone: false,
            screen: false,
        });
        assert!(matches!(
            devices.open_camera_and_mic().await,
            Err(CallError::MediaAccessDenied(_))
        ));
        assert!(matches!(
            devices.open_screen().await,
            Err(CallError::ScreenShareDenied(_))
        ));
    }
}
