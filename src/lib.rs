pub mod call;
pub mod config;
pub mod error;
pub mod logger;
pub mod media;
pub mod negotiation;
pub mod peer;
pub mod report;
pub mod roster;
pub mod signaling;
pub mod utils;

pub use call::{CallHandle, CallParts, CallSession, CallSnapshot};
pub use config::CallConfig;
pub use error::{CallError, Result};
pub use negotiation::NegotiationEngine;
pub use peer::types::ParticipantId;

use media::{CaptureDevices, DevicePermissions, SampleDevices};
use peer::WebRtcConnectionFactory;
use report::{HttpReportSink, ReportSink};
use roster::ViewEvent;
use signaling::websocket::WebSocketChannel;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Joins the configured room with placeholder capture devices.
///
/// The opened streams only reach a logging task and nothing writes frames
/// into them, so peers negotiate tracks that stay silent and blank. Use
/// [`run_with_devices`] to plug in a real capture and encoder.
pub async fn run(config: CallConfig) -> Result<Option<String>> {
    let (devices, mut feed) = SampleDevices::new(DevicePermissions::default());
    tokio::spawn(async move {
        while let Some(stream) = feed.recv().await {
            warn!(
                "Capture stream {} has {} tracks but no encoder, peers get no media",
                stream.id(),
                stream.tracks().len()
            );
        }
    });
    run_with_devices(config, Arc::new(devices)).await
}

/// Joins the configured room over WebSocket signaling and webrtc-rs
/// connections, and stays in the call until Ctrl-C.
///
/// Returns the report location when a report endpoint is configured.
pub async fn run_with_devices(
    config: CallConfig,
    devices: Arc<dyn CaptureDevices>,
) -> Result<Option<String>> {
    config.validate()?;
    let signaling_url = config
        .signaling_url
        .clone()
        .ok_or_else(|| CallError::InvalidConfig("signaling_url is required".into()))?;

    let signaling = Arc::new(WebSocketChannel::connect(&signaling_url, &config.room_id).await?);
    let factory = Arc::new(WebRtcConnectionFactory::new(config.rtc_ice_servers()));
    let report_sink = match &config.report_url {
        Some(url) => Some(Arc::new(HttpReportSink::new(url)?) as Arc<dyn ReportSink>),
        None => None,
    };

    let (view_tx, mut view_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(event) = view_rx.recv().await {
            match event {
                ViewEvent::ParticipantJoined(p) => info!("{} joined", p.display_name),
                ViewEvent::ParticipantLeft(id) => info!("{id} left"),
                ViewEvent::Chat(m) => info!("[{}] {}: {}", m.timestamp.format("%H:%M"), m.sender_name, m.text),
                ViewEvent::Notice(text) => error!("{text}"),
                other => tracing::debug!("{other:?}"),
            }
        }
    });

    let session = CallSession::start(
        config,
        CallParts {
            devices,
            factory,
            signaling,
            report_sink,
            sample_source: None,
            view: Some(view_tx),
        },
    )
    .await?;

    let handle = session.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, leaving the call");
            if let Err(e) = handle.end_call().await {
                error!("Failed to end call: {e}");
            }
        }
    });

    Ok(session.run().await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn injected_devices_are_untouched_without_signaling_url() {
        let (devices, mut feed) = SampleDevices::new(DevicePermissions::default());
        let result = run_with_devices(CallConfig::new("room", "A"), Arc::new(devices)).await;

        assert!(matches!(result, Err(CallError::InvalidConfig(_))));
        assert!(feed.try_recv().is_err());
    }
}
