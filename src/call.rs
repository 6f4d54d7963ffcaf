//! One participant's call: local media, negotiation and telemetry driven
//! from a single task.

use crate::config::CallConfig;
use crate::error::{CallError, Result};
use crate::media::{CaptureDevices, LocalMediaController};
use crate::negotiation::NegotiationEngine;
use crate::peer::connection::{ConnectionEvent, ConnectionFactory};
use crate::peer::types::{NegotiationState, ParticipantId};
use crate::report::{ReportSink, SamplePump, SampleSource};
use crate::roster::{ChatMessage, Participant, Presenter, ViewEvent};
use crate::signaling::{
    ChatSignal, SignalMessage, SignalingChannel, Subscription, UserJoined, UserLeft,
};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

const COMMAND_QUEUE: usize = 32;
const REAPER_TICK: Duration = Duration::from_secs(1);

/// Collaborators a call is wired to
pub struct CallParts {
    pub devices: Arc<dyn CaptureDevices>,
    pub factory: Arc<dyn ConnectionFactory>,
    pub signaling: Arc<dyn SignalingChannel>,
    pub report_sink: Option<Arc<dyn ReportSink>>,
    pub sample_source: Option<Arc<dyn SampleSource>>,
    pub view: Option<mpsc::UnboundedSender<ViewEvent>>,
}

/// Point-in-time view of a call
#[derive(Debug, Clone)]
pub struct CallSnapshot {
    pub local_id: ParticipantId,
    pub peers: Vec<(ParticipantId, NegotiationState)>,
    pub participants: Vec<Participant>,
    pub chat: Vec<ChatMessage>,
    pub video_enabled: bool,
    pub audio_enabled: bool,
    pub screen_sharing: bool,
    pub active_video_track: Option<String>,
    pub ended: bool,
}

#[derive(Debug)]
pub enum CallCommand {
    ToggleVideo(oneshot::Sender<bool>),
    ToggleAudio(oneshot::Sender<bool>),
    ToggleScreenShare(oneshot::Sender<Result<bool>>),
    SendChat(String, oneshot::Sender<Option<ChatMessage>>),
    Snapshot(oneshot::Sender<CallSnapshot>),
    EndCall(oneshot::Sender<Option<String>>),
}

/// Cloneable command surface of a running [`CallSession`]
#[derive(Debug, Clone)]
pub struct CallHandle {
    tx: mpsc::Sender<CallCommand>,
}

impl CallHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> CallCommand) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| CallError::SessionClosed)?;
        reply_rx.await.map_err(|_| CallError::SessionClosed)
    }

    /// Returns whether video is now enabled
    pub async fn toggle_video(&self) -> Result<bool> {
        self.request(CallCommand::ToggleVideo).await
    }

    /// Returns whether audio is now enabled
    pub async fn toggle_audio(&self) -> Result<bool> {
        self.request(CallCommand::ToggleAudio).await
    }

    /// Resolves once the media switch and every track replacement are done.
    /// Returns whether the screen is now shared.
    pub async fn toggle_screen_share(&self) -> Result<bool> {
        self.request(CallCommand::ToggleScreenShare).await?
    }

    pub async fn send_chat(&self, text: impl Into<String>) -> Result<Option<ChatMessage>> {
        let text = text.into();
        self.request(|reply| CallCommand::SendChat(text, reply)).await
    }

    pub async fn snapshot(&self) -> Result<CallSnapshot> {
        self.request(CallCommand::Snapshot).await
    }

    /// Returns the report location when a report sink is configured
    pub async fn end_call(&self) -> Result<Option<String>> {
        self.request(CallCommand::EndCall).await
    }
}

pub struct CallSession {
    config: CallConfig,
    media: LocalMediaController,
    engine: NegotiationEngine,
    signaling: Arc<dyn SignalingChannel>,
    inbound: Subscription,
    connection_events: mpsc::UnboundedReceiver<ConnectionEvent>,
    commands_tx: mpsc::Sender<CallCommand>,
    commands_rx: mpsc::Receiver<CallCommand>,
    report_sink: Option<Arc<dyn ReportSink>>,
    pump: Option<SamplePump>,
    /// Set while sharing; fires when the screen capture ends on its own
    screen_ended: Option<watch::Receiver<bool>>,
    ended: bool,
}

impl CallSession {
    /// Acquires camera and microphone, then announces the participant.
    ///
    /// Fails with `MediaAccessDenied` before anything is sent when capture is refused.
    pub async fn start(config: CallConfig, parts: CallParts) -> Result<Self> {
        config.validate()?;

        let mut media = LocalMediaController::new(parts.devices);
        media.acquire_camera_and_mic().await?;

        // subscribe first so replies to our announcement are not missed
        let inbound = parts.signaling.subscribe();
        let local = Participant::local(config.user_id.clone(), config.display_name.clone());
        let presenter = Presenter::new(local, parts.view);
        let (engine, connection_events) = NegotiationEngine::new(
            config.user_id.clone(),
            parts.factory,
            parts.signaling.clone(),
            presenter,
        );
        let engine = engine.with_idle_timeout(config.negotiation_timeout());

        let announce = SignalMessage::UserJoined(UserJoined {
            user_id: config.user_id.clone(),
            username: config.display_name.clone(),
        });
        if let Err(e) = parts.signaling.send(announce).await {
            media.end_call();
            return Err(e);
        }
        info!(
            "Joined room {} as {} ({}){}",
            config.room_id,
            config.user_id,
            config.display_name,
            if config.is_host { ", host" } else { "" }
        );

        let pump = match (&parts.report_sink, parts.sample_source) {
            (Some(sink), Some(source)) => Some(SamplePump::spawn(
                config.room_id.clone(),
                config.user_id.clone(),
                config.sample_interval(),
                source,
                sink.clone(),
            )),
            _ => None,
        };

        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE);
        Ok(Self {
            config,
            media,
            engine,
            signaling: parts.signaling,
            inbound,
            connection_events,
            commands_tx,
            commands_rx,
            report_sink: parts.report_sink,
            pump,
            screen_ended: None,
            ended: false,
        })
    }

    pub fn handle(&self) -> CallHandle {
        CallHandle {
            tx: self.commands_tx.clone(),
        }
    }

    pub fn local_id(&self) -> &ParticipantId {
        &self.config.user_id
    }

    /// Processes events until the call is ended. Returns the report location, if any.
    pub async fn run(mut self) -> Option<String> {
        let mut reaper = tokio::time::interval(REAPER_TICK);
        reaper.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                Some(message) = self.inbound.recv() => {
                    self.engine.handle_signal(message, &self.media).await;
                }
                Some(event) = self.connection_events.recv() => {
                    self.engine.handle_connection_event(event).await;
                }
                Some(command) = self.commands_rx.recv() => {
                    if let ControlFlow::Break(report) = self.handle_command(command).await {
                        return report;
                    }
                }
                _ = reaper.tick() => {
                    self.engine.reap_stalled(Instant::now()).await;
                }
                _ = capture_ended(&mut self.screen_ended) => {
                    self.on_screen_capture_ended().await;
                }
            }
        }
    }

    async fn handle_command(&mut self, command: CallCommand) -> ControlFlow<Option<String>> {
        match command {
            CallCommand::ToggleVideo(reply) => {
                let _ = reply.send(self.toggle_video());
            }
            CallCommand::ToggleAudio(reply) => {
                let _ = reply.send(self.toggle_audio());
            }
            CallCommand::ToggleScreenShare(reply) => {
                let _ = reply.send(self.toggle_screen_share().await);
            }
            CallCommand::SendChat(text, reply) => {
                let _ = reply.send(self.send_chat(&text).await);
            }
            CallCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            CallCommand::EndCall(reply) => {
                let report = self.end_call().await;
                let _ = reply.send(report.clone());
                return ControlFlow::Break(report);
            }
        }
        ControlFlow::Continue(())
    }

    fn publish_media_state(&mut self) {
        let (video, audio, sharing) = (
            self.media.video_enabled(),
            self.media.audio_enabled(),
            self.media.is_screen_sharing(),
        );
        self.engine.presenter_mut().local_media(video, audio, sharing);
    }

    pub fn toggle_video(&mut self) -> bool {
        let enabled = !self.media.video_enabled();
        self.media.set_video_enabled(enabled);
        debug!("Video {}", if enabled { "on" } else { "off" });
        self.publish_media_state();
        enabled
    }

    pub fn toggle_audio(&mut self) -> bool {
        let enabled = !self.media.audio_enabled();
        self.media.set_audio_enabled(enabled);
        debug!("Audio {}", if enabled { "on" } else { "off" });
        self.publish_media_state();
        enabled
    }

    /// Switches outbound video between camera and screen on every connection.
    pub async fn toggle_screen_share(&mut self) -> Result<bool> {
        if self.media.is_screen_sharing() {
            self.back_to_camera().await?;
        } else {
            let screen = match self.media.start_screen_share().await {
                Ok(track) => track,
                Err(e) => {
                    warn!("Screen share not started: {e}");
                    if e.is_user_facing() {
                        self.engine.presenter_mut().notice(e.to_string());
                    }
                    return Err(e);
                }
            };
            self.screen_ended = Some(screen.ended());
            self.engine.replace_video_track(&screen).await;
            if let Some(pump) = &self.pump {
                pump.pause();
            }
        }
        self.publish_media_state();
        Ok(self.media.is_screen_sharing())
    }

    async fn back_to_camera(&mut self) -> Result<()> {
        self.screen_ended = None;
        let camera = self.media.stop_screen_share().await?;
        self.engine.replace_video_track(&camera).await;
        if let Some(pump) = &self.pump {
            pump.resume();
        }
        Ok(())
    }

    /// Sharing was stopped outside the app: restore the camera everywhere.
    async fn on_screen_capture_ended(&mut self) {
        if !self.media.is_screen_sharing() {
            self.screen_ended = None;
            return;
        }
        info!("Screen capture ended, switching back to camera");
        if let Err(e) = self.back_to_camera().await {
            warn!("Could not restore camera after screen capture ended: {e}");
            return;
        }
        self.engine
            .presenter_mut()
            .notice("Screen sharing ended");
        self.publish_media_state();
    }

    /// Empty (after trimming) messages are ignored.
    pub async fn send_chat(&mut self, text: &str) -> Option<ChatMessage> {
        let text = text.trim();
        if text.is_empty() || self.ended {
            return None;
        }
        let local = self.config.user_id.clone();
        let message = self.engine.presenter_mut().chat_received(&local, text);
        let signal = SignalMessage::ChatMessage(ChatSignal {
            sender: local,
            message: text.to_string(),
        });
        if let Err(e) = self.signaling.send(signal).await {
            warn!("Chat message not delivered: {e}");
        }
        Some(message)
    }

    pub fn snapshot(&self) -> CallSnapshot {
        let registry = self.engine.registry();
        let presenter = self.engine.presenter();
        CallSnapshot {
            local_id: self.config.user_id.clone(),
            peers: registry
                .ids()
                .into_iter()
                .filter_map(|id| registry.state_of(&id).map(|state| (id, state)))
                .collect(),
            participants: presenter.roster().participants().to_vec(),
            chat: presenter.chat_log().messages().to_vec(),
            video_enabled: self.media.video_enabled(),
            audio_enabled: self.media.audio_enabled(),
            screen_sharing: self.media.is_screen_sharing(),
            active_video_track: self
                .media
                .active_stream()
                .and_then(|s| s.video_track())
                .map(|t| t.id().to_string()),
            ended: self.ended,
        }
    }

    /// Tears the call down. Calling it again does nothing and returns `None`.
    pub async fn end_call(&mut self) -> Option<String> {
        if self.ended {
            return None;
        }
        self.ended = true;
        info!("Ending call in room {}", self.config.room_id);

        self.engine.end_call().await;
        self.screen_ended = None;
        self.media.end_call();

        let left = SignalMessage::UserLeft(UserLeft {
            user_id: self.config.user_id.clone(),
        });
        if let Err(e) = self.signaling.send(left).await {
            warn!("Leave notice not delivered: {e}");
        }

        if let Some(mut pump) = self.pump.take() {
            pump.stop().await;
        }

        let sink = self.report_sink.as_ref()?;
        match sink.end_call(&self.config.room_id, &self.config.user_id).await {
            Ok(location) => {
                info!("Call report available at {location}");
                Some(location)
            }
            Err(e) => {
                warn!("Could not finalise call report: {e}");
                None
            }
        }
    }
}

/// Resolves once the watched capture reports it ended; never without one.
async fn capture_ended(watched: &mut Option<watch::Receiver<bool>>) {
    if let Some(rx) = watched {
        if rx.wait_for(|ended| *ended).await.is_ok() {
            return;
        }
    }
    std::future::pending::<()>().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{DevicePermissions, SampleDevices};
    use crate::peer::fake::FakeConnectionFactory;
    use crate::report::MemoryReportSink;
    use crate::signaling::memory::MemoryHub;

    fn parts(
        hub: &Arc<MemoryHub>,
        config: &CallConfig,
        permissions: DevicePermissions,
    ) -> (CallParts, mpsc::UnboundedReceiver<ViewEvent>) {
        let (devices, _feed) = SampleDevices::new(permissions);
        let (view_tx, view_rx) = mpsc::unbounded_channel();
        let parts = CallParts {
            devices: Arc::new(devices),
            factory: FakeConnectionFactory::new(config.user_id.as_str()),
            signaling: Arc::new(hub.connect(&config.room_id, config.user_id.clone())),
            report_sink: Some(MemoryReportSink::new()),
            sample_source: None,
            view: Some(view_tx),
        };
        (parts, view_rx)
    }

    fn config(id: &str) -> CallConfig {
        let mut config = CallConfig::new("room", id.to_uppercase());
        config.user_id = id.into();
        config
    }

    #[tokio::test]
    async fn denied_camera_aborts_before_signaling() {
        let hub = MemoryHub::new();
        let cfg = config("a");
        let (parts, _view) = parts(
            &hub,
            &cfg,
            DevicePermissions {
                camera: false,
                ..Default::default()
            },
        );
        let observer = hub.connect("room", "z".into());
        let mut seen = observer.subscribe();

        let err = CallSession::start(cfg, parts).await.err().unwrap();
        assert!(matches!(err, CallError::MediaAccessDenied(_)));
        assert!(err.is_user_facing());
        assert!(seen.try_recv().is_err());
    }

    #[tokio::test]
    async fn chat_is_trimmed_and_empty_ignored() {
        let hub = MemoryHub::new();
        let cfg = config("a");
        let (parts, _view) = parts(&hub, &cfg, DevicePermissions::default());
        let mut call = CallSession::start(cfg, parts).await.unwrap();

        assert!(call.send_chat("   ").await.is_none());
        let sent = call.send_chat("  hello  ").await.unwrap();
        assert_eq!(sent.text, "hello");
        assert_eq!(sent.sender_name, "A");
        assert_eq!(call.snapshot().chat.len(), 1);
    }

    #[tokio::test]
    async fn toggles_flip_flags_and_notify_view() {
        let hub = MemoryHub::new();
        let cfg = config("a");
        let (parts, mut view) = parts(&hub, &cfg, DevicePermissions::default());
        let mut call = CallSession::start(cfg, parts).await.unwrap();

        assert!(!call.toggle_video());
        assert!(!call.toggle_audio());
        assert!(call.toggle_audio());
        let snapshot = call.snapshot();
        assert!(!snapshot.video_enabled);
        assert!(snapshot.audio_enabled);

        let mut media_events = 0;
        while let Ok(event) = view.try_recv() {
            if matches!(event, ViewEvent::LocalMedia { .. }) {
                media_events += 1;
            }
        }
        assert_eq!(media_events, 3);
    }

    #[tokio::test]
    async fn denied_screen_share_is_reported_and_keeps_camera() {
        let hub = MemoryHub::new();
        let cfg = config("a");
        let (parts, mut view) = parts(
            &hub,
            &cfg,
            DevicePermissions {
                screen: false,
                ..Default::default()
            },
        );
        let mut call = CallSession::start(cfg, parts).await.unwrap();
        let camera_video = call.snapshot().active_video_track;

        let err = call.toggle_screen_share().await.err().unwrap();
        assert!(matches!(err, CallError::ScreenShareDenied(_)));
        assert!(!call.snapshot().screen_sharing);
        assert_eq!(call.snapshot().active_video_track, camera_video);

        let mut notices = 0;
        while let Ok(event) = view.try_recv() {
            if matches!(event, ViewEvent::Notice(_)) {
                notices += 1;
            }
        }
        assert_eq!(notices, 1);
    }

    #[tokio::test]
    async fn end_call_is_idempotent_and_announces_leave() {
        let hub = MemoryHub::new();
        let cfg = config("a");
        let (parts, _view) = parts(&hub, &cfg, DevicePermissions::default());
        let observer = hub.connect("room", "z".into());
        let mut seen = observer.subscribe();
        let mut call = CallSession::start(cfg, parts).await.unwrap();

        assert_eq!(call.end_call().await.as_deref(), Some("/report/room/a"));
        assert_eq!(call.end_call().await, None);
        assert!(call.snapshot().ended);

        let mut left = 0;
        while let Ok(message) = seen.try_recv() {
            if matches!(message, SignalMessage::UserLeft(ref l) if l.user_id.as_str() == "a") {
                left += 1;
            }
        }
        assert_eq!(left, 1);
    }

    #[tokio::test]
    async fn screen_capture_ending_restores_camera_on_every_peer() {
        let hub = MemoryHub::new();
        let cfg = config("a");
        let (devices, mut feed) = SampleDevices::new(DevicePermissions::default());
        let factory = FakeConnectionFactory::new("a");
        let (view_tx, mut view) = mpsc::unbounded_channel();
        let parts = CallParts {
            devices: Arc::new(devices),
            factory: factory.clone(),
            signaling: Arc::new(hub.connect("room", cfg.user_id.clone())),
            report_sink: None,
            sample_source: None,
            view: Some(view_tx),
        };
        let call = CallSession::start(cfg, parts).await.unwrap();
        let handle = call.handle();
        let task = tokio::spawn(call.run());
        let camera = feed.recv().await.unwrap();

        let b = hub.connect("room", "b".into());
        b.send(SignalMessage::UserJoined(UserJoined {
            user_id: "b".into(),
            username: "B".into(),
        }))
        .await
        .unwrap();
        while handle.snapshot().await.unwrap().peers.is_empty() {
            tokio::task::yield_now().await;
        }

        assert!(handle.toggle_screen_share().await.unwrap());
        let screen = feed.recv().await.unwrap();
        let screen_video = screen.video_track().unwrap();
        let to_b = factory.latest(&"b".into()).unwrap();
        assert_eq!(to_b.log().video_track.as_deref(), Some(screen_video.id()));

        // the user stops sharing from the system UI
        screen_video.end_capture();
        let mut snapshot = handle.snapshot().await.unwrap();
        for _ in 0..100 {
            if !snapshot.screen_sharing {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
            snapshot = handle.snapshot().await.unwrap();
        }
        assert!(!snapshot.screen_sharing);

        let camera_video = camera.video_track().unwrap();
        assert_eq!(snapshot.active_video_track.as_deref(), Some(camera_video.id()));
        assert_eq!(to_b.log().video_track.as_deref(), Some(camera_video.id()));
        let mut ended_notice = false;
        while let Ok(event) = view.try_recv() {
            if matches!(event, ViewEvent::Notice(ref text) if text == "Screen sharing ended") {
                ended_notice = true;
            }
        }
        assert!(ended_notice);

        // sharing again still works
        assert!(handle.toggle_screen_share().await.unwrap());
        handle.end_call().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn handle_drives_the_loop() {
        let hub = MemoryHub::new();
        let cfg = config("a");
        let (parts, _view) = parts(&hub, &cfg, DevicePermissions::default());
        let call = CallSession::start(cfg, parts).await.unwrap();
        let handle = call.handle();
        let task = tokio::spawn(call.run());

        assert!(!handle.toggle_video().await.unwrap());
        assert!(handle.toggle_screen_share().await.unwrap());
        assert!(handle.snapshot().await.unwrap().screen_sharing);
        assert!(!handle.toggle_screen_share().await.unwrap());
        assert_eq!(handle.end_call().await.unwrap().as_deref(), Some("/report/room/a"));

        assert_eq!(task.await.unwrap().as_deref(), Some("/report/room/a"));
        assert!(matches!(
            handle.snapshot().await,
            Err(CallError::SessionClosed)
        ));
    }
}
