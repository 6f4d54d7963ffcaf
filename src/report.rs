//! Emotion telemetry: periodic samples and the end-of-call report

use crate::error::{CallError, Result};
use crate::peer::types::ParticipantId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Neutral,
    Happy,
    Sad,
    Angry,
    Fearful,
    Disgusted,
    Surprised,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EmotionSample {
    pub emotion: Emotion,
    pub eye_contact: bool,
    pub timestamp: DateTime<Utc>,
}

impl EmotionSample {
    pub fn now(emotion: Emotion, eye_contact: bool) -> Self {
        Self {
            emotion,
            eye_contact,
            timestamp: Utc::now(),
        }
    }
}

/// Where samples and the end-of-call notice go
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn submit_sample(
        &self,
        room_id: &str,
        user_id: &ParticipantId,
        sample: &EmotionSample,
    ) -> Result<()>;

    /// Returns the location of the finished report.
    async fn end_call(&self, room_id: &str, user_id: &ParticipantId) -> Result<String>;
}

#[derive(Serialize, Debug)]
struct SampleUpload<'a> {
    room_id: &'a str,
    user_id: &'a ParticipantId,
    emotion: Emotion,
    eye_contact: bool,
}

#[derive(Serialize, Debug)]
struct EndCallRequest<'a> {
    room_id: &'a str,
    user_id: &'a ParticipantId,
}

#[derive(Deserialize, Debug)]
struct EndCallResponse {
    status: String,
    report_url: Option<String>,
}

/// Posts JSON to `{base}/save_emotion` and `{base}/end_call`
pub struct HttpReportSink {
    client: Client,
    base_url: String,
}

impl HttpReportSink {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }
}

#[async_trait]
impl ReportSink for HttpReportSink {
    async fn submit_sample(
        &self,
        room_id: &str,
        user_id: &ParticipantId,
        sample: &EmotionSample,
    ) -> Result<()> {
        let body = SampleUpload {
            room_id,
            user_id,
            emotion: sample.emotion,
            eye_contact: sample.eye_contact,
        };
        self.client
            .post(self.endpoint("save_emotion"))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn end_call(&self, room_id: &str, user_id: &ParticipantId) -> Result<String> {
        let response: EndCallResponse = self
            .client
            .post(self.endpoint("end_call"))
            .json(&EndCallRequest { room_id, user_id })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        match response {
            EndCallResponse {
                status,
                report_url: Some(url),
            } if status == "success" => Ok(url),
            EndCallResponse { status, .. } => Err(CallError::Report(format!(
                "end_call answered with status {status}"
            ))),
        }
    }
}

/// Keeps samples in memory, keyed by room and user
#[derive(Debug, Default)]
pub struct MemoryReportSink {
    samples: Mutex<HashMap<(String, ParticipantId), Vec<EmotionSample>>>,
}

impl MemoryReportSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn samples(&self, room_id: &str, user_id: &ParticipantId) -> Vec<EmotionSample> {
        self.samples
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&(room_id.to_string(), user_id.clone()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn summary(&self, room_id: &str, user_id: &ParticipantId) -> EmotionSummary {
        EmotionSummary::from_samples(&self.samples(room_id, user_id))
    }
}

#[async_trait]
impl ReportSink for MemoryReportSink {
    async fn submit_sample(
        &self,
        room_id: &str,
        user_id: &ParticipantId,
        sample: &EmotionSample,
    ) -> Result<()> {
        self.samples
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry((room_id.to_string(), user_id.clone()))
            .or_default()
            .push(sample.clone());
        Ok(())
    }

    async fn end_call(&self, room_id: &str, user_id: &ParticipantId) -> Result<String> {
        Ok(format!("/report/{room_id}/{user_id}"))
    }
}

/// Aggregate over a call's samples, in percent
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EmotionSummary {
    pub emotion_percentages: BTreeMap<Emotion, f64>,
    pub eye_contact_percentage: f64,
    pub total_samples: usize,
}

impl EmotionSummary {
    /// An empty call reports 100% neutral and no eye contact.
    pub fn from_samples(samples: &[EmotionSample]) -> Self {
        let total = samples.len();
        if total == 0 {
            return Self {
                emotion_percentages: BTreeMap::from([(Emotion::Neutral, 100.0)]),
                eye_contact_percentage: 0.0,
                total_samples: 0,
            };
        }

        let mut counts: BTreeMap<Emotion, usize> = BTreeMap::new();
        for sample in samples {
            *counts.entry(sample.emotion).or_default() += 1;
        }
        let eye_contact = samples.iter().filter(|s| s.eye_contact).count();
        let pct = |n: usize| n as f64 * 100.0 / total as f64;

        Self {
            emotion_percentages: counts.into_iter().map(|(e, n)| (e, pct(n))).collect(),
            eye_contact_percentage: pct(eye_contact),
            total_samples: total,
        }
    }

    pub fn dominant(&self) -> Emotion {
        self.emotion_percentages
            .iter()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(e, _)| *e)
            .unwrap_or(Emotion::Neutral)
    }
}

/// Produces the current affect reading; `None` when nothing was detected
#[async_trait]
pub trait SampleSource: Send + Sync {
    async fn sample(&self) -> Option<EmotionSample>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PumpState {
    Running,
    Paused,
    Stopped,
}

/// Polls a [`SampleSource`] on a fixed interval and uploads each reading.
///
/// Upload failures are logged and sampling carries on.
pub struct SamplePump {
    control: watch::Sender<PumpState>,
    task: Option<JoinHandle<()>>,
}

impl SamplePump {
    pub fn spawn(
        room_id: String,
        user_id: ParticipantId,
        interval: Duration,
        source: Arc<dyn SampleSource>,
        sink: Arc<dyn ReportSink>,
    ) -> Self {
        let (control, mut state) = watch::channel(PumpState::Running);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!("Emotion sampling every {interval:?} for {user_id} in {room_id}");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if *state.borrow() != PumpState::Running {
                            continue;
                        }
                        let Some(sample) = source.sample().await else {
                            continue;
                        };
                        debug!("Sample {:?} (eye contact: {})", sample.emotion, sample.eye_contact);
                        if let Err(e) = sink.submit_sample(&room_id, &user_id, &sample).await {
                            warn!("Failed to upload emotion sample: {e}");
                        }
                    }
                    changed = state.changed() => {
                        if changed.is_err() || *state.borrow() == PumpState::Stopped {
                            break;
                        }
                    }
                }
            }
            debug!("Emotion sampling stopped");
        });
        Self {
            control,
            task: Some(task),
        }
    }

    pub fn pause(&self) {
        self.control.send_replace(PumpState::Paused);
    }

    pub fn resume(&self) {
        if *self.control.borrow() == PumpState::Paused {
            self.control.send_replace(PumpState::Running);
        }
    }

    pub fn is_paused(&self) -> bool {
        *self.control.borrow() == PumpState::Paused
    }

    /// Stops sampling and waits for an in-flight upload to finish.
    pub async fn stop(&mut self) {
        self.control.send_replace(PumpState::Stopped);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SamplePump {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}
