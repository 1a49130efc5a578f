//! Periodic sensing loop: live frame capture with backend inference, or
//! synthetic emotion generation when no device is available.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use shared::{
    domain::{EmotionSource, EmotionVector, LearningState, Severity, StudentId},
    error::CoreError,
    protocol::{AdaptationsRequest, AdaptationsResponse, ClientPush, DetectEmotionResponse},
};
use tokio::{sync::Mutex, task::JoinHandle, time};
use tracing::{debug, info, warn};

use crate::{
    effects::EffectScheduler, reconciler::StateReconciler, transport::TransportAdapter,
};

/// Seam for the sensing device. The real implementation wraps whatever
/// camera stack the host platform provides.
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn open(&self) -> Result<(), CoreError>;
    async fn next_frame(&self) -> Result<Vec<u8>, CoreError>;
    async fn release(&self);
}

/// Default source for hosts without a camera; `open` always fails, which
/// drives the loop into synthetic generation.
pub struct UnavailableFrameSource;

#[async_trait]
impl FrameSource for UnavailableFrameSource {
    async fn open(&self) -> Result<(), CoreError> {
        Err(CoreError::Sensor("no capture device available".to_string()))
    }

    async fn next_frame(&self) -> Result<Vec<u8>, CoreError> {
        Err(CoreError::Sensor("no capture device available".to_string()))
    }

    async fn release(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Uninitialized,
    Acquiring,
    Active,
    Degraded,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub live_period: Duration,
    pub synthetic_period: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            live_period: Duration::from_secs(3),
            // Intentionally a different cadence from live capture.
            synthetic_period: Duration::from_secs(5),
        }
    }
}

pub struct SensorCaptureLoop {
    source: Arc<dyn FrameSource>,
    transport: Arc<TransportAdapter>,
    reconciler: Arc<StateReconciler>,
    effects: Arc<EffectScheduler>,
    student_id: StudentId,
    config: CaptureConfig,
    state: Mutex<CaptureState>,
    cycle_task: Mutex<Option<JoinHandle<()>>>,
    seq: AtomicU64,
}

impl SensorCaptureLoop {
    pub fn new(
        source: Arc<dyn FrameSource>,
        transport: Arc<TransportAdapter>,
        reconciler: Arc<StateReconciler>,
        effects: Arc<EffectScheduler>,
        student_id: StudentId,
        config: CaptureConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            source,
            transport,
            reconciler,
            effects,
            student_id,
            config,
            state: Mutex::new(CaptureState::Uninitialized),
            cycle_task: Mutex::new(None),
            seq: AtomicU64::new(0),
        })
    }

    pub async fn state(&self) -> CaptureState {
        *self.state.lock().await
    }

    /// Attempts to acquire the sensing device. Success starts the live
    /// capture cycle; failure switches permanently to synthetic generation
    /// for the remainder of the session.
    pub async fn start(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().await;
            if *state != CaptureState::Uninitialized {
                return;
            }
            *state = CaptureState::Acquiring;
        }

        match self.source.open().await {
            Ok(()) => {
                let mut state = self.state.lock().await;
                if *state != CaptureState::Acquiring {
                    // stop() landed while the device was opening; it saw
                    // nothing active, so the device is released here.
                    drop(state);
                    self.source.release().await;
                    return;
                }
                *state = CaptureState::Active;
                info!(
                    period_ms = self.config.live_period.as_millis() as u64,
                    "sensing device acquired; live capture started"
                );
                let capture = Arc::clone(self);
                let task = tokio::spawn(async move { capture.run_live().await });
                // Stored while still holding the state lock, so stop()
                // either sees this handle or prevents the spawn entirely.
                *self.cycle_task.lock().await = Some(task);
            }
            Err(err) => {
                warn!("sensor acquisition failed; switching to synthetic generation: {err}");
                {
                    let mut state = self.state.lock().await;
                    if *state != CaptureState::Acquiring {
                        return;
                    }
                    *state = CaptureState::Degraded;
                    let capture = Arc::clone(self);
                    let task = tokio::spawn(async move { capture.run_synthetic().await });
                    *self.cycle_task.lock().await = Some(task);
                }
                self.effects
                    .notify(
                        "Camera unavailable - using simulated emotion sensing",
                        Severity::Warning,
                    )
                    .await;
            }
        }
    }

    async fn run_live(self: Arc<Self>) {
        let mut ticker = time::interval(self.config.live_period);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            // A failed cycle never halts the loop; it degrades to the
            // neutral vector for this tick.
            let vector = match self.capture_and_infer().await {
                Ok(vector) => vector,
                Err(err) => {
                    warn!("live capture cycle failed: {err}");
                    self.effects
                        .notify(
                            format!("Emotion detection unavailable: {err}"),
                            Severity::Warning,
                        )
                        .await;
                    EmotionVector::neutral()
                }
            };
            self.apply_update(vector, EmotionSource::Live).await;
        }
    }

    async fn capture_and_infer(&self) -> Result<EmotionVector, CoreError> {
        let frame = self.source.next_frame().await?;
        let response: DetectEmotionResponse = self
            .transport
            .request_multipart("/detect-emotion", "image", "frame.jpg", frame)
            .await?;
        if !response.face_detected {
            debug!("no face detected in frame; backend returned neutral estimates");
        }
        Ok(response.emotions)
    }

    async fn run_synthetic(self: Arc<Self>) {
        let mut ticker = time::interval(self.config.synthetic_period);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let vector = synthesize_emotions(&mut rand::thread_rng());
            self.apply_update(vector, EmotionSource::Simulated).await;
        }
    }

    async fn apply_update(&self, vector: EmotionVector, source: EmotionSource) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        self.reconciler
            .apply_emotion_update(vector, source, seq)
            .await;
        let learning_state = self.reconciler.current_learning_state().await;

        let push = ClientPush::EmotionUpdate {
            student_id: self.student_id,
            emotions: vector,
            learning_state,
        };
        if let Err(err) = self.transport.push_event(&push).await {
            debug!("emotion update push dropped: {err}");
        }

        self.request_adaptations(vector, learning_state).await;
    }

    async fn request_adaptations(&self, emotions: EmotionVector, learning_state: LearningState) {
        let request = AdaptationsRequest {
            emotions,
            learning_state,
            student_id: self.student_id,
            timestamp: Utc::now(),
        };
        match self
            .transport
            .request::<_, AdaptationsResponse>("/get-adaptations", &request)
            .await
        {
            Ok(response) => self.effects.queue_adaptations(response.adaptations).await,
            // Degrades to an empty adaptation list for this cycle.
            Err(err) => debug!("adaptation request failed: {err}"),
        }
    }

    /// Halts the cycle and releases the device. Idempotent; safe from any
    /// state, including before `start`. An in-flight inference response may
    /// still be applied after this returns.
    pub async fn stop(&self) {
        let was_active = {
            let mut state = self.state.lock().await;
            if *state == CaptureState::Stopped {
                return;
            }
            let was_active = *state == CaptureState::Active;
            *state = CaptureState::Stopped;
            was_active
        };
        if let Some(task) = self.cycle_task.lock().await.take() {
            task.abort();
        }
        if was_active {
            self.source.release().await;
        }
        info!("sensor capture stopped");
    }
}

/// Fabricates a plausible emotion vector: each label sampled from its own
/// range, then rescaled so no single label saturates unrealistically.
pub(crate) fn synthesize_emotions<R: Rng>(rng: &mut R) -> EmotionVector {
    let happy = rng.gen_range(0.3..0.7);
    let engaged = rng.gen_range(0.4..0.9);
    let confused = rng.gen_range(0.1..0.4);
    let frustrated = rng.gen_range(0.05..0.25);
    let bored = rng.gen_range(0.1..0.4);

    let sum = happy + engaged + confused + frustrated + bored;
    let rescale = |value: f64| (value / sum * 2.0).min(1.0);
    EmotionVector {
        happy: rescale(happy),
        engaged: rescale(engaged),
        confused: rescale(confused),
        frustrated: rescale(frustrated),
        bored: rescale(bored),
    }
}
