//! Client-side orchestration core for the adaptive-learning backend: one
//! session object wires the sensing loop, the request/response channel, the
//! push channel and the derived presentation effects around a single-writer
//! state reconciler.

use std::{sync::Arc, time::Duration};

use shared::domain::{InteractionKind, Severity, StudentId};
use shared::error::CoreError;
use shared::protocol::{AnalyticsResponse, ClientPush, ServerPush};
use tokio::{sync::Mutex, task::JoinHandle, time};
use tracing::{debug, info, warn};

pub mod capture;
pub mod effects;
pub mod reconciler;
pub mod tracker;
pub mod transport;

pub use capture::{CaptureConfig, CaptureState, FrameSource, SensorCaptureLoop, UnavailableFrameSource};
pub use effects::{EffectConfig, EffectScheduler, RenderCommand, RenderHook};
pub use reconciler::{StateChange, StateReconciler};
pub use tracker::InteractionTracker;
pub use transport::{TransportAdapter, TransportEvent};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub server_url: String,
    pub capture: CaptureConfig,
    pub effects: EffectConfig,
    pub analytics_poll_period: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:5000".to_string(),
            capture: CaptureConfig::default(),
            effects: EffectConfig::default(),
            analytics_poll_period: Duration::from_secs(30),
        }
    }
}

#[derive(Default)]
struct SessionTasks {
    started: bool,
    push_router: Option<JoinHandle<()>>,
    effect_driver: Option<JoinHandle<()>>,
    analytics_poll: Option<JoinHandle<()>>,
}

/// Owns startup sequencing and teardown of the whole client. All components
/// share one explicit context built here; there is no global instance.
pub struct LearningSession {
    student_id: StudentId,
    config: SessionConfig,
    transport: Arc<TransportAdapter>,
    reconciler: Arc<StateReconciler>,
    effects: Arc<EffectScheduler>,
    capture: Arc<SensorCaptureLoop>,
    tracker: Arc<InteractionTracker>,
    tasks: Mutex<SessionTasks>,
}

impl LearningSession {
    pub fn new(config: SessionConfig, source: Arc<dyn FrameSource>) -> Arc<Self> {
        Self::with_render_hook(config, source, None)
    }

    pub fn with_render_hook(
        config: SessionConfig,
        source: Arc<dyn FrameSource>,
        hook: Option<RenderHook>,
    ) -> Arc<Self> {
        let student_id = StudentId::generate();
        let transport = TransportAdapter::new(config.server_url.clone());
        let reconciler = StateReconciler::new();
        let effects = EffectScheduler::with_render_hook(config.effects.clone(), hook);
        let capture = SensorCaptureLoop::new(
            source,
            Arc::clone(&transport),
            Arc::clone(&reconciler),
            Arc::clone(&effects),
            student_id,
            config.capture.clone(),
        );
        let tracker = InteractionTracker::new(
            Arc::clone(&transport),
            Arc::clone(&reconciler),
            student_id,
        );
        Arc::new(Self {
            student_id,
            config,
            transport,
            reconciler,
            effects,
            capture,
            tracker,
            tasks: Mutex::new(SessionTasks::default()),
        })
    }

    pub fn student_id(&self) -> StudentId {
        self.student_id
    }

    pub fn transport(&self) -> &Arc<TransportAdapter> {
        &self.transport
    }

    pub fn reconciler(&self) -> &Arc<StateReconciler> {
        &self.reconciler
    }

    pub fn effects(&self) -> &Arc<EffectScheduler> {
        &self.effects
    }

    pub fn capture(&self) -> &Arc<SensorCaptureLoop> {
        &self.capture
    }

    pub fn tracker(&self) -> &Arc<InteractionTracker> {
        &self.tracker
    }

    /// Startup order is strict: register push-channel routing, connect the
    /// transport, start sensing, then begin the periodic analytics poll. A
    /// failed transport connect degrades to a notification; the rest of the
    /// session still comes up.
    pub async fn start(self: &Arc<Self>) {
        {
            let mut tasks = self.tasks.lock().await;
            if tasks.started {
                return;
            }
            tasks.started = true;
        }

        // Both consumers subscribe before the channel connects so no early
        // server frame can slip past them.
        let push_router = self.spawn_push_router();
        let effect_driver = self.effects.drive(self.reconciler.subscribe_changes());
        if let Err(err) = self.transport.connect(&self.student_id).await {
            warn!("push channel unavailable at startup: {err}");
            self.effects
                .notify(
                    "Realtime channel unavailable - continuing without live adaptations",
                    Severity::Warning,
                )
                .await;
        }

        self.capture.start().await;
        let analytics_poll = self.spawn_analytics_poll();

        let mut tasks = self.tasks.lock().await;
        tasks.push_router = Some(push_router);
        tasks.effect_driver = Some(effect_driver);
        tasks.analytics_poll = Some(analytics_poll);
        info!(student_id = %self.student_id, "learning session started");
    }

    fn spawn_push_router(self: &Arc<Self>) -> JoinHandle<()> {
        let session = Arc::clone(self);
        let mut inbound = self.transport.subscribe_push();
        let mut lifecycle = self.transport.subscribe_lifecycle();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = inbound.recv() => match event {
                        Ok(ServerPush::Connected { message }) => {
                            info!("backend acknowledged connection: {message}");
                            session.effects.notify(message, Severity::Success).await;
                        }
                        Ok(ServerPush::AdaptationsGenerated { adaptations }) => {
                            session.effects.queue_adaptations(adaptations).await;
                        }
                        Ok(ServerPush::QuantumCollapsed { collapse_data }) => {
                            session.reconciler.apply_quantum_update(collapse_data).await;
                        }
                        Ok(ServerPush::Error { message }) => {
                            session
                                .effects
                                .notify(format!("Backend error: {message}"), Severity::Error)
                                .await;
                        }
                        Ok(ServerPush::Disconnect) => {
                            info!("backend requested disconnect");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "push router lagged behind inbound events");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                    signal = lifecycle.recv() => match signal {
                        Ok(TransportEvent::ChannelError(message)) => {
                            session.effects.notify(message, Severity::Error).await;
                        }
                        Ok(TransportEvent::Disconnected) => {
                            session
                                .effects
                                .notify("Realtime channel disconnected", Severity::Warning)
                                .await;
                        }
                        Ok(TransportEvent::Connected) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "push router lagged behind lifecycle signals");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        })
    }

    fn spawn_analytics_poll(self: &Arc<Self>) -> JoinHandle<()> {
        let session = Arc::clone(self);
        let period = self.config.analytics_poll_period;
        tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let path = format!("/student-analytics/{}", session.student_id);
                match session.transport.get::<AnalyticsResponse>(&path).await {
                    Ok(response) => {
                        session.reconciler.apply_analytics(response.analytics).await;
                    }
                    // Each poll cycle tolerates its own failure.
                    Err(err) => debug!("analytics poll failed: {err}"),
                }
            }
        })
    }

    /// Convenience passthrough from the presentation surface.
    pub async fn record_interaction(&self, kind: InteractionKind, target: &str, success_rate: f64) {
        self.tracker.record(kind, target, success_rate).await;
    }

    /// Asks the backend to collapse the learning-style distribution now.
    pub async fn request_collapse(&self) -> Result<(), CoreError> {
        self.transport
            .push_event(&ClientPush::QuantumCollapse {
                student_id: self.student_id,
            })
            .await
    }

    /// Teardown in reverse startup order. Each step checks whether its
    /// resource was actually acquired, so this is safe after a partial or
    /// absent startup and safe to call repeatedly.
    pub async fn shutdown(&self) {
        let (analytics_poll, push_router, effect_driver) = {
            let mut tasks = self.tasks.lock().await;
            tasks.started = false;
            (
                tasks.analytics_poll.take(),
                tasks.push_router.take(),
                tasks.effect_driver.take(),
            )
        };
        if let Some(task) = analytics_poll {
            task.abort();
        }
        self.capture.stop().await;
        if let Some(task) = push_router {
            task.abort();
        }
        if let Some(task) = effect_driver {
            task.abort();
        }
        self.transport.disconnect().await;
        info!(student_id = %self.student_id, "learning session shut down");
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
