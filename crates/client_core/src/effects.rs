//! Turns reconciled state changes into time-bounded presentation effects.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::Utc;
use shared::domain::{
    AdaptationEntry, AnalyticsSnapshot, EmotionSource, EmotionVector, LearningState,
    LearningStyle, NotificationEntry, QuantumState, Severity,
};
use tokio::{sync::{broadcast, Mutex}, task::JoinHandle, time};
use tracing::warn;

use crate::reconciler::StateChange;

/// Structured update commands for the (external) presentation surface.
#[derive(Debug, Clone)]
pub enum RenderCommand {
    ShowNotification(NotificationEntry),
    DismissNotification { id: u64 },
    AdaptationFeed(Vec<AdaptationEntry>),
    EmotionBars {
        vector: EmotionVector,
        learning_state: LearningState,
        source: EmotionSource,
    },
    StyleMeters(QuantumState),
    ShowCollapseAlert {
        style: LearningStyle,
        confidence: f64,
    },
    HideCollapseAlert,
    PulseStarted,
    PulseEnded,
    Analytics(AnalyticsSnapshot),
}

/// Extension callback invoked after each emitted render command, wired at
/// construction time.
pub type RenderHook = Box<dyn Fn(&RenderCommand) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct EffectConfig {
    pub notification_ttl: Duration,
    pub adaptation_reveal_delay: Duration,
    pub collapse_alert_ttl: Duration,
    pub pulse_duration: Duration,
    pub adaptation_history_cap: usize,
}

impl Default for EffectConfig {
    fn default() -> Self {
        Self {
            notification_ttl: Duration::from_secs(5),
            adaptation_reveal_delay: Duration::from_millis(300),
            collapse_alert_ttl: Duration::from_secs(10),
            pulse_duration: Duration::from_secs(2),
            adaptation_history_cap: 8,
        }
    }
}

/// Owns the transient notification set and the bounded adaptation feed.
/// Every scheduled dismissal is cancel-safe: timers degrade to no-ops when
/// their target is already gone or nobody is listening.
pub struct EffectScheduler {
    config: EffectConfig,
    render: broadcast::Sender<RenderCommand>,
    notifications: Mutex<Vec<NotificationEntry>>,
    adaptations: Mutex<VecDeque<AdaptationEntry>>,
    next_notification_id: AtomicU64,
    hook: Option<RenderHook>,
}

impl EffectScheduler {
    pub fn new(config: EffectConfig) -> Arc<Self> {
        Self::with_render_hook(config, None)
    }

    pub fn with_render_hook(config: EffectConfig, hook: Option<RenderHook>) -> Arc<Self> {
        let (render, _) = broadcast::channel(256);
        Arc::new(Self {
            config,
            render,
            notifications: Mutex::new(Vec::new()),
            adaptations: Mutex::new(VecDeque::new()),
            next_notification_id: AtomicU64::new(1),
            hook,
        })
    }

    pub fn subscribe_render(&self) -> broadcast::Receiver<RenderCommand> {
        self.render.subscribe()
    }

    fn emit(&self, command: RenderCommand) {
        // A send error only means no surface is attached right now.
        let _ = self.render.send(command.clone());
        if let Some(hook) = &self.hook {
            hook(&command);
        }
    }

    /// Routes reconciled state changes into render commands until the
    /// change stream closes.
    pub fn drive(
        self: &Arc<Self>,
        mut changes: broadcast::Receiver<StateChange>,
    ) -> JoinHandle<()> {
        let effects = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(StateChange::Emotions {
                        vector,
                        learning_state,
                        source,
                    }) => effects.emit(RenderCommand::EmotionBars {
                        vector,
                        learning_state,
                        source,
                    }),
                    Ok(StateChange::Quantum(quantum)) => {
                        effects.emit(RenderCommand::StyleMeters(quantum));
                    }
                    Ok(StateChange::Collapsed { style, confidence }) => {
                        effects.collapse_alert(style, confidence).await;
                    }
                    Ok(StateChange::Analytics(snapshot)) => {
                        effects.emit(RenderCommand::Analytics(snapshot));
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "effect driver lagged behind state changes");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Displays a notification immediately and schedules its dismissal.
    /// Notifications stack without a cap, oldest displayed first.
    pub async fn notify(self: &Arc<Self>, message: impl Into<String>, severity: Severity) {
        let entry = NotificationEntry {
            id: self.next_notification_id.fetch_add(1, Ordering::Relaxed),
            message: message.into(),
            severity,
            created_at: Utc::now(),
        };
        self.notifications.lock().await.push(entry.clone());
        self.emit(RenderCommand::ShowNotification(entry.clone()));

        let effects = Arc::clone(self);
        let ttl = self.config.notification_ttl;
        tokio::spawn(async move {
            time::sleep(ttl).await;
            effects
                .notifications
                .lock()
                .await
                .retain(|notification| notification.id != entry.id);
            effects.emit(RenderCommand::DismissNotification { id: entry.id });
        });
    }

    pub async fn active_notifications(&self) -> Vec<NotificationEntry> {
        self.notifications.lock().await.clone()
    }

    /// Inserts suggestions into the bounded feed with a staggered reveal
    /// cadence.
    pub async fn queue_adaptations(self: &Arc<Self>, suggestions: Vec<String>) {
        if suggestions.is_empty() {
            return;
        }
        let effects = Arc::clone(self);
        let delay = self.config.adaptation_reveal_delay;
        tokio::spawn(async move {
            for (index, text) in suggestions.into_iter().enumerate() {
                if index > 0 {
                    time::sleep(delay).await;
                }
                effects.push_adaptation(text).await;
            }
        });
    }

    pub(crate) async fn push_adaptation(&self, text: String) {
        let snapshot = {
            let mut feed = self.adaptations.lock().await;
            feed.push_back(AdaptationEntry {
                text,
                created_at: Utc::now(),
            });
            while feed.len() > self.config.adaptation_history_cap {
                feed.pop_front();
            }
            feed.iter().cloned().collect::<Vec<_>>()
        };
        self.emit(RenderCommand::AdaptationFeed(snapshot));
    }

    pub async fn adaptation_feed(&self) -> Vec<AdaptationEntry> {
        self.adaptations.lock().await.iter().cloned().collect()
    }

    /// One-shot collapse alert with timed dismissal, plus a short ambient
    /// pulse that reverts to baseline.
    pub async fn collapse_alert(self: &Arc<Self>, style: LearningStyle, confidence: f64) {
        self.emit(RenderCommand::ShowCollapseAlert { style, confidence });
        self.emit(RenderCommand::PulseStarted);
        self.notify(
            format!("Optimal learning style locked in: {style} ({:.0}% confidence)", confidence * 100.0),
            Severity::Success,
        )
        .await;

        let effects = Arc::clone(self);
        let alert_ttl = self.config.collapse_alert_ttl;
        tokio::spawn(async move {
            time::sleep(alert_ttl).await;
            effects.emit(RenderCommand::HideCollapseAlert);
        });

        let effects = Arc::clone(self);
        let pulse = self.config.pulse_duration;
        tokio::spawn(async move {
            time::sleep(pulse).await;
            effects.emit(RenderCommand::PulseEnded);
        });
    }
}
