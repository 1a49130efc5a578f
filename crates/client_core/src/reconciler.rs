//! Canonical in-memory state and its single writer path.

use std::sync::Arc;

use shared::domain::{
    AnalyticsSnapshot, EmotionSource, EmotionVector, LearningState, LearningStyle, QuantumState,
};
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

/// An accepted state mutation, broadcast to the effect scheduler.
#[derive(Debug, Clone)]
pub enum StateChange {
    Emotions {
        vector: EmotionVector,
        learning_state: LearningState,
        source: EmotionSource,
    },
    Quantum(QuantumState),
    /// One-shot, latched on the first false-to-true collapse transition.
    Collapsed {
        style: LearningStyle,
        confidence: f64,
    },
    Analytics(AnalyticsSnapshot),
}

struct CanonicalState {
    emotions: EmotionVector,
    source: EmotionSource,
    last_seq: u64,
    quantum: QuantumState,
    collapse_signalled: bool,
    analytics: Option<AnalyticsSnapshot>,
}

/// Sole mutator of canonical state. Update methods never await while holding
/// the lock, so readers can never observe a half-applied update; change
/// events are emitted under the lock, so stream order always matches
/// application order.
pub struct StateReconciler {
    inner: Mutex<CanonicalState>,
    changes: broadcast::Sender<StateChange>,
}

impl StateReconciler {
    pub fn new() -> Arc<Self> {
        let (changes, _) = broadcast::channel(256);
        Arc::new(Self {
            inner: Mutex::new(CanonicalState {
                emotions: EmotionVector::neutral(),
                source: EmotionSource::Simulated,
                last_seq: 0,
                quantum: QuantumState::default(),
                collapse_signalled: false,
                analytics: None,
            }),
            changes,
        })
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<StateChange> {
        self.changes.subscribe()
    }

    /// Applies an emotion update last-write-wins by receipt order. `seq` is
    /// recorded for observability only; updates are deliberately not
    /// reordered by it.
    pub async fn apply_emotion_update(
        &self,
        vector: EmotionVector,
        source: EmotionSource,
        seq: u64,
    ) {
        let mut state = self.inner.lock().await;
        if seq < state.last_seq {
            debug!(
                seq,
                last_seq = state.last_seq,
                "late emotion update applied (last received wins)"
            );
        }
        state.last_seq = state.last_seq.max(seq);
        state.emotions = vector;
        state.source = source;
        // Emitted under the lock (send never blocks) so the change stream
        // observes updates in application order.
        let _ = self.changes.send(StateChange::Emotions {
            vector,
            learning_state: LearningState::classify(&vector),
            source,
        });
    }

    /// Applies the backend's learning-style distribution. Collapse is
    /// monotonic for the session, and the collapse signal fires exactly once.
    pub async fn apply_quantum_update(&self, update: QuantumState) {
        let mut state = self.inner.lock().await;
        let mut next = update;
        if !next.collapsed {
            // Style and confidence are meaningless until collapse.
            next.optimal_style = None;
            next.confidence = None;
        }
        if state.quantum.collapsed {
            next.collapsed = true;
            if next.optimal_style.is_none() {
                next.optimal_style = state.quantum.optimal_style;
            }
            if next.confidence.is_none() {
                next.confidence = state.quantum.confidence;
            }
        }
        let newly_collapsed = next.collapsed && !state.collapse_signalled;
        if newly_collapsed {
            state.collapse_signalled = true;
        }
        state.quantum = next;
        let _ = self.changes.send(StateChange::Quantum(next));
        if newly_collapsed {
            let _ = self.changes.send(StateChange::Collapsed {
                style: next
                    .optimal_style
                    .unwrap_or_else(|| next.learning_styles.dominant()),
                confidence: next
                    .confidence
                    .unwrap_or_else(|| next.learning_styles.max_weight()),
            });
        }
    }

    /// Unconditional replace; backend snapshots are assumed self-consistent.
    pub async fn apply_analytics(&self, snapshot: AnalyticsSnapshot) {
        let mut state = self.inner.lock().await;
        state.analytics = Some(snapshot);
        let _ = self.changes.send(StateChange::Analytics(snapshot));
    }

    pub async fn current_emotions(&self) -> EmotionVector {
        self.inner.lock().await.emotions
    }

    pub async fn current_learning_state(&self) -> LearningState {
        LearningState::classify(&self.inner.lock().await.emotions)
    }

    pub async fn current_quantum_state(&self) -> QuantumState {
        self.inner.lock().await.quantum
    }

    pub async fn current_analytics(&self) -> Option<AnalyticsSnapshot> {
        self.inner.lock().await.analytics
    }

    pub async fn emotion_source(&self) -> EmotionSource {
        self.inner.lock().await.source
    }

    pub async fn last_seq(&self) -> u64 {
        self.inner.lock().await.last_seq
    }
}
