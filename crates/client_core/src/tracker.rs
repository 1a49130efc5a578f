//! Best-effort interaction telemetry, annotated with current state.

use std::sync::Arc;

use chrono::Utc;
use shared::{
    domain::{InteractionKind, StudentId},
    protocol::{ClientPush, QuantumUpdateRequest, QuantumUpdateResponse},
};
use tracing::debug;

use crate::{reconciler::StateReconciler, transport::TransportAdapter};

/// Pure observer: reads state snapshots, never mutates them directly. A
/// dropped event is lost silently; there is no retry.
pub struct InteractionTracker {
    transport: Arc<TransportAdapter>,
    reconciler: Arc<StateReconciler>,
    student_id: StudentId,
}

impl InteractionTracker {
    pub fn new(
        transport: Arc<TransportAdapter>,
        reconciler: Arc<StateReconciler>,
        student_id: StudentId,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            reconciler,
            student_id,
        })
    }

    /// Forwards one qualifying interaction: a push-channel event annotated
    /// with the current emotion/learning snapshots, plus a learning-style
    /// update exchange whose result feeds back into the reconciler.
    pub async fn record(&self, kind: InteractionKind, target: &str, success_rate: f64) {
        let emotions = self.reconciler.current_emotions().await;
        let learning_state = self.reconciler.current_learning_state().await;
        let timestamp = Utc::now();

        let push = ClientPush::InteractionTracked {
            student_id: self.student_id,
            interaction_type: kind,
            target: target.to_string(),
            timestamp,
            emotions,
            learning_state,
        };
        if let Err(err) = self.transport.push_event(&push).await {
            debug!("interaction event dropped: {err}");
        }

        let request = QuantumUpdateRequest {
            student_id: self.student_id,
            interaction_type: kind,
            success_rate,
            engagement_level: emotions.engaged,
            emotions,
            timestamp,
        };
        match self
            .transport
            .request::<_, QuantumUpdateResponse>("/quantum-update", &request)
            .await
        {
            Ok(response) => {
                self.reconciler
                    .apply_quantum_update(response.quantum_state)
                    .await;
            }
            Err(err) => debug!("quantum update request failed: {err}"),
        }
    }
}
