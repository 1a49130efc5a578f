use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    AnalyticsSnapshot, EmotionVector, InteractionKind, LearningState, QuantumState, StudentId,
};

/// Response to `POST /detect-emotion` (multipart image upload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectEmotionResponse {
    pub success: bool,
    pub emotions: EmotionVector,
    #[serde(default)]
    pub face_detected: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuantumUpdateRequest {
    pub student_id: StudentId,
    pub interaction_type: InteractionKind,
    pub success_rate: f64,
    pub engagement_level: f64,
    pub emotions: EmotionVector,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuantumUpdateResponse {
    pub success: bool,
    pub quantum_state: QuantumState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptationsRequest {
    pub emotions: EmotionVector,
    pub learning_state: LearningState,
    pub student_id: StudentId,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptationsResponse {
    pub success: bool,
    #[serde(default)]
    pub adaptations: Vec<String>,
}

/// Response to `GET /student-analytics/{student_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsResponse {
    pub success: bool,
    pub analytics: AnalyticsSnapshot,
}

/// Backend-initiated push-channel events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerPush {
    Connected { message: String },
    AdaptationsGenerated { adaptations: Vec<String> },
    QuantumCollapsed { collapse_data: QuantumState },
    Error { message: String },
    Disconnect,
}

/// Client-initiated push-channel events. Every variant carries the session
/// identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientPush {
    EmotionUpdate {
        student_id: StudentId,
        emotions: EmotionVector,
        learning_state: LearningState,
    },
    QuantumCollapse {
        student_id: StudentId,
    },
    InteractionTracked {
        student_id: StudentId,
        interaction_type: InteractionKind,
        target: String,
        timestamp: DateTime<Utc>,
        emotions: EmotionVector,
        learning_state: LearningState,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LearningStyle;

    #[test]
    fn decodes_quantum_collapsed_frame() {
        let raw = r#"{
            "event": "quantum_collapsed",
            "data": {
                "collapse_data": {
                    "learning_styles": {"visual": 0.7, "auditory": 0.2, "kinesthetic": 0.1},
                    "collapsed": true,
                    "optimal_style": "visual",
                    "confidence": 0.7
                }
            }
        }"#;
        let event: ServerPush = serde_json::from_str(raw).expect("parse");
        match event {
            ServerPush::QuantumCollapsed { collapse_data } => {
                assert!(collapse_data.collapsed);
                assert_eq!(collapse_data.optimal_style, Some(LearningStyle::Visual));
                assert_eq!(collapse_data.confidence, Some(0.7));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn decodes_disconnect_frame_without_data() {
        let event: ServerPush =
            serde_json::from_str(r#"{"event":"disconnect"}"#).expect("parse");
        assert!(matches!(event, ServerPush::Disconnect));
    }

    #[test]
    fn emotion_update_frame_carries_student_id() {
        let student_id = StudentId::generate();
        let frame = ClientPush::EmotionUpdate {
            student_id,
            emotions: EmotionVector::neutral(),
            learning_state: LearningState::Neutral,
        };
        let raw = serde_json::to_value(&frame).expect("serialize");
        assert_eq!(raw["event"], "emotion_update");
        assert_eq!(raw["data"]["student_id"], student_id.0.to_string());
        assert_eq!(raw["data"]["learning_state"], "neutral");
    }

    #[test]
    fn adaptations_default_to_empty_on_missing_field() {
        let response: AdaptationsResponse =
            serde_json::from_str(r#"{"success":true}"#).expect("parse");
        assert!(response.adaptations.is_empty());
    }
}
