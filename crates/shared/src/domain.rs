use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Client-generated session identity, attached to every outbound message so
/// the backend can correlate state per client. Immutable for the process
/// lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StudentId(pub Uuid);

impl StudentId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Emotion {
    Happy,
    Engaged,
    Confused,
    Frustrated,
    Bored,
}

impl Emotion {
    pub const ALL: [Emotion; 5] = [
        Emotion::Happy,
        Emotion::Engaged,
        Emotion::Confused,
        Emotion::Frustrated,
        Emotion::Bored,
    ];
}

/// Per-label intensity estimates in [0,1]. The labels are independent and do
/// not sum to 1. Labels missing from a backend payload deserialize to 0.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EmotionVector {
    #[serde(default)]
    pub happy: f64,
    #[serde(default)]
    pub engaged: f64,
    #[serde(default)]
    pub confused: f64,
    #[serde(default)]
    pub frustrated: f64,
    #[serde(default)]
    pub bored: f64,
}

impl EmotionVector {
    /// The backend's neutral fallback state, used locally when a detection
    /// request fails.
    pub fn neutral() -> Self {
        Self {
            happy: 0.2,
            engaged: 0.3,
            confused: 0.1,
            frustrated: 0.1,
            bored: 0.1,
        }
    }

    pub fn get(&self, emotion: Emotion) -> f64 {
        match emotion {
            Emotion::Happy => self.happy,
            Emotion::Engaged => self.engaged,
            Emotion::Confused => self.confused,
            Emotion::Frustrated => self.frustrated,
            Emotion::Bored => self.bored,
        }
    }
}

/// Where an emotion update came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmotionSource {
    Live,
    Simulated,
}

/// Derived classification of the latest emotion vector. Never stored; always
/// recomputed on demand via [`LearningState::classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningState {
    Optimal,
    Struggling,
    Disengaged,
    Overwhelmed,
    Neutral,
}

impl LearningState {
    /// Fixed decision table, evaluated top to bottom, first match wins.
    pub fn classify(emotions: &EmotionVector) -> Self {
        if emotions.engaged > 0.6 && emotions.happy > 0.3 {
            LearningState::Optimal
        } else if emotions.confused > 0.5 || emotions.frustrated > 0.4 {
            LearningState::Struggling
        } else if emotions.bored > 0.6 {
            LearningState::Disengaged
        } else if emotions.frustrated > 0.7 {
            // Shadowed by the Struggling rule above (frustrated > 0.4 fires
            // first); kept verbatim for backend compatibility.
            LearningState::Overwhelmed
        } else {
            LearningState::Neutral
        }
    }
}

impl fmt::Display for LearningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LearningState::Optimal => "optimal",
            LearningState::Struggling => "struggling",
            LearningState::Disengaged => "disengaged",
            LearningState::Overwhelmed => "overwhelmed",
            LearningState::Neutral => "neutral",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningStyle {
    Visual,
    Auditory,
    Kinesthetic,
}

impl fmt::Display for LearningStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LearningStyle::Visual => "visual",
            LearningStyle::Auditory => "auditory",
            LearningStyle::Kinesthetic => "kinesthetic",
        };
        f.write_str(label)
    }
}

/// Learning-style probabilities as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StyleWeights {
    pub visual: f64,
    pub auditory: f64,
    pub kinesthetic: f64,
}

impl StyleWeights {
    pub fn dominant(&self) -> LearningStyle {
        let mut best = (LearningStyle::Visual, self.visual);
        if self.auditory > best.1 {
            best = (LearningStyle::Auditory, self.auditory);
        }
        if self.kinesthetic > best.1 {
            best = (LearningStyle::Kinesthetic, self.kinesthetic);
        }
        best.0
    }

    pub fn max_weight(&self) -> f64 {
        self.visual.max(self.auditory).max(self.kinesthetic)
    }
}

impl Default for StyleWeights {
    fn default() -> Self {
        Self {
            visual: 0.33,
            auditory: 0.33,
            kinesthetic: 0.34,
        }
    }
}

/// Learning-style distribution plus the collapse flag. Once `collapsed` is
/// observed true it is monotonic for the rest of the session; the reconciler
/// enforces that.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct QuantumState {
    #[serde(default)]
    pub learning_styles: StyleWeights,
    #[serde(default)]
    pub collapsed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimal_style: Option<LearningStyle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// Backend-owned aggregates, treated as opaque pass-through data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsSnapshot {
    #[serde(default)]
    pub total_interactions: u64,
    pub avg_success_rate: f64,
    pub avg_engagement: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Success,
    Error,
    Warning,
    Info,
}

/// A transient on-screen notification; auto-dismissed by the effect
/// scheduler after its display duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEntry {
    pub id: u64,
    pub message: String,
    pub severity: Severity,
    pub created_at: DateTime<Utc>,
}

/// One line of the bounded adaptation history feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptationEntry {
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    PointerActivate,
    WindowFocus,
    WindowBlur,
}
