use super::*;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        Multipart, Path, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use shared::{
    domain::{
        EmotionSource, EmotionVector, InteractionKind, LearningState, LearningStyle,
        QuantumState, Severity, StyleWeights,
    },
    error::CoreError,
    protocol::{
        AdaptationsResponse, AnalyticsResponse, ClientPush, DetectEmotionResponse,
        QuantumUpdateResponse, ServerPush,
    },
};
use tokio::{net::TcpListener, sync::mpsc, time::Duration};

#[derive(Clone)]
struct BackendState {
    detect_calls: Arc<AtomicUsize>,
    detect_emotions: EmotionVector,
    adaptations: Vec<String>,
    quantum_collapsed: bool,
    outbound: Vec<ServerPush>,
    client_frames: mpsc::UnboundedSender<ClientPush>,
}

struct BackendConfig {
    detect_emotions: EmotionVector,
    adaptations: Vec<String>,
    quantum_collapsed: bool,
    outbound: Vec<ServerPush>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            detect_emotions: EmotionVector::neutral(),
            adaptations: Vec::new(),
            quantum_collapsed: false,
            outbound: Vec::new(),
        }
    }
}

struct TestBackend {
    url: String,
    detect_calls: Arc<AtomicUsize>,
    client_frames: mpsc::UnboundedReceiver<ClientPush>,
}

fn collapsed_quantum_state() -> QuantumState {
    QuantumState {
        learning_styles: StyleWeights {
            visual: 0.7,
            auditory: 0.2,
            kinesthetic: 0.1,
        },
        collapsed: true,
        optimal_style: Some(LearningStyle::Visual),
        confidence: Some(0.7),
    }
}

async fn handle_detect(
    State(state): State<BackendState>,
    mut multipart: Multipart,
) -> Json<DetectEmotionResponse> {
    while let Some(field) = multipart.next_field().await.expect("multipart field") {
        let _ = field.bytes().await.expect("field bytes");
    }
    state.detect_calls.fetch_add(1, Ordering::Relaxed);
    Json(DetectEmotionResponse {
        success: true,
        emotions: state.detect_emotions,
        face_detected: true,
    })
}

async fn handle_adaptations(State(state): State<BackendState>) -> Json<AdaptationsResponse> {
    Json(AdaptationsResponse {
        success: true,
        adaptations: state.adaptations.clone(),
    })
}

async fn handle_quantum_update(
    State(state): State<BackendState>,
) -> Json<QuantumUpdateResponse> {
    let quantum_state = if state.quantum_collapsed {
        collapsed_quantum_state()
    } else {
        QuantumState::default()
    };
    Json(QuantumUpdateResponse {
        success: true,
        quantum_state,
    })
}

async fn handle_analytics(
    Path(_student_id): Path<String>,
) -> Json<AnalyticsResponse> {
    Json(AnalyticsResponse {
        success: true,
        analytics: shared::domain::AnalyticsSnapshot {
            total_interactions: 5,
            avg_success_rate: 0.8,
            avg_engagement: 0.7,
        },
    })
}

async fn handle_push(
    ws: WebSocketUpgrade,
    State(state): State<BackendState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| push_session(socket, state))
}

async fn push_session(mut socket: WebSocket, state: BackendState) {
    for event in &state.outbound {
        let frame = serde_json::to_string(event).expect("serialize push frame");
        if socket.send(WsMessage::Text(frame)).await.is_err() {
            return;
        }
    }
    while let Some(Ok(message)) = socket.recv().await {
        if let WsMessage::Text(text) = message {
            if let Ok(event) = serde_json::from_str::<ClientPush>(&text) {
                let _ = state.client_frames.send(event);
            }
        }
    }
}

async fn spawn_backend(config: BackendConfig) -> TestBackend {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let (frames_tx, frames_rx) = mpsc::unbounded_channel();
    let detect_calls = Arc::new(AtomicUsize::new(0));
    let state = BackendState {
        detect_calls: Arc::clone(&detect_calls),
        detect_emotions: config.detect_emotions,
        adaptations: config.adaptations,
        quantum_collapsed: config.quantum_collapsed,
        outbound: config.outbound,
        client_frames: frames_tx,
    };
    let app = Router::new()
        .route("/detect-emotion", post(handle_detect))
        .route("/get-adaptations", post(handle_adaptations))
        .route("/quantum-update", post(handle_quantum_update))
        .route("/student-analytics/:student_id", get(handle_analytics))
        .route("/push", get(handle_push))
        .with_state(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    TestBackend {
        url: format!("http://{addr}"),
        detect_calls,
        client_frames: frames_rx,
    }
}

fn quick_session_config(server_url: &str) -> SessionConfig {
    SessionConfig {
        server_url: server_url.to_string(),
        capture: CaptureConfig {
            live_period: Duration::from_millis(20),
            synthetic_period: Duration::from_millis(25),
        },
        effects: EffectConfig {
            notification_ttl: Duration::from_millis(50),
            adaptation_reveal_delay: Duration::from_millis(5),
            collapse_alert_ttl: Duration::from_millis(50),
            pulse_duration: Duration::from_millis(20),
            adaptation_history_cap: 8,
        },
        analytics_poll_period: Duration::from_millis(40),
    }
}

struct StaticFrameSource {
    released: Arc<AtomicBool>,
}

#[async_trait]
impl FrameSource for StaticFrameSource {
    async fn open(&self) -> Result<(), CoreError> {
        Ok(())
    }

    async fn next_frame(&self) -> Result<Vec<u8>, CoreError> {
        Ok(b"frame-bytes".to_vec())
    }

    async fn release(&self) {
        self.released.store(true, Ordering::Relaxed);
    }
}

#[tokio::test]
async fn request_maps_backend_error_status_to_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let app = Router::new().route(
        "/get-adaptations",
        post(|| async {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "boom" })),
            )
        }),
    );
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let transport = TransportAdapter::new(format!("http://{addr}"));
    let err = transport
        .request::<_, AdaptationsResponse>("/get-adaptations", &serde_json::json!({}))
        .await
        .expect_err("must fail");
    match err {
        CoreError::Transport { status, message } => {
            assert_eq!(status, Some(500));
            assert_eq!(message, "boom");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn push_event_without_connection_is_dropped_with_channel_error() {
    let transport = TransportAdapter::new("http://127.0.0.1:1");
    let err = transport
        .push_event(&ClientPush::QuantumCollapse {
            student_id: shared::domain::StudentId::generate(),
        })
        .await
        .expect_err("must fail");
    assert!(matches!(err, CoreError::Channel(_)));
}

#[tokio::test]
async fn shutdown_before_startup_is_safe_and_repeatable() {
    // Nothing is listening on this address; no resource ever gets acquired.
    let session = LearningSession::new(
        quick_session_config("http://127.0.0.1:1"),
        Arc::new(UnavailableFrameSource),
    );

    session.shutdown().await;
    session.shutdown().await;
    assert_eq!(session.capture().state().await, CaptureState::Stopped);
}

#[tokio::test]
async fn sensor_failure_degrades_to_synthetic_generation() {
    let backend = spawn_backend(BackendConfig::default()).await;
    let session = LearningSession::new(
        quick_session_config(&backend.url),
        Arc::new(UnavailableFrameSource),
    );

    session.start().await;
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(session.capture().state().await, CaptureState::Degraded);
    assert_eq!(
        session.reconciler().emotion_source().await,
        EmotionSource::Simulated
    );
    assert!(
        session.reconciler().last_seq().await >= 2,
        "expected repeated synthetic updates"
    );
    // No live-capture request is ever issued in degraded mode.
    assert_eq!(backend.detect_calls.load(Ordering::Relaxed), 0);

    session.shutdown().await;
}

#[tokio::test]
async fn live_capture_applies_backend_vector_and_feeds_adaptations() {
    let optimal = EmotionVector {
        happy: 0.4,
        engaged: 0.7,
        confused: 0.1,
        frustrated: 0.05,
        bored: 0.1,
    };
    let backend = spawn_backend(BackendConfig {
        detect_emotions: optimal,
        adaptations: vec!["Increasing difficulty - ready for advanced concepts".to_string()],
        ..BackendConfig::default()
    })
    .await;

    let released = Arc::new(AtomicBool::new(false));
    let session = LearningSession::new(
        quick_session_config(&backend.url),
        Arc::new(StaticFrameSource {
            released: Arc::clone(&released),
        }),
    );

    session.start().await;
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(session.capture().state().await, CaptureState::Active);
    assert_eq!(
        session.reconciler().emotion_source().await,
        EmotionSource::Live
    );
    assert_eq!(session.reconciler().current_emotions().await, optimal);
    assert_eq!(
        session.reconciler().current_learning_state().await,
        LearningState::Optimal
    );
    assert!(backend.detect_calls.load(Ordering::Relaxed) >= 1);
    assert!(!session.effects().adaptation_feed().await.is_empty());

    session.shutdown().await;
    assert!(released.load(Ordering::Relaxed), "device not released");
    assert_eq!(session.capture().state().await, CaptureState::Stopped);
}

#[tokio::test]
async fn push_channel_routes_adaptations_and_collapse_into_state() {
    let backend = spawn_backend(BackendConfig {
        outbound: vec![
            ServerPush::Connected {
                message: "Connected to Quantum Learning Platform".to_string(),
            },
            ServerPush::AdaptationsGenerated {
                adaptations: vec!["Switching to calmer, slower voice tone".to_string()],
            },
            ServerPush::QuantumCollapsed {
                collapse_data: collapsed_quantum_state(),
            },
        ],
        ..BackendConfig::default()
    })
    .await;

    let mut config = quick_session_config(&backend.url);
    // Keep the capture loop quiet so only push-channel traffic drives state.
    config.capture.synthetic_period = Duration::from_secs(60);
    config.analytics_poll_period = Duration::from_secs(60);

    let session = LearningSession::new(config, Arc::new(UnavailableFrameSource));
    let mut render = session.effects().subscribe_render();
    session.start().await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let quantum = session.reconciler().current_quantum_state().await;
    assert!(quantum.collapsed);
    assert_eq!(quantum.optimal_style, Some(LearningStyle::Visual));

    let feed = session.effects().adaptation_feed().await;
    assert!(feed
        .iter()
        .any(|entry| entry.text.contains("calmer, slower voice")));

    let mut saw_collapse_alert = false;
    while let Ok(command) = render.try_recv() {
        if let RenderCommand::ShowCollapseAlert { style, confidence } = command {
            assert_eq!(style, LearningStyle::Visual);
            assert_eq!(confidence, 0.7);
            saw_collapse_alert = true;
        }
    }
    assert!(saw_collapse_alert, "collapse alert never rendered");

    session.shutdown().await;
}

#[tokio::test]
async fn interaction_tracker_round_trips_quantum_update() {
    let mut backend = spawn_backend(BackendConfig {
        quantum_collapsed: true,
        ..BackendConfig::default()
    })
    .await;

    let mut config = quick_session_config(&backend.url);
    config.capture.synthetic_period = Duration::from_secs(60);
    config.analytics_poll_period = Duration::from_secs(60);

    let session = LearningSession::new(config, Arc::new(UnavailableFrameSource));
    session.start().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    session
        .record_interaction(InteractionKind::PointerActivate, "demo_panel", 0.9)
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(session.reconciler().current_quantum_state().await.collapsed);

    let mut saw_interaction = false;
    while let Ok(frame) = backend.client_frames.try_recv() {
        if let ClientPush::InteractionTracked {
            student_id,
            interaction_type,
            target,
            ..
        } = frame
        {
            assert_eq!(student_id, session.student_id());
            assert_eq!(interaction_type, InteractionKind::PointerActivate);
            assert_eq!(target, "demo_panel");
            saw_interaction = true;
        }
    }
    assert!(saw_interaction, "interaction frame never reached backend");

    session.shutdown().await;
}

#[tokio::test]
async fn collapse_request_reaches_backend_over_push_channel() {
    let mut backend = spawn_backend(BackendConfig::default()).await;

    let mut config = quick_session_config(&backend.url);
    config.capture.synthetic_period = Duration::from_secs(60);
    config.analytics_poll_period = Duration::from_secs(60);

    let session = LearningSession::new(config, Arc::new(UnavailableFrameSource));
    session.start().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    session.request_collapse().await.expect("push collapse");
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut saw_collapse = false;
    while let Ok(frame) = backend.client_frames.try_recv() {
        if let ClientPush::QuantumCollapse { student_id } = frame {
            assert_eq!(student_id, session.student_id());
            saw_collapse = true;
        }
    }
    assert!(saw_collapse, "collapse frame never reached backend");

    session.shutdown().await;
}

#[tokio::test]
async fn analytics_poll_populates_reconciler() {
    let backend = spawn_backend(BackendConfig::default()).await;

    let mut config = quick_session_config(&backend.url);
    config.capture.synthetic_period = Duration::from_secs(60);

    let session = LearningSession::new(config, Arc::new(UnavailableFrameSource));
    session.start().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let analytics = session
        .reconciler()
        .current_analytics()
        .await
        .expect("analytics snapshot");
    assert_eq!(analytics.total_interactions, 5);
    assert_eq!(analytics.avg_success_rate, 0.8);
    assert_eq!(analytics.avg_engagement, 0.7);

    session.shutdown().await;
}

#[tokio::test]
async fn transport_failures_do_not_halt_the_capture_loop() {
    // Nothing is listening: every request and the push connect fail.
    let mut config = quick_session_config("http://127.0.0.1:1");
    config.capture.synthetic_period = Duration::from_millis(20);

    let session = LearningSession::new(config, Arc::new(UnavailableFrameSource));
    session.start().await;
    tokio::time::sleep(Duration::from_millis(120)).await;

    // The synthetic cycle keeps producing updates even though every request
    // and the push channel fail.
    assert!(session.reconciler().last_seq().await >= 2);
    assert_eq!(session.capture().state().await, CaptureState::Degraded);

    session.shutdown().await;
}

#[tokio::test]
async fn notification_for_degraded_sensor_carries_warning_severity() {
    let backend = spawn_backend(BackendConfig::default()).await;
    let mut config = quick_session_config(&backend.url);
    config.effects.notification_ttl = Duration::from_secs(60);
    config.capture.synthetic_period = Duration::from_secs(60);
    config.analytics_poll_period = Duration::from_secs(60);

    let session = LearningSession::new(config, Arc::new(UnavailableFrameSource));
    session.start().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let notifications = session.effects().active_notifications().await;
    assert!(notifications
        .iter()
        .any(|entry| entry.severity == Severity::Warning
            && entry.message.contains("simulated emotion sensing")));

    session.shutdown().await;
}
