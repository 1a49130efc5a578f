//! Request/response and push-channel plumbing to the adaptive-learning
//! backend.

use std::sync::Arc;

use futures::{stream::SplitSink, SinkExt, StreamExt};
use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};
use shared::{
    domain::StudentId,
    error::{BackendErrorBody, CoreError},
    protocol::{ClientPush, ServerPush},
};
use tokio::{
    net::TcpStream,
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{info, warn};

type PushSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Connection-lifecycle signals observable by all dependents.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    ChannelError(String),
}

/// Owns the request/response channel and the push channel. Requests never
/// panic past this boundary; every failure maps into [`CoreError`].
pub struct TransportAdapter {
    http: Client,
    server_url: String,
    sink: Mutex<Option<PushSink>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    lifecycle: broadcast::Sender<TransportEvent>,
    inbound: broadcast::Sender<ServerPush>,
}

impl TransportAdapter {
    pub fn new(server_url: impl Into<String>) -> Arc<Self> {
        let (lifecycle, _) = broadcast::channel(64);
        let (inbound, _) = broadcast::channel(256);
        Arc::new(Self {
            http: Client::new(),
            server_url: server_url.into().trim_end_matches('/').to_string(),
            sink: Mutex::new(None),
            reader_task: Mutex::new(None),
            lifecycle,
            inbound,
        })
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<TransportEvent> {
        self.lifecycle.subscribe()
    }

    pub fn subscribe_push(&self) -> broadcast::Receiver<ServerPush> {
        self.inbound.subscribe()
    }

    /// Establishes the push channel and spawns the reader task that decodes
    /// inbound frames into the push broadcast.
    pub async fn connect(self: &Arc<Self>, student_id: &StudentId) -> Result<(), CoreError> {
        let ws_url = push_channel_url(&self.server_url, student_id)?;
        let (stream, _) = connect_async(&ws_url).await.map_err(|err| {
            CoreError::Channel(format!("failed to connect push channel {ws_url}: {err}"))
        })?;
        let (sink, mut reader) = stream.split();
        *self.sink.lock().await = Some(sink);
        let _ = self.lifecycle.send(TransportEvent::Connected);
        info!(%student_id, "push channel connected");

        let adapter = Arc::clone(self);
        let task = tokio::spawn(async move {
            while let Some(frame) = reader.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerPush>(&text) {
                        Ok(event) => {
                            let _ = adapter.inbound.send(event);
                        }
                        Err(err) => {
                            warn!("undecodable push frame: {err}");
                            let _ = adapter.lifecycle.send(TransportEvent::ChannelError(
                                format!("invalid push frame: {err}"),
                            ));
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        let _ = adapter.lifecycle.send(TransportEvent::ChannelError(format!(
                            "push channel receive failed: {err}"
                        )));
                        break;
                    }
                }
            }
            adapter.sink.lock().await.take();
            let _ = adapter.lifecycle.send(TransportEvent::Disconnected);
        });
        *self.reader_task.lock().await = Some(task);
        Ok(())
    }

    /// One request/response exchange with a JSON body.
    pub async fn request<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, CoreError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let response = self
            .http
            .post(format!("{}{path}", self.server_url))
            .json(body)
            .send()
            .await
            .map_err(request_failure)?;
        decode_response(response).await
    }

    pub async fn get<Resp: DeserializeOwned>(&self, path: &str) -> Result<Resp, CoreError> {
        let response = self
            .http
            .get(format!("{}{path}", self.server_url))
            .send()
            .await
            .map_err(request_failure)?;
        decode_response(response).await
    }

    /// One request/response exchange with a single-part binary attachment,
    /// used to submit sensing frames for inference.
    pub async fn request_multipart<Resp: DeserializeOwned>(
        &self,
        path: &str,
        field: &str,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<Resp, CoreError> {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new().part(field.to_string(), part);
        let response = self
            .http
            .post(format!("{}{path}", self.server_url))
            .multipart(form)
            .send()
            .await
            .map_err(request_failure)?;
        decode_response(response).await
    }

    /// Fire-and-forget push. If the channel is not connected the event is
    /// dropped and the caller gets a `Channel` error; there is no queueing.
    pub async fn push_event(&self, event: &ClientPush) -> Result<(), CoreError> {
        let payload =
            serde_json::to_string(event).map_err(|err| CoreError::Payload(err.to_string()))?;
        let mut guard = self.sink.lock().await;
        let Some(sink) = guard.as_mut() else {
            return Err(CoreError::Channel(
                "push channel not connected; event dropped".to_string(),
            ));
        };
        if let Err(err) = sink.send(Message::Text(payload)).await {
            guard.take();
            drop(guard);
            let message = format!("push channel send failed: {err}");
            let _ = self
                .lifecycle
                .send(TransportEvent::ChannelError(message.clone()));
            return Err(CoreError::Channel(message));
        }
        Ok(())
    }

    /// Idempotent; safe to call when the channel was never connected.
    pub async fn disconnect(&self) {
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.send(Message::Close(None)).await;
        }
        if let Some(task) = self.reader_task.lock().await.take() {
            task.abort();
        }
    }
}

fn request_failure(err: reqwest::Error) -> CoreError {
    CoreError::Transport {
        status: err.status().map(|status| status.as_u16()),
        message: err.to_string(),
    }
}

async fn decode_response<Resp: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<Resp, CoreError> {
    let status = response.status();
    if !status.is_success() {
        let message = match response.json::<BackendErrorBody>().await {
            Ok(body) => body.error,
            Err(_) => status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string(),
        };
        return Err(CoreError::transport_status(status.as_u16(), message));
    }
    response
        .json::<Resp>()
        .await
        .map_err(|err| CoreError::Payload(err.to_string()))
}

fn push_channel_url(server_url: &str, student_id: &StudentId) -> Result<String, CoreError> {
    let ws_base = if let Some(rest) = server_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = server_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        return Err(CoreError::Channel(
            "server url must start with http:// or https://".to_string(),
        ));
    };
    Ok(format!("{ws_base}/push?student_id={student_id}"))
}
