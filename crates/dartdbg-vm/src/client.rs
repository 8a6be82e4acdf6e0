//! VM service client over a WebSocket.
//!
//! A writer task owns the write half and a reader task owns the read half.
//! Requests are correlated through a shared [`Dispatcher`]; `streamNotify`
//! events are forwarded on an unbounded channel that closes when the
//! connection does.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use url::Url;

use crate::dispatcher::Dispatcher;
use crate::error::VmError;
use crate::service::VmService;
use crate::transport::{parse_message, serialize_request, RpcMessage};
use crate::types::{StreamEvent, VmEvent};

/// Normalize a VM service URI to the WebSocket endpoint.
///
/// `http://127.0.0.1:8181/abc=/` becomes `ws://127.0.0.1:8181/abc=/ws`.
pub fn websocket_uri(uri: &str) -> Result<Url, VmError> {
    let mut url = Url::parse(uri.trim())
        .map_err(|e| VmError::InvalidUri(format!("{uri}: {e}")))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        other => {
            return Err(VmError::InvalidUri(format!(
                "unsupported VM service scheme: {other}"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| VmError::InvalidUri(format!("cannot use scheme {scheme} for {uri}")))?;
    if !url.path().ends_with("/ws") {
        let mut path = url.path().to_string();
        if !path.ends_with('/') {
            path.push('/');
        }
        path.push_str("ws");
        url.set_path(&path);
    }
    Ok(url)
}

enum Outgoing {
    Text(String),
    Close,
}

/// A live connection to a Dart VM.
pub struct VmServiceClient {
    outgoing: mpsc::UnboundedSender<Outgoing>,
    dispatcher: Arc<Mutex<Dispatcher>>,
    closed: Arc<AtomicBool>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for VmServiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmServiceClient")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl VmServiceClient {
    /// Connect to the VM service at `uri` (http or ws form).
    pub async fn connect(
        uri: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<StreamEvent>), VmError> {
        let url = websocket_uri(uri)?;
        tracing::info!("connecting to VM service at {url}");
        let (socket, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;
        Ok(Self::start(socket))
    }

    /// Run the WebSocket upgrade for `url` over an existing byte stream and
    /// start the I/O tasks.
    pub async fn connect_stream<S>(
        stream: S,
        url: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<StreamEvent>), VmError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (socket, _response) = tokio_tungstenite::client_async(url, stream).await?;
        Ok(Self::start(socket))
    }

    fn start<S>(socket: WebSocketStream<S>) -> (Self, mpsc::UnboundedReceiver<StreamEvent>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut sink, mut stream) = socket.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outgoing>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<StreamEvent>();
        let dispatcher = Arc::new(Mutex::new(Dispatcher::new()));
        let closed = Arc::new(AtomicBool::new(false));

        // Writer task
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                match msg {
                    Outgoing::Text(text) => {
                        if let Err(e) = sink.send(Message::Text(text)).await {
                            tracing::debug!("VM service write failed: {e}");
                            break;
                        }
                    }
                    Outgoing::Close => {
                        let _ = sink.close().await;
                        break;
                    }
                }
            }
        });

        // Reader task. Pings are answered by the socket itself.
        let reader_dispatcher = dispatcher.clone();
        let reader_closed = closed.clone();
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::warn!("VM service read failed: {e}");
                        break;
                    }
                };
                match parse_message(&text) {
                    Ok(RpcMessage::Response { id, result, error }) => {
                        reader_dispatcher.lock().await.resolve(&id, result, error);
                    }
                    Ok(RpcMessage::Notification { method, params }) => {
                        if method != "streamNotify" {
                            tracing::trace!("ignoring VM notification {method}");
                            continue;
                        }
                        if let Some(event) = decode_stream_event(params) {
                            if event_tx.send(event).is_err() {
                                tracing::trace!("stream event receiver dropped");
                            }
                        }
                    }
                    Err(e) => tracing::warn!("malformed VM service message: {e}"),
                }
            }
            tracing::info!("VM service connection closed");
            let mut dispatcher = reader_dispatcher.lock().await;
            reader_closed.store(true, Ordering::SeqCst);
            dispatcher.fail_all();
        });

        (
            Self {
                outgoing: out_tx,
                dispatcher,
                closed,
                next_id: AtomicU64::new(1),
            },
            event_rx,
        )
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Send a close frame. Pending requests fail once the peer hangs up.
    pub fn close(&self) {
        let _ = self.outgoing.send(Outgoing::Close);
    }
}

fn decode_stream_event(params: Value) -> Option<StreamEvent> {
    let stream_id = params.get("streamId")?.as_str()?.to_string();
    let event = params.get("event")?.clone();
    match serde_json::from_value::<VmEvent>(event) {
        Ok(event) => Some(StreamEvent { stream_id, event }),
        Err(e) => {
            tracing::warn!("undecodable {stream_id} event: {e}");
            None
        }
    }
}

#[async_trait]
impl VmService for VmServiceClient {
    async fn call(&self, method: &str, params: Value) -> Result<Value, VmError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let rx = {
            let mut dispatcher = self.dispatcher.lock().await;
            if self.is_closed() {
                return Err(VmError::ConnectionClosed);
            }
            dispatcher.register(id.clone())
        };
        tracing::trace!(id = %id, "VM request {method}");
        self.outgoing
            .send(Outgoing::Text(serialize_request(&id, method, &params)))
            .map_err(|_| VmError::ConnectionClosed)?;
        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(err.into()),
            Err(_) => Err(VmError::ConnectionClosed),
        }
    }

    fn close(&self) {
        VmServiceClient::close(self);
    }
}
