//! The stdio server loop: framed DAP requests in, responses and events out.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::sync::mpsc;

use crate::adapter::{AdapterSettings, DebugAdapter, VmConnector};
use crate::error::DapError;
use crate::protocol::Request;
use crate::transport::{read_message, write_message};

/// How long queued output may take to drain after the session ends.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Serve one debug session until the editor disconnects or closes the
/// stream.
pub async fn serve<R, W>(
    reader: R,
    writer: W,
    settings: AdapterSettings,
    connector: Arc<dyn VmConnector>,
) -> Result<(), DapError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let writer_task = tokio::spawn(write_loop(writer, rx));
    let adapter = DebugAdapter::new(settings, tx, connector);
    let mut reader = BufReader::new(reader);

    let result = loop {
        let message = match read_message(&mut reader).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                tracing::info!("editor closed the DAP stream");
                break Ok(());
            }
            Err(DapError::Transport(message)) => {
                tracing::warn!("dropping malformed DAP message: {message}");
                continue;
            }
            Err(e) => break Err(e),
        };
        let request: Request = match serde_json::from_value(message) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("ignoring non-request DAP message: {e}");
                continue;
            }
        };
        adapter.dispatch(request).await;
        if adapter.is_disconnected() {
            break Ok(());
        }
    };

    adapter.shutdown().await;
    drop(adapter);
    if tokio::time::timeout(DRAIN_TIMEOUT, writer_task).await.is_err() {
        tracing::debug!("DAP output did not drain in time");
    }
    result
}

/// Number outgoing messages and write them in order.
async fn write_loop<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<Value>)
where
    W: AsyncWrite + Unpin,
{
    let mut seq: i64 = 1;
    while let Some(mut message) = rx.recv().await {
        if let Some(object) = message.as_object_mut() {
            object.insert("seq".into(), Value::from(seq));
        }
        seq += 1;
        if let Err(e) = write_message(&mut writer, &message).await {
            tracing::warn!("DAP write failed: {e}");
            break;
        }
    }
}
