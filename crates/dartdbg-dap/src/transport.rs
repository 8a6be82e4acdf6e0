//! DAP transport: Content-Length framing over async byte streams.

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::DapError;

/// Upper bound on a single message body.
const MAX_BODY_LEN: usize = 64 * 1024 * 1024;

/// Encode a JSON value with its Content-Length header.
pub fn encode_message(value: &Value) -> Vec<u8> {
    let body = value.to_string();
    let mut buf = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
    buf.extend_from_slice(body.as_bytes());
    buf
}

/// Read one framed message. `Ok(None)` means the editor closed the stream
/// between messages.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<Value>, DapError>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut saw_header = false;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            if saw_header {
                return Err(DapError::Transport("stream ended inside a header".into()));
            }
            return Ok(None);
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if saw_header {
                break;
            }
            continue;
        }
        saw_header = true;
        if let Some((name, value)) = trimmed.split_once(':') {
            if name.trim().eq_ignore_ascii_case("Content-Length") {
                let value = value.trim();
                content_length = Some(value.parse().map_err(|e| {
                    DapError::Transport(format!("invalid Content-Length value '{value}': {e}"))
                })?);
            }
        }
    }

    let length =
        content_length.ok_or_else(|| DapError::Transport("missing Content-Length header".into()))?;
    if length > MAX_BODY_LEN {
        return Err(DapError::Transport(format!("message of {length} bytes is too large")));
    }
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;
    serde_json::from_slice(&body)
        .map(Some)
        .map_err(|e| DapError::Transport(format!("JSON parse error: {e}")))
}

/// Write one framed message and flush.
pub async fn write_message<W>(writer: &mut W, value: &Value) -> Result<(), DapError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode_message(value)).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::BufReader;

    #[test]
    fn encode_has_exact_length() {
        let encoded = encode_message(&json!({"seq": 1, "type": "event", "event": "initialized"}));
        let text = String::from_utf8(encoded).unwrap();
        let (header, body) = text.split_once("\r\n\r\n").unwrap();
        assert_eq!(header, format!("Content-Length: {}", body.len()));
    }

    #[tokio::test]
    async fn reads_consecutive_messages() {
        let first = json!({"seq": 1, "type": "request", "command": "initialize"});
        let second = json!({"seq": 2, "type": "request", "command": "launch"});
        let mut bytes = encode_message(&first);
        bytes.extend(encode_message(&second));

        let mut reader = BufReader::new(bytes.as_slice());
        assert_eq!(read_message(&mut reader).await.unwrap(), Some(first));
        assert_eq!(read_message(&mut reader).await.unwrap(), Some(second));
        assert_eq!(read_message(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn non_ascii_body_uses_byte_length() {
        let value = json!({"output": "héllo → wörld"});
        let bytes = encode_message(&value);
        let mut reader = BufReader::new(bytes.as_slice());
        assert_eq!(read_message(&mut reader).await.unwrap(), Some(value));
    }

    #[tokio::test]
    async fn missing_content_length_is_an_error() {
        let mut reader = BufReader::new(&b"Bad-Header: 42\r\n\r\n{}"[..]);
        let err = read_message(&mut reader).await.unwrap_err();
        assert!(err.to_string().contains("missing Content-Length"), "got: {err}");
    }

    #[tokio::test]
    async fn truncated_body_is_an_io_error() {
        let mut reader = BufReader::new(&b"Content-Length: 100\r\n\r\n{\"short\":true}"[..]);
        assert!(matches!(
            read_message(&mut reader).await,
            Err(DapError::Io(_))
        ));
    }

    #[tokio::test]
    async fn write_then_read() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = client;
        write_message(&mut writer, &json!({"seq": 5})).await.unwrap();
        drop(writer);
        let mut reader = BufReader::new(server);
        assert_eq!(
            read_message(&mut reader).await.unwrap(),
            Some(json!({"seq": 5}))
        );
    }
}
