//! Newline-delimited JSON envelopes exchanged with runtime children.
//!
//! Every message crossing a child process boundary is one [`Envelope`] per
//! line. Lines that do not parse as an envelope are treated as the child's
//! own output and logged instead of failing the exchange, so children are
//! free to print to stdout.

use kiln_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Message discriminator carried in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnvelopeKind {
    /// Parent asks the child to execute a module.
    Execute,
    /// Child reports the normalized outcome of an execution.
    Result,
    /// Child reports that it could not run the execution at all.
    Error,
    /// Parent asks the child to shut down.
    Close,
}

/// One protocol message. `id` correlates a response with its request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    /// Builds an `execute` request envelope.
    pub fn execute(id: u64, payload: &ExecutePayload) -> Result<Self> {
        Ok(Self {
            id,
            kind: EnvelopeKind::Execute,
            payload: serde_json::to_value(payload)
                .map_err(|e| Error::protocol(format!("failed to serialize execute payload: {e}")))?,
        })
    }

    /// Builds a `close` request envelope.
    pub fn close(id: u64) -> Self {
        Self {
            id,
            kind: EnvelopeKind::Close,
            payload: Value::Null,
        }
    }
}

/// Payload of an `execute` request: where the compiled module lives and what
/// the child should collect while running it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutePayload {
    pub url: String,
    pub collect_coverage: bool,
}

/// Writes one envelope as a single line.
pub async fn write_envelope<W>(writer: &mut W, envelope: &Envelope) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let json = serde_json::to_string(envelope)
        .map_err(|e| Error::protocol(format!("failed to serialize envelope: {e}")))?;
    writer
        .write_all(format!("{json}\n").as_bytes())
        .await
        .map_err(|e| Error::protocol(format!("failed to send envelope: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| Error::protocol(format!("failed to flush envelope: {e}")))?;
    Ok(())
}

/// Reads the next envelope, skipping over lines the child printed for
/// itself. `None` means the stream reached end of file.
pub async fn read_envelope<R>(reader: &mut R) -> Result<Option<Envelope>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        let read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| Error::protocol(format!("failed to read envelope: {e}")))?;
        if read == 0 {
            return Ok(None);
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<Envelope>(trimmed) {
            Ok(envelope) => return Ok(Some(envelope)),
            Err(_) => debug!(line = %trimmed, "ignoring non-envelope child output"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn envelope_survives_a_write_read_cycle() {
        let payload = ExecutePayload {
            url: "http://127.0.0.1:3678/.kiln/out/best/src/app.js".to_string(),
            collect_coverage: true,
        };
        let envelope = Envelope::execute(7, &payload).unwrap();

        let mut buffer = Cursor::new(Vec::new());
        write_envelope(&mut buffer, &envelope).await.unwrap();
        let bytes = buffer.into_inner();
        assert!(bytes.ends_with(b"\n"));

        let mut reader = BufReader::new(bytes.as_slice());
        let decoded = read_envelope(&mut reader).await.unwrap().unwrap();
        assert_eq!(decoded, envelope);
        assert_eq!(decoded.payload["collectCoverage"], json!(true));
    }

    #[tokio::test]
    async fn type_field_uses_the_wire_names() {
        let close = Envelope::close(2);
        let json = serde_json::to_string(&close).unwrap();
        assert!(json.contains("\"type\":\"close\""));

        let parsed: Envelope =
            serde_json::from_str(r#"{"id":1,"type":"result","payload":{"status":"resolved"}}"#)
                .unwrap();
        assert_eq!(parsed.kind, EnvelopeKind::Result);
    }

    #[tokio::test]
    async fn reader_skips_child_noise_and_blank_lines() {
        let stream = b"starting up\n\n{\"id\":3,\"type\":\"result\",\"payload\":null}\n";
        let mut reader = BufReader::new(stream.as_slice());
        let envelope = read_envelope(&mut reader).await.unwrap().unwrap();
        assert_eq!(envelope.id, 3);
        assert_eq!(envelope.kind, EnvelopeKind::Result);
    }

    #[tokio::test]
    async fn end_of_stream_reads_as_none() {
        let mut reader = BufReader::new(b"leftover noise without newline".as_slice());
        assert!(read_envelope(&mut reader).await.unwrap().is_none());

        let mut empty = BufReader::new(b"".as_slice());
        assert!(read_envelope(&mut empty).await.unwrap().is_none());
    }
}
