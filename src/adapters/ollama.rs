//! Ollama adapter: streaming narrative generation over HTTP.
//!
//! Endpoints used:
//! - GET /api/tags - readiness probe
//! - POST /api/generate - streaming generation (newline-delimited JSON)
//!
//! The overall deadline is enforced by the engine; this adapter only bounds
//! connection setup and the readiness probe.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::NarrativeConfig;
use crate::ports::{FragmentStream, GeneratorError, NarrativeContext, NarrativeGenerator};

const HEALTH_CHECK_TIMEOUT_MS: u64 = 2000;
const CONNECT_TIMEOUT_MS: u64 = 3000;

/// Fragments buffered between the HTTP reader task and the consumer.
const FRAGMENT_BUFFER: usize = 64;

#[derive(Debug, Clone, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Clone, Serialize)]
struct GenerateOptions {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<i32>,
}

/// One line of the streaming `/api/generate` response.
#[derive(Debug, Clone, Default, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

/// What one decoded line means for the fragment stream.
#[derive(Debug, PartialEq)]
enum LineEvent {
    Fragment(String),
    Done(Option<String>),
    Failed(GeneratorError),
    Skip,
}

fn decode_line(line: &[u8]) -> LineEvent {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return LineEvent::Skip;
    }

    match serde_json::from_str::<GenerateChunk>(text) {
        Ok(GenerateChunk {
            error: Some(err), ..
        }) => LineEvent::Failed(GeneratorError::Transport(err)),
        Ok(chunk) if chunk.done => {
            LineEvent::Done(Some(chunk.response).filter(|r| !r.is_empty()))
        }
        Ok(chunk) if chunk.response.is_empty() => LineEvent::Skip,
        Ok(chunk) => LineEvent::Fragment(chunk.response),
        Err(e) => LineEvent::Failed(GeneratorError::Malformed(e.to_string())),
    }
}

/// Splits a byte stream into complete lines; partial UTF-8 sequences stay
/// buffered until their line is complete.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            lines.push(line);
        }
        lines
    }

    fn finish(self) -> Option<Vec<u8>> {
        Some(self.pending).filter(|p| !p.is_empty())
    }
}

fn map_reqwest_error(e: &reqwest::Error) -> GeneratorError {
    if e.is_timeout() {
        GeneratorError::Timeout
    } else if e.is_connect() {
        GeneratorError::Unavailable(e.to_string())
    } else {
        GeneratorError::Transport(e.to_string())
    }
}

/// Narrative generator backed by a local Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaNarrator {
    client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f32,
    num_predict: Option<i32>,
}

impl OllamaNarrator {
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(config: &NarrativeConfig) -> Result<Self, GeneratorError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(CONNECT_TIMEOUT_MS))
            .build()
            .map_err(|e| GeneratorError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            num_predict: config.max_tokens,
        })
    }

    async fn forward(
        response: reqwest::Response,
        tx: mpsc::Sender<Result<String, GeneratorError>>,
    ) {
        let mut body = response.bytes_stream();
        let mut lines = LineBuffer::default();

        loop {
            let chunk = tokio::select! {
                // Consumer dropped the stream; release the connection.
                () = tx.closed() => return,
                chunk = body.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            let bytes = match chunk {
                Ok(b) => b,
                Err(e) => {
                    let _ = tx.send(Err(map_reqwest_error(&e))).await;
                    return;
                }
            };

            for line in lines.push(&bytes) {
                match decode_line(&line) {
                    LineEvent::Fragment(text) => {
                        if tx.send(Ok(text)).await.is_err() {
                            return;
                        }
                    }
                    LineEvent::Done(last) => {
                        if let Some(text) = last {
                            let _ = tx.send(Ok(text)).await;
                        }
                        return;
                    }
                    LineEvent::Failed(err) => {
                        let _ = tx.send(Err(err)).await;
                        return;
                    }
                    LineEvent::Skip => {}
                }
            }
        }

        // Body ended; only an unterminated `done` line completes cleanly.
        let truncated = || GeneratorError::Transport("stream ended before completion".into());
        match lines.finish().map(|l| decode_line(&l)) {
            Some(LineEvent::Done(Some(text))) => {
                let _ = tx.send(Ok(text)).await;
            }
            Some(LineEvent::Done(None)) => {}
            Some(LineEvent::Fragment(text)) => {
                if tx.send(Ok(text)).await.is_ok() {
                    let _ = tx.send(Err(truncated())).await;
                }
            }
            Some(LineEvent::Failed(err)) => {
                let _ = tx.send(Err(err)).await;
            }
            Some(LineEvent::Skip) | None => {
                let _ = tx.send(Err(truncated())).await;
            }
        }
    }
}

#[async_trait]
impl NarrativeGenerator for OllamaNarrator {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn is_healthy(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self
            .client
            .get(&url)
            .timeout(Duration::from_millis(HEALTH_CHECK_TIMEOUT_MS))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::debug!("Ollama health check failed: {e}");
                false
            }
        }
    }

    async fn generate(&self, context: &NarrativeContext) -> Result<FragmentStream, GeneratorError> {
        let request = GenerateRequest {
            model: &self.model,
            prompt: &context.prompt,
            stream: true,
            options: GenerateOptions {
                temperature: self.temperature,
                num_predict: self.num_predict,
            },
        };

        let url = format!("{}/api/generate", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| map_reqwest_error(&e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            if status.as_u16() == 404 {
                return Err(GeneratorError::Unavailable(format!(
                    "model {} not found",
                    self.model
                )));
            }
            return Err(GeneratorError::Transport(format!("Status {status}: {body}")));
        }

        tracing::debug!("Ollama generation started with model {}", self.model);

        let (tx, rx) = mpsc::channel(FRAGMENT_BUFFER);
        tokio::spawn(Self::forward(resp, tx));

        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_fragment_and_done() {
        assert_eq!(
            decode_line(br#"{"model":"m","response":"Hel","done":false}"#),
            LineEvent::Fragment("Hel".into())
        );
        assert_eq!(
            decode_line(br#"{"model":"m","response":"","done":true,"eval_count":12}"#),
            LineEvent::Done(None)
        );
        assert_eq!(
            decode_line(br#"{"response":"!","done":true}"#),
            LineEvent::Done(Some("!".into()))
        );
        assert_eq!(decode_line(b"   "), LineEvent::Skip);
    }

    #[test]
    fn test_decode_error_and_garbage() {
        assert_eq!(
            decode_line(br#"{"error":"model 'x' not found"}"#),
            LineEvent::Failed(GeneratorError::Transport("model 'x' not found".into()))
        );
        assert!(matches!(
            decode_line(b"{not json"),
            LineEvent::Failed(GeneratorError::Malformed(_))
        ));
    }

    #[test]
    fn test_line_buffer_handles_split_utf8() {
        let mut buf = LineBuffer::default();
        let line = "{\"response\":\"caf\u{e9}\"}\n".as_bytes();
        let split = line.len() - 4;

        assert!(buf.push(&line[..split]).is_empty());
        let lines = buf.push(&line[split..]);
        assert_eq!(lines.len(), 1);
        assert_eq!(decode_line(&lines[0]), LineEvent::Fragment("caf\u{e9}".into()));
        assert!(buf.finish().is_none());
    }

    #[test]
    fn test_line_buffer_keeps_partial_tail() {
        let mut buf = LineBuffer::default();
        let lines = buf.push(b"{\"response\":\"a\"}\n{\"respon");
        assert_eq!(lines.len(), 1);
        assert_eq!(buf.finish(), Some(b"{\"respon".to_vec()));
    }

    async fn forwarded(body: &'static str) -> Vec<Result<String, GeneratorError>> {
        let resp = reqwest::Response::from(http::Response::new(body));
        let (tx, mut rx) = mpsc::channel(16);
        OllamaNarrator::forward(resp, tx).await;

        let mut items = Vec::new();
        while let Some(item) = rx.recv().await {
            items.push(item);
        }
        items
    }

    #[tokio::test]
    async fn test_forward_completes_on_done_line() {
        let items = forwarded(
            "{\"response\":\"Hel\",\"done\":false}\n{\"response\":\"lo\",\"done\":false}\n{\"response\":\"\",\"done\":true}\n",
        )
        .await;
        assert_eq!(items, vec![Ok("Hel".to_string()), Ok("lo".to_string())]);
    }

    #[tokio::test]
    async fn test_forward_accepts_unterminated_done_line() {
        let items = forwarded(
            "{\"response\":\"Hel\",\"done\":false}\n{\"response\":\"lo\",\"done\":true}",
        )
        .await;
        assert_eq!(items, vec![Ok("Hel".to_string()), Ok("lo".to_string())]);
    }

    #[tokio::test]
    async fn test_forward_flags_body_cut_before_done() {
        let items = forwarded(
            "{\"response\":\"{\\\"summary\\\":\\\"ok\\\",\",\"done\":false}\n{\"response\":\"\\\"recommendations\\\":[]}\",\"done\":false}",
        )
        .await;

        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok());
        assert_eq!(items[1], Ok("\"recommendations\":[]}".to_string()));
        assert!(matches!(items[2], Err(GeneratorError::Transport(_))));
    }

    #[tokio::test]
    async fn test_forward_flags_empty_body() {
        let items = forwarded("").await;
        assert!(matches!(
            items.as_slice(),
            [Err(GeneratorError::Transport(_))]
        ));
    }

    #[test]
    fn test_narrator_from_config() {
        let config = NarrativeConfig {
            endpoint: "http://127.0.0.1:11434/".into(),
            model: "llama3.2".into(),
            temperature: 0.7,
            max_tokens: None,
        };
        let narrator = OllamaNarrator::new(&config).expect("Should build client");
        assert_eq!(narrator.base_url, "http://127.0.0.1:11434");
        assert_eq!(narrator.name(), "ollama");
    }
}
