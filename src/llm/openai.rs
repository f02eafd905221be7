//! OpenAI-compatible chat completions client.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{retry::Never, Error as EventSourceError, Event, EventSource};
use serde::Deserialize;
use serde_json::json;

use super::{CompletionRequest, LlmClient, LlmError, TokenStream};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Client for `POST {base}/chat/completions`, authenticated with a bearer key.
pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL, Duration::from_secs(120))
    }

    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default HTTP client for model calls");
                reqwest::Client::new()
            });

        Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn request_body(&self, request: &CompletionRequest, stream: bool) -> serde_json::Value {
        let mut body = json!({
            "model": request.model,
            "messages": request.messages,
            "stream": stream,
        });
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        body
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        tracing::debug!(model = %request.model, messages = request.messages.len(), "Chat completion");

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&self.request_body(request, false))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status(status.as_u16(), body));
        }

        let parsed: CompletionResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("no choices in completion".to_string()))
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<TokenStream, LlmError> {
        tracing::debug!(model = %request.model, messages = request.messages.len(), "Streaming chat completion");

        let builder = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&self.request_body(request, true));

        let mut source =
            EventSource::new(builder).map_err(|e| LlmError::Stream(e.to_string()))?;
        source.set_retry_policy(Box::new(Never));

        // Surface status errors (bad key, throttling) before handing out the stream.
        let mut pending = None;
        match source.next().await {
            Some(Ok(Event::Open)) => {}
            Some(Ok(Event::Message(message))) => pending = Some(message.data),
            Some(Err(EventSourceError::StreamEnded)) | None => {
                return Err(LlmError::Stream("stream closed before opening".to_string()));
            }
            Some(Err(e)) => {
                source.close();
                return Err(map_event_source_error(e).await);
            }
        }

        let stream = async_stream::stream! {
            if let Some(data) = pending {
                if is_done(&data) {
                    source.close();
                    return;
                }
                if let Some(text) = chunk_text(&data) {
                    yield Ok(text);
                }
            }

            while let Some(event) = source.next().await {
                match event {
                    Ok(Event::Open) => continue,
                    Ok(Event::Message(message)) => {
                        if is_done(&message.data) {
                            break;
                        }
                        if let Some(text) = chunk_text(&message.data) {
                            yield Ok(text);
                        }
                    }
                    Err(EventSourceError::StreamEnded) => break,
                    Err(e) => {
                        yield Err(map_event_source_error(e).await);
                        break;
                    }
                }
            }
            source.close();
        };

        Ok(Box::pin(stream))
    }
}

fn is_done(data: &str) -> bool {
    data.trim() == "[DONE]"
}

/// Text delta of one `data:` payload; `None` for empty or unparseable chunks.
fn chunk_text(data: &str) -> Option<String> {
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|text| !text.is_empty()),
        Err(e) => {
            tracing::debug!(error = %e, "Skipping unparseable stream chunk");
            None
        }
    }
}

async fn map_event_source_error(err: EventSourceError) -> LlmError {
    match err {
        EventSourceError::InvalidStatusCode(status, response) => {
            let body = response.text().await.unwrap_or_default();
            LlmError::from_status(status.as_u16(), body)
        }
        EventSourceError::InvalidContentType(_, response) => LlmError::InvalidResponse(format!(
            "expected an event stream, got HTTP {}",
            response.status()
        )),
        EventSourceError::Transport(e) => LlmError::Network(e),
        other => LlmError::Stream(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatMessage;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "gpt-test".into(),
            messages: vec![ChatMessage::user("hi")],
            temperature: Some(0.0),
        }
    }

    fn client(server: &MockServer) -> OpenAiClient {
        OpenAiClient::with_base_url("sk-test", server.uri(), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn complete_returns_first_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "hello there"}}]
            })))
            .mount(&server)
            .await;

        let text = client(&server).complete(&request()).await.expect("completion");
        assert_eq!(text, "hello there");
    }

    #[tokio::test]
    async fn complete_maps_unauthorized_to_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .mount(&server)
            .await;

        let err = client(&server).complete(&request()).await.unwrap_err();
        assert!(matches!(err, LlmError::Auth(ref body) if body.contains("invalid api key")));
    }

    #[tokio::test]
    async fn stream_yields_deltas_until_done() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"),
            )
            .mount(&server)
            .await;

        let stream = client(&server).stream(&request()).await.expect("stream opens");
        let chunks: Vec<String> = stream
            .map(|chunk| chunk.expect("chunk"))
            .collect()
            .await;
        assert_eq!(chunks, vec!["Hel".to_string(), "lo".to_string()]);
    }

    #[tokio::test]
    async fn stream_maps_throttling_before_opening() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let err = match client(&server).stream(&request()).await {
            Ok(_) => panic!("stream should not open"),
            Err(e) => e,
        };
        assert!(matches!(err, LlmError::RateLimited));
    }
}
