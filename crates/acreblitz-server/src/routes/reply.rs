use crate::state::AppState;
use acreblitz::errors::AgentError;
use acreblitz::models::message::Message;
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use futures::{stream::StreamExt, Stream};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{
    convert::Infallible,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;

const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(500);
const CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Deserialize)]
struct ChatRequest {
    messages: Vec<Message>,
}

// Custom SSE response type that implements the Vercel AI SDK protocol
pub struct SseResponse {
    rx: ReceiverStream<String>,
}

impl SseResponse {
    fn new(rx: ReceiverStream<String>) -> Self {
        Self { rx }
    }
}

impl Stream for SseResponse {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx)
            .poll_next(cx)
            .map(|opt| opt.map(|s| Ok(Bytes::from(s))))
    }
}

impl IntoResponse for SseResponse {
    fn into_response(self) -> Response {
        (
            [
                (header::CONTENT_TYPE, "text/event-stream"),
                (header::CACHE_CONTROL, "no-cache"),
                (header::CONNECTION, "keep-alive"),
                (header::HeaderName::from_static("x-vercel-ai-data-stream"), "v1"),
            ],
            Body::from_stream(self),
        )
            .into_response()
    }
}

// Protocol-specific message formatting
struct ProtocolFormatter;

impl ProtocolFormatter {
    /// Format one pipeline chunk as a protocol line, or None for unknown chunk types
    fn format_chunk(chunk: &Value) -> Option<String> {
        match chunk.get("type")?.as_str()? {
            "text-delta" => {
                let text = chunk.get("textDelta")?;
                Some(format!("0:{}\n", text))
            }
            "tool-call" => {
                let tool_call = json!({
                    "toolCallId": chunk.get("toolCallId")?,
                    "toolName": chunk.get("toolName")?,
                    "args": chunk.get("args")?,
                });
                Some(format!("9:{}\n", tool_call))
            }
            "tool-result" => {
                let response = json!({
                    "toolCallId": chunk.get("toolCallId")?,
                    "result": chunk.get("result")?,
                });
                Some(format!("a:{}\n", response))
            }
            "finish" => {
                let finish = json!({
                    "finishReason": chunk.get("finishReason")?,
                    "usage": chunk.get("usage")?,
                });
                Some(format!("d:{}\n", finish))
            }
            "error" => Some(Self::format_error(chunk.get("error")?.as_str()?)),
            _ => None,
        }
    }

    fn format_error(message: &str) -> String {
        format!("3:{}\n", Value::String(message.to_string()))
    }

    fn format_finish(reason: &str) -> String {
        // Finish messages start with "d:"
        let finish = json!({
            "finishReason": reason,
            "usage": {
                "promptTokens": 0,
                "completionTokens": 0
            }
        });
        format!("d:{}\n", finish)
    }
}

async fn send_failure(tx: &mpsc::Sender<String>, error: &AgentError) {
    let _ = tx.send(ProtocolFormatter::format_error(&error.to_string())).await;
    let _ = tx.send(ProtocolFormatter::format_finish("error")).await;
}

async fn handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Result<SseResponse, StatusCode> {
    // Check protocol header (optional in our case)
    if let Some(protocol) = headers.get("x-protocol") {
        if protocol.to_str().map(|p| p != "data").unwrap_or(true) {
            return Err(StatusCode::BAD_REQUEST);
        }
    }

    // Create channel for streaming
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let stream = ReceiverStream::new(rx);

    let pipeline = state.pipeline();
    let messages = request.messages;

    // Spawn task to handle streaming
    tokio::spawn(async move {
        let mut stream = match pipeline.reply(&messages).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!("Failed to start reply stream: {}", e);
                send_failure(&tx, &e).await;
                return;
            }
        };

        loop {
            match timeout(HEARTBEAT_INTERVAL, stream.next()).await {
                Ok(Some(Ok(chunk))) => {
                    let Some(line) = ProtocolFormatter::format_chunk(&chunk) else {
                        tracing::warn!(?chunk, "skipping unrecognized stream chunk");
                        continue;
                    };
                    if let Err(e) = tx.send(line).await {
                        tracing::error!("Error sending message through channel: {}", e);
                        break;
                    }
                }
                Ok(Some(Err(e))) => {
                    tracing::error!("Error processing message: {}", e);
                    send_failure(&tx, &e).await;
                    break;
                }
                Ok(None) => break,
                // Heartbeat, used to detect disconnected clients and then end running tools.
                Err(_) => {
                    if tx.is_closed() {
                        tracing::info!("client disconnected, dropping reply stream");
                        break;
                    }
                }
            }
        }
    });

    Ok(SseResponse::new(stream))
}

#[derive(Debug, Deserialize)]
struct AskRequest {
    prompt: String,
}

#[derive(Debug, Serialize)]
struct AskResponse {
    response: String,
}

// simple ask an AI for a response, non streaming
async fn ask_handler(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>, StatusCode> {
    let pipeline = state.pipeline();
    let messages = vec![Message::user().with_text(request.prompt)];

    match pipeline.ask(&messages).await {
        Ok(response) => Ok(Json(AskResponse {
            response: response.trim().to_string(),
        })),
        Err(e) => {
            tracing::error!("Failed to answer prompt: {}", e);
            if e.is_rate_limited() {
                Err(StatusCode::TOO_MANY_REQUESTS)
            } else {
                Err(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }
}

// Configure routes for this module
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/reply", post(handler))
        .route("/ask", post(ask_handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::test_state;
    use acreblitz::errors::AgentResult;
    use acreblitz::providers::mock::MockProvider;
    use http::Request;
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn reply_request(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/reply")
            .header("content-type", "application/json")
            .header("x-protocol", "data")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn app(results: Vec<AgentResult<Message>>) -> Router {
        routes(test_state(Arc::new(MockProvider::with_results(results))))
    }

    #[test]
    fn test_format_chunks() {
        assert_eq!(
            ProtocolFormatter::format_chunk(&json!({"type": "text-delta", "textDelta": "Hi \"there\""})),
            Some("0:\"Hi \\\"there\\\"\"\n".to_string())
        );
        assert_eq!(
            ProtocolFormatter::format_chunk(&json!({
                "type": "tool-call",
                "toolCallId": "1",
                "toolName": "weather__get_forecast",
                "args": {"latitude": 41.6}
            })),
            Some(
                "9:{\"toolCallId\":\"1\",\"toolName\":\"weather__get_forecast\",\"args\":{\"latitude\":41.6}}\n"
                    .to_string()
            )
        );
        assert_eq!(
            ProtocolFormatter::format_chunk(&json!({
                "type": "tool-result",
                "toolCallId": "1",
                "toolName": "weather__get_forecast",
                "result": {"success": true}
            })),
            Some("a:{\"toolCallId\":\"1\",\"result\":{\"success\":true}}\n".to_string())
        );
        assert_eq!(
            ProtocolFormatter::format_chunk(&json!({"type": "error", "error": "boom"})),
            Some("3:\"boom\"\n".to_string())
        );
        assert_eq!(ProtocolFormatter::format_chunk(&json!({"type": "reasoning"})), None);
        assert_eq!(ProtocolFormatter::format_chunk(&json!("text")), None);
    }

    #[test]
    fn test_format_finish() {
        assert_eq!(
            ProtocolFormatter::format_finish("error"),
            "d:{\"finishReason\":\"error\",\"usage\":{\"promptTokens\":0,\"completionTokens\":0}}\n"
        );
    }

    #[tokio::test]
    async fn test_reply_streams_protocol_lines() {
        let app = app(vec![Ok(Message::assistant().with_text("Looks dry."))]);
        let response = app
            .oneshot(reply_request(json!({
                "messages": [{"role": "user", "content": "Will it rain?"}]
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("x-vercel-ai-data-stream").unwrap(),
            "v1"
        );
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/event-stream"
        );

        let body = body_text(response).await;
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "0:\"Looks dry.\"");
        assert!(lines[1].starts_with("d:{\"finishReason\":\"stop\""));
    }

    #[tokio::test]
    async fn test_reply_rejects_other_protocols() {
        let request = Request::builder()
            .method("POST")
            .uri("/reply")
            .header("content-type", "application/json")
            .header("x-protocol", "text")
            .body(Body::from(json!({"messages": []}).to_string()))
            .unwrap();

        let response = app(vec![]).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_rate_limit_exhaustion_reports_error() {
        let rate_limited = || Err(AgentError::RateLimited { retry_after: None });
        let app = app(vec![rate_limited(), rate_limited()]);

        let response = app
            .oneshot(reply_request(json!({
                "messages": [{"role": "user", "content": "Forecast?"}]
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_text(response).await;
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("3:"));
        assert!(lines[1].starts_with("d:{\"finishReason\":\"error\""));
    }

    #[tokio::test]
    async fn test_ask_returns_text() {
        let request = Request::builder()
            .method("POST")
            .uri("/ask")
            .header("content-type", "application/json")
            .body(Body::from(json!({"prompt": "When to plant?"}).to_string()))
            .unwrap();

        let response = app(vec![Ok(Message::assistant().with_text("After the frost.\n"))])
            .oneshot(request)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body, json!({"response": "After the frost."}));
    }

    #[tokio::test]
    async fn test_ask_maps_rate_limit() {
        let request = Request::builder()
            .method("POST")
            .uri("/ask")
            .header("content-type", "application/json")
            .body(Body::from(json!({"prompt": "When to plant?"}).to_string()))
            .unwrap();

        let rate_limited = || Err(AgentError::RateLimited { retry_after: None });
        let response = app(vec![rate_limited(), rate_limited()])
            .oneshot(request)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
