//! End-to-end tests over a real TCP transport: the streaming endpoint, the
//! unsupported-transport fallback, and the traditional path.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::core::figures::FigureCatalog;
use crate::core::render::RenderedMessage;
use crate::core::reveal::RevealPacing;
use crate::core::session::{ChatContext, Conversation, NullHistoryStore, RenderSink, SessionPhase};

struct Backend {
    stream_status: u16,
    stream_body: &'static str,
    ask_status: u16,
    ask_body: &'static str,
}

/// Minimal HTTP backend: answers `/chat/stream` and `/preguntar` with the
/// configured canned responses, everything else with an empty 200.
async fn spawn_backend(backend: Backend) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test backend");
    let addr = listener.local_addr().expect("local addr");
    let backend = Arc::new(backend);

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let backend = Arc::clone(&backend);
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut tmp = [0u8; 1024];
                loop {
                    match socket.read(&mut tmp).await {
                        Ok(0) => break,
                        Ok(n) => {
                            buf.extend_from_slice(&tmp[..n]);
                            if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                                break;
                            }
                        }
                        Err(_) => return,
                    }
                }

                let request = String::from_utf8_lossy(&buf);
                let (status, body) = if request.starts_with("POST /chat/stream") {
                    (backend.stream_status, backend.stream_body)
                } else if request.starts_with("POST /preguntar") {
                    (backend.ask_status, backend.ask_body)
                } else {
                    (200, "{}")
                };
                let reason = if status < 400 { "OK" } else { "Error" };
                let response = format!(
                    "HTTP/1.1 {status} {reason}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    format!("http://{addr}")
}

#[derive(Default)]
struct RecordingSink {
    partials: Vec<String>,
    finals: Vec<String>,
    errors: Vec<String>,
}

impl RenderSink for RecordingSink {
    fn show_thinking(&mut self) {}
    fn show_partial(&mut self, text: &str) {
        self.partials.push(text.to_string());
    }
    fn show_final(&mut self, message: &RenderedMessage) {
        self.finals.push(message.html.clone());
    }
    fn show_error(&mut self, message: &str) {
        self.errors.push(message.to_string());
    }
    fn show_notice(&mut self, _notice: &str) {}
}

fn context_for(base_url: String) -> ChatContext {
    ChatContext {
        client: reqwest::Client::new(),
        base_url,
        model: "llama3".to_string(),
        user_id: "u1".to_string(),
        catalog: FigureCatalog::default(),
        pacing: RevealPacing {
            base: std::time::Duration::ZERO,
            jitter: std::time::Duration::ZERO,
        },
        store: Arc::new(NullHistoryStore),
    }
}

#[tokio::test]
async fn streaming_endpoint_drives_the_session_to_finalized() {
    let base_url = spawn_backend(Backend {
        stream_status: 200,
        stream_body: concat!(
            "data: {\"status\": \"processing\"}\n",
            "data: {\"chunk\": \"Hola \"}\n",
            "data: {\"chunk\": \"mundo\"}\n",
            "data: [DONE]\n",
        ),
        ask_status: 500,
        ask_body: "",
    })
    .await;

    let ctx = context_for(base_url);
    let mut sink = RecordingSink::default();
    let mut conversation = Conversation::new("s1");

    conversation
        .ask(&ctx, &mut sink, "pregunta", CancellationToken::new())
        .await
        .expect("ask succeeds");

    assert_eq!(conversation.phase(), SessionPhase::Finalized);
    assert_eq!(sink.finals.len(), 1);
    assert!(sink.finals[0].contains("Hola mundo"));
    assert!(sink.errors.is_empty());
}

#[tokio::test]
async fn rejected_stream_falls_back_to_the_traditional_path() {
    // 500 with empty body before any event: unsupported, not an error.
    let base_url = spawn_backend(Backend {
        stream_status: 500,
        stream_body: "",
        ask_status: 200,
        ask_body: "{\"respuesta\": \"Respuesta tradicional.\"}",
    })
    .await;

    let ctx = context_for(base_url);
    let mut sink = RecordingSink::default();
    let mut conversation = Conversation::new("s1");

    conversation
        .ask(&ctx, &mut sink, "pregunta", CancellationToken::new())
        .await
        .expect("ask succeeds");

    assert_eq!(conversation.phase(), SessionPhase::Finalized);
    // No protocol event reached the display before the fallback.
    assert!(sink.partials.is_empty());
    assert!(sink.errors.is_empty());
    assert_eq!(sink.finals.len(), 1);
    assert!(sink.finals[0].contains("Respuesta tradicional."));
}

#[tokio::test]
async fn failing_fallback_surfaces_a_single_error() {
    let base_url = spawn_backend(Backend {
        stream_status: 401,
        stream_body: "",
        ask_status: 200,
        ask_body: "{\"error\": \"sin permiso\"}",
    })
    .await;

    let ctx = context_for(base_url);
    let mut sink = RecordingSink::default();
    let mut conversation = Conversation::new("s1");

    conversation
        .ask(&ctx, &mut sink, "pregunta", CancellationToken::new())
        .await
        .expect("ask returns despite failure");

    assert_eq!(conversation.phase(), SessionPhase::Failed);
    assert_eq!(sink.errors, vec!["Error: sin permiso".to_string()]);
    assert!(sink.finals.is_empty());
    // A new question is accepted after the failure.
    assert!(!conversation.phase().is_active());
}

#[tokio::test]
async fn server_reported_stream_error_is_fatal() {
    let base_url = spawn_backend(Backend {
        stream_status: 200,
        stream_body: "data: {\"error\": \"modelo caido\"}\ndata: [DONE]\n",
        ask_status: 500,
        ask_body: "",
    })
    .await;

    let ctx = context_for(base_url);
    let mut sink = RecordingSink::default();
    let mut conversation = Conversation::new("s1");

    conversation
        .ask(&ctx, &mut sink, "pregunta", CancellationToken::new())
        .await
        .expect("ask returns despite failure");

    assert_eq!(conversation.phase(), SessionPhase::Failed);
    assert_eq!(sink.errors, vec!["Error: modelo caido".to_string()]);
    assert!(sink.finals.is_empty());
}
