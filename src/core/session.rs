//! Session orchestration: the state machine that drives one question from
//! submission to a finalized (or failed) answer.
//!
//! Exactly one stream session is active per conversation. The streaming
//! transport is attempted first; if it reports itself unsupported before
//! producing any event, the traditional request/response path runs instead.
//! A `Completed` event hands off to the word-by-word reveal; incremental
//! `Chunk` events update the display live and finalize on `Done`.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::api::{AskRequest, AskResponse, HistoryUpload};
use crate::core::figures::FigureCatalog;
use crate::core::message::Message;
use crate::core::render::{self, RenderedMessage};
use crate::core::reveal::{RevealPacing, WordStreamer};
use crate::core::stream::{ChatStreamService, StreamEvent, StreamMessage, StreamParams};
use crate::utils::url::construct_api_url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Streaming,
    Revealing,
    Finalized,
    Failed,
}

impl SessionPhase {
    /// Phases during which a new question must be rejected.
    pub fn is_active(self) -> bool {
        matches!(self, SessionPhase::Streaming | SessionPhase::Revealing)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionPhase::Finalized | SessionPhase::Failed)
    }
}

/// Per-question state. Owned exclusively by the in-flight question.
#[derive(Debug)]
pub struct StreamSession {
    pub session_id: String,
    pub pending_text: String,
    pub revealed_text: String,
    pub phase: SessionPhase,
    pub stream_id: u64,
}

impl StreamSession {
    fn new(session_id: String, stream_id: u64) -> Self {
        Self {
            session_id,
            pending_text: String::new(),
            revealed_text: String::new(),
            phase: SessionPhase::Streaming,
            stream_id,
        }
    }
}

/// Display collaborator. The core decides what text reaches it and in what
/// increments; how it is shown is out of scope.
pub trait RenderSink {
    /// A question is in flight and nothing is displayable yet.
    fn show_thinking(&mut self);
    /// Replace the in-progress display with a new partial state.
    fn show_partial(&mut self, text: &str);
    /// Atomically replace the partial display with the final rendered
    /// message. Never called more than once per question.
    fn show_final(&mut self, message: &RenderedMessage);
    /// Inline error message in place of an answer.
    fn show_error(&mut self, message: &str);
    /// Transient user-facing notice (e.g. "still processing").
    fn show_notice(&mut self, notice: &str);
}

/// Persistence collaborator. Writes are fire-and-forget: failures are
/// logged and the displayed answer is never retracted.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn save(
        &self,
        session_id: &str,
        history: &[Message],
    ) -> Result<(), Box<dyn Error + Send + Sync>>;

    async fn load(
        &self,
        _session_id: &str,
    ) -> Result<Vec<Message>, Box<dyn Error + Send + Sync>> {
        Ok(Vec::new())
    }
}

/// History store that keeps nothing. Default for tests and offline runs.
pub struct NullHistoryStore;

#[async_trait]
impl HistoryStore for NullHistoryStore {
    async fn save(
        &self,
        _session_id: &str,
        _history: &[Message],
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(())
    }
}

/// History store backed by the backend's `/chat/history` endpoint.
pub struct HttpHistoryStore {
    pub client: reqwest::Client,
    pub base_url: String,
    pub user_id: String,
}

#[async_trait]
impl HistoryStore for HttpHistoryStore {
    async fn save(
        &self,
        session_id: &str,
        history: &[Message],
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let url = construct_api_url(&self.base_url, "chat/history");
        let body = HistoryUpload {
            user_id: &self.user_id,
            session_id,
            history,
        };
        let response = self.client.post(url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(format!("history save rejected: {}", response.status()).into());
        }
        Ok(())
    }

    async fn load(
        &self,
        session_id: &str,
    ) -> Result<Vec<Message>, Box<dyn Error + Send + Sync>> {
        let url = format!(
            "{}?user_id={}&session_id={}",
            construct_api_url(&self.base_url, "chat/history"),
            self.user_id,
            session_id
        );
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(format!("history load rejected: {}", response.status()).into());
        }
        Ok(response.json().await?)
    }
}

/// Everything a conversation needs to reach its collaborators.
pub struct ChatContext {
    pub client: reqwest::Client,
    pub base_url: String,
    pub model: String,
    pub user_id: String,
    pub catalog: FigureCatalog,
    pub pacing: RevealPacing,
    pub store: Arc<dyn HistoryStore>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    /// A session is still Streaming or Revealing. Hard precondition, never
    /// a queued request.
    Busy,
    EmptyQuestion,
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitError::Busy => write!(f, "still processing the previous question"),
            SubmitError::EmptyQuestion => write!(f, "the question is empty"),
        }
    }
}

impl Error for SubmitError {}

/// Outcome of consuming one stream's events.
#[derive(Debug, PartialEq, Eq)]
enum StreamOutcome {
    /// Terminal: Finalized or Failed was reached.
    Settled,
    /// The transport was unsupported; the traditional path should run.
    NeedsFallback,
}

/// Owns the transcript and the single active stream session.
pub struct Conversation {
    session_id: String,
    history: Vec<Message>,
    active: Option<StreamSession>,
    stream_counter: u64,
}

impl Conversation {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            history: Vec::new(),
            active: None,
            stream_counter: 0,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn phase(&self) -> SessionPhase {
        self.active
            .as_ref()
            .map(|s| s.phase)
            .unwrap_or(SessionPhase::Idle)
    }

    /// Replace the transcript with a stored session's history.
    pub async fn restore_history(&mut self, ctx: &ChatContext) {
        match ctx.store.load(&self.session_id).await {
            Ok(history) => self.history = history,
            Err(e) => tracing::warn!("history load failed: {e}"),
        }
    }

    /// Enforce session exclusivity and open a new stream session.
    fn try_begin(&mut self) -> Result<u64, SubmitError> {
        if self.phase().is_active() {
            return Err(SubmitError::Busy);
        }
        self.stream_counter += 1;
        let stream_id = self.stream_counter;
        self.active = Some(StreamSession::new(self.session_id.clone(), stream_id));
        Ok(stream_id)
    }

    fn is_current_stream(&self, stream_id: u64) -> bool {
        self.active
            .as_ref()
            .map(|s| s.stream_id == stream_id)
            .unwrap_or(false)
    }

    fn set_phase(&mut self, phase: SessionPhase) {
        if let Some(session) = self.active.as_mut() {
            session.phase = phase;
        }
    }

    fn persist(&self, ctx: &ChatContext) {
        let store = Arc::clone(&ctx.store);
        let session_id = self.session_id.clone();
        let history = self.history.clone();
        tokio::spawn(async move {
            if let Err(e) = store.save(&session_id, &history).await {
                tracing::warn!("history save failed: {e}");
            }
        });
    }

    fn build_request(&self, ctx: &ChatContext, question: &str) -> AskRequest {
        AskRequest {
            text: question.to_string(),
            user_id: ctx.user_id.clone(),
            chat_token: self.session_id.clone(),
            history: self.history.clone(),
            model: ctx.model.clone(),
        }
    }

    /// Submit one question and drive it to a terminal phase.
    ///
    /// `cancel_token` aborts the transport read loop and interrupts the
    /// reveal at the next token boundary; clone it before calling to keep a
    /// handle.
    pub async fn ask(
        &mut self,
        ctx: &ChatContext,
        sink: &mut dyn RenderSink,
        question: &str,
        cancel_token: CancellationToken,
    ) -> Result<(), SubmitError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(SubmitError::EmptyQuestion);
        }
        let stream_id = self.try_begin()?;

        self.history.push(Message::user(question));
        self.persist(ctx);
        sink.show_thinking();

        let request = self.build_request(ctx, question);
        let (service, rx) = ChatStreamService::new();
        service.spawn_stream(StreamParams {
            client: ctx.client.clone(),
            base_url: ctx.base_url.clone(),
            request: request.clone(),
            cancel_token: cancel_token.clone(),
            stream_id,
        });

        let outcome = self
            .consume_stream(ctx, sink, rx, stream_id, &cancel_token)
            .await;
        if outcome == StreamOutcome::NeedsFallback {
            self.run_traditional(ctx, sink, request).await;
        }
        Ok(())
    }

    /// Drive the event loop for one stream until a terminal phase or an
    /// unsupported-transport signal. Events are processed strictly in
    /// arrival order; messages from a replaced stream are discarded by id.
    async fn consume_stream(
        &mut self,
        ctx: &ChatContext,
        sink: &mut dyn RenderSink,
        mut rx: mpsc::UnboundedReceiver<(StreamMessage, u64)>,
        stream_id: u64,
        cancel_token: &CancellationToken,
    ) -> StreamOutcome {
        while let Some((message, id)) = rx.recv().await {
            if !self.is_current_stream(id) {
                continue;
            }
            match message {
                StreamMessage::Unsupported => {
                    // Recoverable: hand control to the traditional path.
                    self.set_phase(SessionPhase::Idle);
                    return StreamOutcome::NeedsFallback;
                }
                StreamMessage::Event(StreamEvent::Status(_)) => {
                    sink.show_thinking();
                }
                StreamMessage::Event(StreamEvent::Chunk(text)) => {
                    if let Some(session) = self.active.as_mut() {
                        session.pending_text.push_str(&text);
                        sink.show_partial(&render::render_streaming(&session.pending_text));
                    }
                }
                StreamMessage::Event(StreamEvent::Completed(full_text)) => {
                    self.set_phase(SessionPhase::Revealing);
                    // The model label is display metadata; it is never
                    // revealed word by word.
                    let (reveal_text, _) = render::extract_model_label(&full_text);
                    if self.reveal(ctx, sink, &reveal_text, cancel_token).await {
                        self.finalize(ctx, sink, &full_text);
                    } else {
                        self.set_phase(SessionPhase::Failed);
                    }
                    return StreamOutcome::Settled;
                }
                StreamMessage::Event(StreamEvent::ErrorEvent(error)) => {
                    sink.show_error(&format!("Error: {error}"));
                    self.set_phase(SessionPhase::Failed);
                    return StreamOutcome::Settled;
                }
                StreamMessage::Event(StreamEvent::Done) => {
                    let pending = self
                        .active
                        .as_ref()
                        .map(|s| s.pending_text.clone())
                        .unwrap_or_default();
                    if pending.is_empty() {
                        self.set_phase(SessionPhase::Finalized);
                    } else {
                        self.finalize(ctx, sink, &pending);
                    }
                    return StreamOutcome::Settled;
                }
            }
        }

        // Channel closed without a terminal event: the transport task was
        // cancelled or died. The session is abandoned.
        self.set_phase(SessionPhase::Failed);
        StreamOutcome::Settled
    }

    /// Replay the full answer word by word. Returns false if the session
    /// was cancelled before the reveal exhausted.
    async fn reveal(
        &mut self,
        ctx: &ChatContext,
        sink: &mut dyn RenderSink,
        full_text: &str,
        cancel_token: &CancellationToken,
    ) -> bool {
        let mut streamer = WordStreamer::new(full_text, ctx.pacing);
        loop {
            let delay = streamer.next_delay();
            let state = match streamer.advance() {
                Some(state) => state.to_string(),
                None => return true,
            };
            if let Some(session) = self.active.as_mut() {
                session.revealed_text = state.clone();
            }
            sink.show_partial(&state);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel_token.cancelled() => return false,
            }
        }
    }

    /// Render the final message, swap it in atomically, and append it to
    /// history.
    fn finalize(&mut self, ctx: &ChatContext, sink: &mut dyn RenderSink, full_text: &str) {
        let rendered = render::render_message(full_text, &ctx.catalog);
        sink.show_final(&rendered);

        let message = Message::bot(full_text)
            .with_rendered_html(rendered.html.clone())
            .with_model_label(rendered.model_label.clone());
        self.history.push(message);
        self.set_phase(SessionPhase::Finalized);
        self.persist(ctx);
    }

    /// The traditional single-round-trip path, used when streaming is
    /// unsupported. Transitions Idle → Finalized or Idle → Failed on its
    /// own.
    async fn run_traditional(
        &mut self,
        ctx: &ChatContext,
        sink: &mut dyn RenderSink,
        request: AskRequest,
    ) {
        let url = construct_api_url(&ctx.base_url, "preguntar");
        let response = match ctx.client.post(url).json(&request).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!("traditional request failed: {e}");
                sink.show_error("Error al comunicarse con el bot.");
                self.set_phase(SessionPhase::Failed);
                return;
            }
        };

        let parsed: Result<AskResponse, _> = response.json().await;
        match parsed {
            Ok(AskResponse {
                answer: Some(answer),
                ..
            }) => {
                self.finalize(ctx, sink, &answer);
            }
            Ok(AskResponse {
                error: Some(error), ..
            }) => {
                sink.show_error(&format!("Error: {error}"));
                self.set_phase(SessionPhase::Failed);
            }
            Ok(_) => {
                sink.show_error("Error al comunicarse con el bot.");
                self.set_phase(SessionPhase::Failed);
            }
            Err(e) => {
                tracing::debug!("traditional response unreadable: {e}");
                sink.show_error("Error al comunicarse con el bot.");
                self.set_phase(SessionPhase::Failed);
            }
        }
    }
}
