//! Command-line interface parsing and the interactive ask loop.
//!
//! This is display glue only: it dispatches questions into
//! [`crate::core::session::Conversation`] and prints what the render sink
//! receives. All pipeline behavior lives in [`crate::core`].

use std::error::Error;
use std::io::Write;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::core::config::Config;
use crate::core::figures::FigureCatalog;
use crate::core::render::RenderedMessage;
use crate::core::session::{
    ChatContext, Conversation, HttpHistoryStore, NullHistoryStore, RenderSink, SubmitError,
};
use crate::utils::logging::LoggingState;

#[derive(Parser)]
#[command(name = "charla")]
#[command(about = "A terminal client for an academic chat backend with streaming answers")]
#[command(
    long_about = "Charla talks to an academic chat backend, streams the answer, replays it \
word by word, and renders the final message with LaTeX equations and textbook figure \
references kept intact.\n\n\
Controls:\n\
  Type              Enter your question and press Enter\n\
  /quit             Exit"
)]
pub struct Args {
    /// Backend base URL
    #[arg(short = 'b', long)]
    pub base_url: Option<String>,

    /// Model to request from the backend
    #[arg(short = 'm', long)]
    pub model: Option<String>,

    /// User identifier sent with every request
    #[arg(short = 'u', long)]
    pub user: Option<String>,

    /// Resume a stored session instead of starting a new one
    #[arg(short = 's', long)]
    pub session: Option<String>,

    /// Enable transcript logging to the specified file
    #[arg(short = 'l', long)]
    pub log: Option<String>,

    /// Skip history persistence entirely
    #[arg(long)]
    pub no_history: bool,
}

/// Prints render-sink calls to stdout. Partial states grow in place; the
/// final message replaces them in one step.
struct TerminalSink {
    shown: String,
}

impl TerminalSink {
    fn new() -> Self {
        Self {
            shown: String::new(),
        }
    }

    fn flush(&self) {
        let _ = std::io::stdout().flush();
    }
}

impl RenderSink for TerminalSink {
    fn show_thinking(&mut self) {
        if self.shown.is_empty() {
            print!("...");
            self.flush();
        }
    }

    fn show_partial(&mut self, text: &str) {
        if let Some(suffix) = text.strip_prefix(self.shown.as_str()) {
            print!("{suffix}");
        } else {
            println!();
            print!("{text}");
        }
        self.shown = text.to_string();
        self.flush();
    }

    fn show_final(&mut self, message: &RenderedMessage) {
        // The partial display is replaced by the rendered message in a
        // single step.
        println!("\r");
        println!("{}", message.html);
        if let Some(label) = &message.model_label {
            println!("[{label}]");
        }
        self.shown.clear();
    }

    fn show_error(&mut self, message: &str) {
        println!();
        println!("{message}");
        self.shown.clear();
    }

    fn show_notice(&mut self, notice: &str) {
        println!("({notice})");
    }
}

fn generate_session_id() -> String {
    let mut bytes = [0u8; 4];
    let suffix = match getrandom::fill(&mut bytes) {
        Ok(()) => u32::from_le_bytes(bytes),
        Err(_) => std::process::id(),
    };
    format!(
        "session_{}_{:08x}",
        chrono::Utc::now().timestamp_millis(),
        suffix
    )
}

pub async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::load()?;

    let base_url = args
        .base_url
        .or(config.base_url.clone())
        .unwrap_or_else(|| "http://localhost:8000".to_string());
    let model = args
        .model
        .or(config.default_model.clone())
        .unwrap_or_else(|| "llama3".to_string());
    let user_id = args
        .user
        .or(config.user_id.clone())
        .unwrap_or_else(|| "anonimo".to_string());

    let client = reqwest::Client::new();
    let catalog = match (&config.figure_map_path, &config.figure_assets_path) {
        (Some(map), Some(assets)) => FigureCatalog::load(map, assets),
        _ => FigureCatalog::default(),
    };

    let store: Arc<dyn crate::core::session::HistoryStore> = if args.no_history {
        Arc::new(NullHistoryStore)
    } else {
        Arc::new(HttpHistoryStore {
            client: client.clone(),
            base_url: base_url.clone(),
            user_id: user_id.clone(),
        })
    };

    let ctx = ChatContext {
        client,
        base_url,
        model,
        user_id,
        catalog,
        pacing: config.reveal_pacing(),
        store,
    };

    let logging = LoggingState::new(args.log)?;
    let resumed = args.session.is_some();
    let session_id = args.session.unwrap_or_else(generate_session_id);
    let mut conversation = Conversation::new(session_id);
    if resumed {
        conversation.restore_history(&ctx).await;
        println!(
            "Resumed session {} ({} messages)",
            conversation.session_id(),
            conversation.history().len()
        );
    }

    let mut sink = TerminalSink::new();
    let stdin = std::io::stdin();

    loop {
        print!("> ");
        let _ = std::io::stdout().flush();

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question == "/quit" {
            break;
        }

        let logged_from = conversation.history().len();
        match conversation
            .ask(&ctx, &mut sink, question, CancellationToken::new())
            .await
        {
            Ok(()) => {
                for message in &conversation.history()[logged_from..] {
                    if let Err(e) = logging.log_transcript(message) {
                        tracing::warn!("transcript log failed: {e}");
                    }
                }
            }
            Err(SubmitError::Busy) => sink.show_notice(&SubmitError::Busy.to_string()),
            Err(SubmitError::EmptyQuestion) => {}
        }
    }

    Ok(())
}
