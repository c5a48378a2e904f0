//! Charla is the client-side streaming answer pipeline of an academic chat
//! assistant.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns the stream decoder, the word-by-word reveal, the
//!   LaTeX/figure-safe render pipeline, and the session state machine that
//!   orchestrates them.
//! - [`api`] defines the wire payloads exchanged with the chat backend.
//! - [`cli`] parses command-line arguments and runs the interactive ask
//!   loop that drives a terminal render sink.
//! - [`utils`] holds URL normalization and transcript logging helpers.
//!
//! The runtime entrypoint lives in the binary crate (`src/main.rs`) and
//! routes through [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod core;
pub mod utils;
