pub mod config;
pub mod constants;
pub mod figures;
pub mod message;
pub mod protect;
pub mod render;
pub mod reveal;
pub mod session;
pub mod stream;

#[cfg(test)]
mod transport_tests;
