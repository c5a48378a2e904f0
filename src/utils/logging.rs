//! Optional transcript logging to a local file.

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::core::message::Message;

pub struct LoggingState {
    file_path: Option<String>,
    is_active: bool,
}

impl LoggingState {
    pub fn new(log_file: Option<String>) -> Result<Self, Box<dyn std::error::Error>> {
        let mut logging = LoggingState {
            file_path: log_file,
            is_active: false,
        };
        if let Some(path) = logging.file_path.clone() {
            logging.test_file_access(&path)?;
            logging.is_active = true;
        }
        Ok(logging)
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    /// Append one finalized transcript message. A no-op when logging is
    /// disabled.
    pub fn log_transcript(&self, message: &Message) -> Result<(), Box<dyn std::error::Error>> {
        let Some(file_path) = self.file_path.as_ref().filter(|_| self.is_active) else {
            return Ok(());
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;
        let mut writer = BufWriter::new(file);

        writeln!(writer, "{}: {}", message.sender.as_str(), message.raw_text)?;
        writeln!(writer)?;
        writer.flush()?;
        Ok(())
    }

    pub fn get_status_string(&self) -> String {
        match (&self.file_path, self.is_active) {
            (None, _) => "disabled".to_string(),
            (Some(path), true) => format!(
                "active ({})",
                Path::new(path)
                    .file_name()
                    .unwrap_or_default()
                    .to_string_lossy()
            ),
            (Some(path), false) => format!(
                "paused ({})",
                Path::new(path)
                    .file_name()
                    .unwrap_or_default()
                    .to_string_lossy()
            ),
        }
    }

    fn test_file_access(&self, path: &str) -> Result<(), Box<dyn std::error::Error>> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_logging_is_a_no_op() {
        let logging = LoggingState::new(None).expect("logging state");
        assert!(!logging.is_active());
        logging
            .log_transcript(&Message::user("hola"))
            .expect("no-op log");
        assert_eq!(logging.get_status_string(), "disabled");
    }

    #[test]
    fn transcript_messages_append_to_the_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("transcript.log");
        let logging = LoggingState::new(Some(path.display().to_string())).expect("logging state");
        assert!(logging.is_active());

        logging
            .log_transcript(&Message::user("una pregunta"))
            .expect("log user");
        logging
            .log_transcript(&Message::bot("una respuesta"))
            .expect("log bot");

        let contents = std::fs::read_to_string(&path).expect("read log");
        assert!(contents.contains("user: una pregunta"));
        assert!(contents.contains("bot: una respuesta"));
    }
}
