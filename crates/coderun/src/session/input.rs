//! Single-slot relay for interactive input.

use coderun_protocol::ClientMessage;

use super::error::ValidationError;

/// Shown when the backend asks for input without a prompt.
pub const DEFAULT_PROMPT: &str = "Input:";

/// Holds at most one pending prompt and turns one submission into one
/// `input_response`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputRelay {
    pending: Option<String>,
}

impl InputRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a prompt, replacing any prompt still pending.
    ///
    /// Returns `true` if a previous prompt was overwritten.
    pub fn prompt_received(&mut self, prompt: impl Into<String>) -> bool {
        let mut prompt = prompt.into();
        if prompt.is_empty() {
            prompt = DEFAULT_PROMPT.to_string();
        }
        self.pending.replace(prompt).is_some()
    }

    pub fn pending(&self) -> Option<&str> {
        self.pending.as_deref()
    }

    /// Consume the pending prompt and build the response.
    ///
    /// Blank input leaves the prompt pending. The input is sent as typed;
    /// trimming only decides emptiness.
    pub fn submit(&mut self, input: &str) -> Result<ClientMessage, ValidationError> {
        if input.trim().is_empty() {
            return Err(ValidationError::EmptyInput);
        }
        self.pending
            .take()
            .ok_or(ValidationError::NoPendingPrompt)?;
        Ok(ClientMessage::InputResponse {
            input: input.to_string(),
        })
    }

    pub fn clear(&mut self) {
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_without_prompt_is_rejected() {
        let mut relay = InputRelay::new();
        assert_eq!(relay.submit("Ada"), Err(ValidationError::NoPendingPrompt));
    }

    #[test]
    fn test_blank_submit_keeps_prompt() {
        let mut relay = InputRelay::new();
        relay.prompt_received("Name:");
        assert_eq!(relay.submit("   "), Err(ValidationError::EmptyInput));
        assert_eq!(relay.pending(), Some("Name:"));
    }

    #[test]
    fn test_second_submit_is_noop() {
        let mut relay = InputRelay::new();
        relay.prompt_received("Name:");
        assert_eq!(
            relay.submit(" Ada "),
            Ok(ClientMessage::InputResponse {
                input: " Ada ".to_string()
            })
        );
        assert_eq!(relay.submit("Ada"), Err(ValidationError::NoPendingPrompt));
    }

    #[test]
    fn test_overwrite_reports_previous_prompt() {
        let mut relay = InputRelay::new();
        assert!(!relay.prompt_received("first"));
        assert!(relay.prompt_received("second"));
        assert_eq!(relay.pending(), Some("second"));
    }

    #[test]
    fn test_empty_prompt_uses_default() {
        let mut relay = InputRelay::new();
        relay.prompt_received("");
        assert_eq!(relay.pending(), Some(DEFAULT_PROMPT));
    }
}
