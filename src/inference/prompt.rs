//! Prompt rendering
//!
//! Turns a [`PromptInput`] into the flat text the model completes, together
//! with the stop sequences that end the completion.

use crate::types::generation::PromptInput;
use crate::types::message::ChatMessage;

const TRANSCRIPT_STOPS: [&str; 3] = ["User:", "System:", "\n"];
const INSTRUCTION_STOPS: [&str; 2] = ["[INST]", "</s>"];

/// Prompt text ready for the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    pub text: String,
    pub stop: Vec<String>,
}

impl RenderedPrompt {
    pub fn render(input: &PromptInput) -> Self {
        match input {
            PromptInput::Text(prompt) => Self::instruction(prompt),
            PromptInput::Messages(messages) => Self::transcript(messages),
        }
    }

    /// Llama-2 chat instruction format
    pub fn instruction(prompt: &str) -> Self {
        Self {
            text: format!("[INST] {} [/INST]", prompt),
            stop: INSTRUCTION_STOPS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Speaker-labelled transcript ending with the assistant cue
    pub fn transcript(messages: &[ChatMessage]) -> Self {
        let mut text = String::new();
        for msg in messages {
            text.push_str(msg.role.label());
            text.push_str(": ");
            text.push_str(&msg.content);
            text.push('\n');
        }
        text.push_str("Assistant: ");

        Self {
            text,
            stop: TRANSCRIPT_STOPS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Cut `raw` at the earliest stop sequence and trim it
    pub fn finish(&self, raw: &str) -> String {
        let end = self
            .stop
            .iter()
            .filter(|s| !s.is_empty())
            .filter_map(|s| raw.find(s.as_str()))
            .min()
            .unwrap_or(raw.len());
        raw[..end].trim().to_string()
    }

    /// Whether generated text already contains a stop sequence
    pub fn hits_stop(&self, generated: &str) -> bool {
        self.stop
            .iter()
            .any(|s| !s.is_empty() && generated.contains(s.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::message::Role;

    #[test]
    fn test_transcript_rendering() {
        let prompt = RenderedPrompt::transcript(&[
            ChatMessage::new(Role::System, "Be brief."),
            ChatMessage::new(Role::User, "Hi"),
            ChatMessage::new(Role::Assistant, "Hello."),
            ChatMessage::new(Role::User, "Name a colour"),
        ]);
        assert_eq!(
            prompt.text,
            "System: Be brief.\nUser: Hi\nAssistant: Hello.\nUser: Name a colour\nAssistant: "
        );
        assert!(prompt.stop.contains(&"\n".to_string()));
    }

    #[test]
    fn test_instruction_rendering() {
        let prompt = RenderedPrompt::render(&PromptInput::Text("What is Rust?".into()));
        assert_eq!(prompt.text, "[INST] What is Rust? [/INST]");
        assert_eq!(prompt.stop, vec!["[INST]", "</s>"]);
    }

    #[test]
    fn test_finish_cuts_at_earliest_stop() {
        let prompt = RenderedPrompt::transcript(&[]);
        assert_eq!(prompt.finish("  Blue.\nUser: and?"), "Blue.");
        assert_eq!(prompt.finish("Red User: x"), "Red");
        assert_eq!(prompt.finish(" Green "), "Green");
        assert!(prompt.hits_stop("a\nb"));
        assert!(!prompt.hits_stop("ab"));
    }
}
