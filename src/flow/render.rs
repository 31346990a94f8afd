//! Transport-neutral prompt rendering and the `Prompter` seam.
//!
//! Items render themselves into a `PromptRequest`; the transport turns it
//! into a real chat message with an inline keyboard. The traversal engine
//! never talks to the chat API directly.

use async_trait::async_trait;

use crate::error::ChannelError;
use crate::flow::event::CallbackData;

/// One inline button: a label and its encoded callback payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub data: String,
}

impl Button {
    pub fn new(label: impl Into<String>, data: CallbackData) -> Self {
        Self {
            label: label.into(),
            data: data.encode(),
        }
    }
}

/// Inline keyboard: rows of buttons. An empty keyboard renders as a plain
/// message with no markup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keyboard(pub Vec<Vec<Button>>);

impl Keyboard {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push_row(&mut self, row: Vec<Button>) {
        if !row.is_empty() {
            self.0.push(row);
        }
    }
}

/// A prompt to present: message text plus keyboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRequest {
    pub text: String,
    pub keyboard: Keyboard,
}

impl PromptRequest {
    /// The end-of-sequence handoff: a single finish button.
    pub fn end_keyboard() -> Self {
        Self {
            text: "That was the last question. Tap \"Send\" to submit your answers.".to_string(),
            keyboard: Keyboard(vec![vec![Button::new("Send", CallbackData::Finish)]]),
        }
    }

    /// Free-form follow-up for the OTHER option.
    pub fn ask_other() -> Self {
        Self {
            text: "Write your answer in free form...".to_string(),
            keyboard: Keyboard::default(),
        }
    }

    /// Post-completion message offering another run.
    pub fn restart_offer() -> Self {
        Self {
            text: "Thank you! Your answers have been recorded. You can share another dream."
                .to_string(),
            keyboard: start_keyboard(),
        }
    }
}

/// The single start button shown on the welcome and completion messages.
pub fn start_keyboard() -> Keyboard {
    Keyboard(vec![vec![Button::new(
        "\u{1F4DD} Start",
        CallbackData::Start,
    )]])
}

/// Rendering/transport collaborator. Implemented by the Telegram layer,
/// mocked in engine tests.
#[async_trait]
pub trait Prompter: Send + Sync {
    /// Send a new prompt message. Returns the message id, which becomes the
    /// session anchor.
    async fn send_prompt(&self, chat: i64, prompt: &PromptRequest) -> Result<i64, ChannelError>;

    /// Replace the keyboard of an already-sent prompt in place.
    async fn edit_keyboard(
        &self,
        chat: i64,
        message_id: i64,
        keyboard: &Keyboard,
    ) -> Result<(), ChannelError>;

    /// Best-effort bulk delete of session messages on completion.
    async fn delete_messages(&self, chat: i64, message_ids: &[i64]) -> Result<(), ChannelError>;
}
