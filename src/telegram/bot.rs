//! The bot loop — long-polls for updates, decodes them into flow events,
//! and dispatches one task per event.

use std::sync::Arc;

use crate::error::{Error, FlowError};
use crate::flow::engine::{FlowEngine, Outcome};
use crate::flow::event::{AnswerEvent, CallbackData, Event};
use crate::flow::render::start_keyboard;
use crate::store::traits::SessionKey;
use crate::telegram::api::TelegramApi;

/// Long-poll timeout passed to getUpdates.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Back-off after a failed poll.
const POLL_RETRY_SECS: u64 = 5;

/// One decoded inbound interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Inbound {
    /// The /start command: greet and offer the start button.
    Welcome { chat: i64, name: String },
    /// An event for the traversal engine.
    Event {
        key: SessionKey,
        event: Event,
        /// Callback query id to acknowledge, for tap-born events.
        callback_id: Option<String>,
    },
}

/// The survey bot: update loop plus event dispatch.
pub struct SurveyBot {
    api: Arc<TelegramApi>,
    engine: Arc<FlowEngine>,
}

impl SurveyBot {
    pub fn new(api: Arc<TelegramApi>, engine: Arc<FlowEngine>) -> Self {
        Self { api, engine }
    }

    /// Run the update loop. Never returns under normal operation.
    pub async fn run(&self) {
        let mut offset: i64 = 0;
        tracing::info!("Survey bot listening for updates...");

        loop {
            let updates = match self.api.get_updates(offset, POLL_TIMEOUT_SECS).await {
                Ok(updates) => updates,
                Err(e) => {
                    tracing::warn!("Update poll error: {e}");
                    tokio::time::sleep(std::time::Duration::from_secs(POLL_RETRY_SECS)).await;
                    continue;
                }
            };

            for update in updates {
                if let Some(update_id) = update.get("update_id").and_then(serde_json::Value::as_i64)
                {
                    offset = update_id + 1;
                }

                let Some(inbound) = decode_update(&update) else {
                    tracing::debug!("Dropping undecodable update");
                    continue;
                };

                let api = Arc::clone(&self.api);
                let engine = Arc::clone(&self.engine);
                tokio::spawn(async move {
                    dispatch(api, engine, inbound).await;
                });
            }
        }
    }
}

/// Handle one decoded interaction to completion.
async fn dispatch(api: Arc<TelegramApi>, engine: Arc<FlowEngine>, inbound: Inbound) {
    match inbound {
        Inbound::Welcome { chat, name } => {
            let text = format!("Hi, {name}! Tap the button below to start the survey.");
            if let Err(e) = api.send_message(chat, &text, Some(&start_keyboard())).await {
                tracing::error!(chat, "Could not send welcome: {e}");
            }
        }
        Inbound::Event {
            key,
            event,
            callback_id,
        } => {
            let result = engine.handle(key, event).await;
            let toast = match &result {
                Ok(Outcome::Notice(text)) => Some(*text),
                Ok(_) => None,
                Err(e) => failure_toast(e),
            };

            if let Some(id) = callback_id.as_deref() {
                if let Err(e) = api.answer_callback(id, toast).await {
                    tracing::debug!("Could not answer callback: {e}");
                }
            }

            match result {
                Ok(_) => {}
                Err(Error::Flow(e)) => {
                    tracing::debug!(user = key.user, "Rejected event: {e}");
                }
                Err(Error::Sink(e)) => {
                    // The session survives; the user can tap Send again.
                    tracing::error!(user = key.user, "Finalize write failed: {e}");
                    let _ = api
                        .send_message(
                            key.chat,
                            "Your answers could not be recorded. Please try again.",
                            None,
                        )
                        .await;
                }
                Err(e) => {
                    tracing::error!(user = key.user, "Event handling failed: {e}");
                }
            }
        }
    }
}

/// User-visible toast for a rejected event, if any.
fn failure_toast(error: &Error) -> Option<&'static str> {
    match error {
        Error::Flow(FlowError::StaleEvent { .. }) => Some("You already answered this question"),
        Error::Flow(FlowError::SequenceExhausted) => Some("This is the last question"),
        _ => None,
    }
}

/// Decode one getUpdates entry. Unknown shapes and payloads return `None`
/// and are dropped.
fn decode_update(update: &serde_json::Value) -> Option<Inbound> {
    if let Some(message) = update.get("message") {
        let user = message.get("from")?.get("id")?.as_i64()?;
        let chat = message.get("chat")?.get("id")?.as_i64()?;
        let text = message.get("text")?.as_str()?;

        if text.starts_with("/start") {
            let name = message
                .get("from")
                .and_then(|f| f.get("first_name"))
                .and_then(serde_json::Value::as_str)
                .unwrap_or("there")
                .to_string();
            return Some(Inbound::Welcome { chat, name });
        }

        return Some(Inbound::Event {
            key: SessionKey::new(user, chat),
            event: Event::Answer(AnswerEvent::Text {
                value: text.to_string(),
            }),
            callback_id: None,
        });
    }

    if let Some(query) = update.get("callback_query") {
        let callback_id = query.get("id")?.as_str()?.to_string();
        let user = query.get("from")?.get("id")?.as_i64()?;
        let message = query.get("message")?;
        let chat = message.get("chat")?.get("id")?.as_i64()?;
        let message_id = message.get("message_id")?.as_i64()?;
        let data = query.get("data")?.as_str()?;

        let event = CallbackData::decode(data)?.into_event(message_id);
        return Some(Inbound::Event {
            key: SessionKey::new(user, chat),
            event,
            callback_id: Some(callback_id),
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::event::PageDir;
    use serde_json::json;

    fn message_update(text: &str) -> serde_json::Value {
        json!({
            "update_id": 100,
            "message": {
                "message_id": 55,
                "from": { "id": 7, "first_name": "Alice" },
                "chat": { "id": 42 },
                "text": text,
            }
        })
    }

    fn callback_update(data: &str) -> serde_json::Value {
        json!({
            "update_id": 101,
            "callback_query": {
                "id": "cb-1",
                "from": { "id": 7 },
                "data": data,
                "message": {
                    "message_id": 90,
                    "chat": { "id": 42 },
                }
            }
        })
    }

    #[test]
    fn start_command_becomes_welcome() {
        let inbound = decode_update(&message_update("/start")).unwrap();
        assert_eq!(
            inbound,
            Inbound::Welcome {
                chat: 42,
                name: "Alice".to_string()
            }
        );
    }

    #[test]
    fn plain_text_becomes_an_answer() {
        let inbound = decode_update(&message_update("i was flying")).unwrap();
        let Inbound::Event {
            key,
            event,
            callback_id,
        } = inbound
        else {
            panic!("expected an event");
        };
        assert_eq!(key, SessionKey::new(7, 42));
        assert_eq!(callback_id, None);
        assert_eq!(
            event,
            Event::Answer(AnswerEvent::Text {
                value: "i was flying".to_string()
            })
        );
    }

    #[test]
    fn callback_taps_carry_the_prompt_id() {
        let inbound = decode_update(&callback_update("page:next")).unwrap();
        let Inbound::Event {
            event, callback_id, ..
        } = inbound
        else {
            panic!("expected an event");
        };
        assert_eq!(callback_id.as_deref(), Some("cb-1"));
        assert_eq!(
            event,
            Event::PageNav {
                prompt: 90,
                dir: PageDir::Next
            }
        );
    }

    #[test]
    fn unknown_callback_data_is_dropped() {
        assert_eq!(decode_update(&callback_update("bogus")), None);
    }

    #[test]
    fn non_message_updates_are_dropped() {
        assert_eq!(decode_update(&json!({ "update_id": 1 })), None);
        // A message without text (e.g. a sticker) is dropped too.
        assert_eq!(
            decode_update(&json!({
                "update_id": 2,
                "message": {
                    "from": { "id": 7 },
                    "chat": { "id": 42 },
                }
            })),
            None
        );
    }

    #[test]
    fn stale_and_exhausted_map_to_toasts() {
        let stale = Error::Flow(FlowError::StaleEvent { got: 1, want: 2 });
        assert_eq!(failure_toast(&stale), Some("You already answered this question"));

        let exhausted = Error::Flow(FlowError::SequenceExhausted);
        assert_eq!(failure_toast(&exhausted), Some("This is the last question"));

        let other = Error::Flow(FlowError::InvalidEvent {
            index: 0,
            event: "toggle",
        });
        assert_eq!(failure_toast(&other), None);
    }
}
