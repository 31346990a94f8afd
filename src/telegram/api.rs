//! Telegram Bot API client — thin reqwest wrapper over the methods the
//! bot needs, plus the `Prompter` implementation the engine renders
//! through.

use async_trait::async_trait;
use futures::future::join_all;
use secrecy::{ExposeSecret, SecretString};

use crate::error::ChannelError;
use crate::flow::render::{Keyboard, PromptRequest, Prompter};

/// Telegram Bot API client.
pub struct TelegramApi {
    bot_token: SecretString,
    client: reqwest::Client,
}

impl TelegramApi {
    pub fn new(bot_token: SecretString) -> Self {
        Self {
            bot_token,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "https://api.telegram.org/bot{}/{method}",
            self.bot_token.expose_secret()
        )
    }

    /// POST one API method and return its `result` payload.
    async fn call(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, ChannelError> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                reason: format!("{method} returned {status}: {text}"),
            });
        }

        let mut data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ChannelError::InvalidResponse(e.to_string()))?;
        if !data.get("ok").and_then(serde_json::Value::as_bool).unwrap_or(false) {
            return Err(ChannelError::InvalidResponse(format!(
                "{method} not ok: {data}"
            )));
        }
        Ok(data.get_mut("result").map(serde_json::Value::take).unwrap_or_default())
    }

    /// Send a message, optionally with an inline keyboard. Returns the new
    /// message id.
    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<i64, ChannelError> {
        let mut body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });
        if let Some(kb) = keyboard.filter(|kb| !kb.is_empty()) {
            body["reply_markup"] = reply_markup(kb);
        }
        let result = self.call("sendMessage", body).await?;
        result
            .get("message_id")
            .and_then(serde_json::Value::as_i64)
            .ok_or_else(|| ChannelError::InvalidResponse("sendMessage without message_id".into()))
    }

    /// Replace a message's inline keyboard in place.
    pub async fn edit_reply_markup(
        &self,
        chat_id: i64,
        message_id: i64,
        keyboard: &Keyboard,
    ) -> Result<(), ChannelError> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "reply_markup": reply_markup(keyboard),
        });
        self.call("editMessageReplyMarkup", body)
            .await
            .map_err(|e| ChannelError::EditFailed {
                message_id,
                reason: e.to_string(),
            })?;
        Ok(())
    }

    pub async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), ChannelError> {
        self.call(
            "deleteMessage",
            serde_json::json!({ "chat_id": chat_id, "message_id": message_id }),
        )
        .await?;
        Ok(())
    }

    /// Acknowledge a callback tap, optionally with a toast.
    pub async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
    ) -> Result<(), ChannelError> {
        let mut body = serde_json::json!({ "callback_query_id": callback_id });
        if let Some(text) = text {
            body["text"] = serde_json::Value::String(text.to_string());
        }
        self.call("answerCallbackQuery", body).await?;
        Ok(())
    }

    /// Long-poll for updates past `offset`.
    pub async fn get_updates(
        &self,
        offset: i64,
        timeout_secs: u64,
    ) -> Result<Vec<serde_json::Value>, ChannelError> {
        let body = serde_json::json!({
            "offset": offset,
            "timeout": timeout_secs,
            "allowed_updates": ["message", "callback_query"],
        });
        let result = self.call("getUpdates", body).await?;
        match result {
            serde_json::Value::Array(updates) => Ok(updates),
            other => Err(ChannelError::InvalidResponse(format!(
                "getUpdates result is not an array: {other}"
            ))),
        }
    }
}

/// Render a transport-neutral keyboard as Telegram inline-keyboard markup.
pub fn reply_markup(keyboard: &Keyboard) -> serde_json::Value {
    let rows: Vec<serde_json::Value> = keyboard
        .0
        .iter()
        .map(|row| {
            row.iter()
                .map(|b| serde_json::json!({ "text": b.label, "callback_data": b.data }))
                .collect()
        })
        .collect();
    serde_json::json!({ "inline_keyboard": rows })
}

// ── Prompter implementation ─────────────────────────────────────────

#[async_trait]
impl Prompter for TelegramApi {
    async fn send_prompt(&self, chat: i64, prompt: &PromptRequest) -> Result<i64, ChannelError> {
        self.send_message(chat, &prompt.text, Some(&prompt.keyboard))
            .await
    }

    async fn edit_keyboard(
        &self,
        chat: i64,
        message_id: i64,
        keyboard: &Keyboard,
    ) -> Result<(), ChannelError> {
        self.edit_reply_markup(chat, message_id, keyboard).await
    }

    async fn delete_messages(&self, chat: i64, message_ids: &[i64]) -> Result<(), ChannelError> {
        // Deletions are independent; failures are tolerated, old messages
        // may already be gone.
        let deletions = message_ids.iter().map(|&id| self.delete_message(chat, id));
        for (message_id, result) in message_ids.iter().zip(join_all(deletions).await) {
            if let Err(e) = result {
                tracing::debug!(chat, message_id, "Could not delete message: {e}");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::event::CallbackData;
    use crate::flow::render::Button;

    #[test]
    fn api_url_embeds_token_and_method() {
        let api = TelegramApi::new(SecretString::from("123:ABC"));
        assert_eq!(
            api.api_url("getMe"),
            "https://api.telegram.org/bot123:ABC/getMe"
        );
    }

    #[test]
    fn reply_markup_preserves_rows() {
        let kb = Keyboard(vec![
            vec![
                Button::new("a", CallbackData::Tap { key: "POLL_0:0".into() }),
                Button::new("b", CallbackData::Tap { key: "POLL_0:1".into() }),
            ],
            vec![Button::new("Submit", CallbackData::Submit)],
        ]);
        let markup = reply_markup(&kb);
        let rows = markup["inline_keyboard"].as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][1]["text"], "b");
        assert_eq!(rows[0][1]["callback_data"], "POLL_0:1");
        assert_eq!(rows[1][0]["callback_data"], "submit");
    }

    #[tokio::test]
    async fn send_message_without_server_is_an_error() {
        let api = TelegramApi::new(SecretString::from("fake-token"));
        let result = api.send_message(1, "hello", None).await;
        assert!(result.is_err());
    }
}
