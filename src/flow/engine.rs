//! Traversal engine — the questionnaire state machine.
//!
//! Consumes one inbound event for a (user, chat) pair, validates it against
//! the session anchor, mutates the collected answers, and drives the next
//! prompt through the `Prompter`. Transition arithmetic lives in pure
//! functions at the bottom of the file; everything stateful goes through
//! the `SessionStore`.

use std::sync::Arc;

use chrono::Utc;

use crate::error::{Error, FlowError, Result};
use crate::flow::event::{AnswerEvent, Event, PageDir};
use crate::flow::render::{PromptRequest, Prompter};
use crate::items::model::{Item, OTHER};
use crate::items::Pool;
use crate::sink::ResultsSink;
use crate::store::traits::{Answers, Cursor, KnownUsers, PollState, SessionKey, SessionStore};

/// Answer-map key for the session start timestamp; always the first value
/// of the finished row.
pub const DATETIME_KEY: &str = "datetime";

/// Timestamp format used in the results row.
const DATETIME_FORMAT: &str = "%Y.%m.%d %H:%M:%S";

/// What the engine did with an event. The side effects have already been
/// dispatched; the transport only needs this to acknowledge the tap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A new prompt message was sent.
    Prompted,
    /// The current prompt's keyboard was edited in place.
    Edited,
    /// The free-text follow-up for OTHER was requested.
    AskedOther,
    /// The session was finalized and cleared.
    Completed,
    /// Nothing changed; show this text to the user.
    Notice(&'static str),
}

/// The traversal engine. Holds the immutable pool and the collaborator
/// seams; one instance serves every session.
pub struct FlowEngine {
    pool: Arc<Pool>,
    store: Arc<dyn SessionStore>,
    users: Arc<dyn KnownUsers>,
    prompter: Arc<dyn Prompter>,
    sink: Arc<dyn ResultsSink>,
    incremental: bool,
}

impl FlowEngine {
    pub fn new(
        pool: Arc<Pool>,
        store: Arc<dyn SessionStore>,
        users: Arc<dyn KnownUsers>,
        prompter: Arc<dyn Prompter>,
        sink: Arc<dyn ResultsSink>,
        incremental: bool,
    ) -> Self {
        Self {
            pool,
            store,
            users,
            prompter,
            sink,
            incremental,
        }
    }

    /// Apply one inbound event.
    ///
    /// An event arriving for a session with no stored position (expired or
    /// never started) silently restarts the flow, except `End`, which is a
    /// no-op then — finalize must stay idempotent.
    pub async fn handle(&self, key: SessionKey, event: Event) -> Result<Outcome> {
        match event {
            Event::Start => self.start(key).await,
            Event::End { prompt } => self.finalize(key, prompt).await,
            other => {
                let Some(cursor) = self.store.cursor(key).await? else {
                    tracing::debug!(user = key.user, "No session for event, restarting");
                    return self.start(key).await;
                };
                match other {
                    Event::Answer(answer) => self.answer(key, cursor, answer).await,
                    Event::Toggle { prompt, key: opt } => {
                        self.toggle(key, cursor, prompt, &opt).await
                    }
                    Event::PageNav { prompt, dir } => {
                        self.page_nav(key, cursor, prompt, dir).await
                    }
                    Event::Submit { prompt } => self.submit(key, cursor, prompt).await,
                    Event::Previous { prompt } => self.previous(key, cursor, prompt).await,
                    Event::Skip { prompt } => self.skip(key, cursor, prompt).await,
                    Event::Start | Event::End { .. } => unreachable!("handled above"),
                }
            }
        }
    }

    // ── Transitions ─────────────────────────────────────────────────

    /// Start the flow: clear any previous session, stamp the start
    /// timestamp, prompt the first (non-skippable) item.
    async fn start(&self, key: SessionKey) -> Result<Outcome> {
        self.store.clear(key).await?;

        let datetime = Utc::now().format(DATETIME_FORMAT).to_string();
        let mut answers = Answers::new();
        answers.insert(DATETIME_KEY.to_string(), vec![datetime.clone()]);
        self.store.set_answers(key, &answers).await?;

        if self.incremental {
            match self
                .sink
                .open_row(&[key.user.to_string(), datetime])
                .await
            {
                Ok(row) => self.store.set_row(key, row).await?,
                Err(e) => {
                    tracing::warn!(user = key.user, "Could not open results row: {e}");
                }
            }
        }

        let known = self.users.exists(key.user).await?;
        let position = first_position(&self.pool, known);
        self.prompt_item(key, position).await
    }

    /// Record an answer for the current item, then advance.
    async fn answer(
        &self,
        key: SessionKey,
        cursor: Cursor,
        answer: AnswerEvent,
    ) -> Result<Outcome> {
        let item = self.current_item(&cursor);
        let mut answers = self.store.answers(key).await?;

        match answer {
            // Free text carries no prompt identity; it always addresses the
            // current item (this is also the OTHER follow-up path).
            AnswerEvent::Text { value } => {
                answers
                    .entry(item.name().to_string())
                    .or_default()
                    .push(value);
            }
            AnswerEvent::Choice { prompt, key: opt } => {
                check_anchor(&cursor, prompt)?;
                let label = item.option_label(&opt).ok_or(FlowError::InvalidEvent {
                    index: cursor.position,
                    event: "choice",
                })?;
                if label == OTHER {
                    return self.ask_other(key).await;
                }
                // A single choice replaces any previous pick.
                answers.insert(item.name().to_string(), vec![label.to_string()]);
            }
        }

        self.store.set_answers(key, &answers).await?;
        self.mirror_cell(key, item, &answers).await?;
        self.advance_after_answer(key, cursor).await
    }

    /// Flip one multi-choice option and mirror it into the answers.
    async fn toggle(
        &self,
        key: SessionKey,
        cursor: Cursor,
        prompt: i64,
        opt: &str,
    ) -> Result<Outcome> {
        check_anchor(&cursor, prompt)?;
        let item = self.current_item(&cursor);
        if !matches!(item, Item::MultiChoice(_)) {
            return Err(FlowError::InvalidEvent {
                index: cursor.position,
                event: "toggle",
            }
            .into());
        }
        let label = item.option_label(opt).ok_or(FlowError::InvalidEvent {
            index: cursor.position,
            event: "toggle",
        })?;

        // OTHER reroutes to the free-text follow-up; selection state is
        // left untouched.
        if label == OTHER {
            return self.ask_other(key).await;
        }

        let mut poll = self
            .store
            .poll_state(key, cursor.position)
            .await?
            .unwrap_or_default();
        let selected = !poll.selected(opt);
        poll.options.insert(opt.to_string(), selected);
        self.store.set_poll_state(key, cursor.position, &poll).await?;

        let mut answers = self.store.answers(key).await?;
        let values = answers.entry(item.name().to_string()).or_default();
        if selected {
            if !values.iter().any(|v| v == label) {
                values.push(label.to_string());
            }
        } else {
            values.retain(|v| v != label);
        }
        self.store.set_answers(key, &answers).await?;
        self.mirror_cell(key, item, &answers).await?;

        self.prompter
            .edit_keyboard(key.chat, cursor.anchor, &item.poll_keyboard(&poll, true))
            .await?;
        Ok(Outcome::Edited)
    }

    /// Move the poll window one page and re-render in place.
    async fn page_nav(
        &self,
        key: SessionKey,
        cursor: Cursor,
        prompt: i64,
        dir: PageDir,
    ) -> Result<Outcome> {
        check_anchor(&cursor, prompt)?;
        let item = self.current_item(&cursor);
        let Item::MultiChoice(poll_item) = item else {
            return Err(FlowError::InvalidEvent {
                index: cursor.position,
                event: "page_nav",
            }
            .into());
        };

        let mut poll = self
            .store
            .poll_state(key, cursor.position)
            .await?
            .unwrap_or_default();
        poll.offset = next_offset(poll.offset, poll_item.limit, poll_item.options.len(), dir);
        self.store.set_poll_state(key, cursor.position, &poll).await?;

        self.prompter
            .edit_keyboard(key.chat, cursor.anchor, &item.poll_keyboard(&poll, true))
            .await?;
        Ok(Outcome::Edited)
    }

    /// Confirm a multi-choice item and advance.
    async fn submit(&self, key: SessionKey, cursor: Cursor, prompt: i64) -> Result<Outcome> {
        check_anchor(&cursor, prompt)?;
        let item = self.current_item(&cursor);
        if !matches!(item, Item::MultiChoice(_)) {
            return Err(FlowError::InvalidEvent {
                index: cursor.position,
                event: "submit",
            }
            .into());
        }

        let answers = self.store.answers(key).await?;
        if answers
            .get(item.name())
            .is_some_and(|values| values.iter().any(|v| v == OTHER))
        {
            return self.ask_other(key).await;
        }

        // Retire the submit button on the confirmed prompt.
        let poll = self
            .store
            .poll_state(key, cursor.position)
            .await?
            .unwrap_or_default();
        self.prompter
            .edit_keyboard(key.chat, cursor.anchor, &item.poll_keyboard(&poll, false))
            .await?;

        self.mirror_cell(key, item, &answers).await?;
        self.advance_after_answer(key, cursor).await
    }

    /// Step back to the previous item without recording an answer.
    async fn previous(&self, key: SessionKey, cursor: Cursor, prompt: i64) -> Result<Outcome> {
        check_anchor(&cursor, prompt)?;
        let known = self.users.exists(key.user).await?;
        match retreat(&self.pool, cursor.position, known) {
            Some(position) => self.prompt_item(key, position).await,
            None => Ok(Outcome::Notice("This is the first question")),
        }
    }

    /// Skip a non-required item without answering it.
    async fn skip(&self, key: SessionKey, cursor: Cursor, prompt: i64) -> Result<Outcome> {
        check_anchor(&cursor, prompt)?;
        let item = self.current_item(&cursor);
        if item.meta().required {
            return Err(FlowError::InvalidEvent {
                index: cursor.position,
                event: "skip",
            }
            .into());
        }
        if cursor.position == self.pool.end() {
            return Err(FlowError::SequenceExhausted.into());
        }
        let known = self.users.exists(key.user).await?;
        let position = advance(&self.pool, cursor.position, known)
            .ok_or(FlowError::SequenceExhausted)?;
        self.prompt_item(key, position).await
    }

    /// Finalize: deliver the answer row, mark the user known, clean up the
    /// chat, delete the session. No-op when the session is already gone.
    async fn finalize(&self, key: SessionKey, prompt: i64) -> Result<Outcome> {
        let Some(cursor) = self.store.cursor(key).await? else {
            tracing::debug!(user = key.user, "Finalize on a cleared session, ignoring");
            return Ok(Outcome::Completed);
        };
        check_anchor(&cursor, prompt)?;

        let answers = self.store.answers(key).await?;
        let row_values = flatten_row(&self.pool, &answers);

        // Deliver before deleting anything: a sink failure must leave the
        // session intact so the row can be retried.
        match self.store.row(key).await? {
            Some(row) => {
                for item in self.pool.iter() {
                    let values = answers.get(item.name()).cloned().unwrap_or_default();
                    self.sink.write_cell(row, item.index(), &values).await?;
                }
            }
            None => self.sink.append_row(&row_values).await?,
        }

        self.users.mark_known(key.user).await?;
        let history = self.store.drain_messages(key).await?;
        self.store.clear(key).await?;

        if let Err(e) = self.prompter.delete_messages(key.chat, &history).await {
            tracing::warn!(chat = key.chat, "Session cleanup incomplete: {e}");
        }
        self.prompter
            .send_prompt(key.chat, &PromptRequest::restart_offer())
            .await?;

        tracing::info!(user = key.user, items = row_values.len(), "Session finalized");
        Ok(Outcome::Completed)
    }

    // ── Shared steps ────────────────────────────────────────────────

    fn current_item(&self, cursor: &Cursor) -> &Item {
        self.pool
            .get(cursor.position)
            .expect("cursor position always points into the pool")
    }

    /// After a recorded answer: hand off to the end keyboard when the item
    /// was the last one, otherwise prompt the next item.
    async fn advance_after_answer(&self, key: SessionKey, cursor: Cursor) -> Result<Outcome> {
        if cursor.position == self.pool.end() {
            let message_id = self
                .prompter
                .send_prompt(key.chat, &PromptRequest::end_keyboard())
                .await?;
            self.store.push_message(key, message_id).await?;
            self.store
                .set_cursor(
                    key,
                    Cursor {
                        position: cursor.position,
                        anchor: message_id,
                    },
                )
                .await?;
            return Ok(Outcome::Prompted);
        }

        let known = self.users.exists(key.user).await?;
        let position = advance(&self.pool, cursor.position, known)
            .ok_or(FlowError::SequenceExhausted)?;
        self.prompt_item(key, position).await
    }

    /// Render the item at `position` as a fresh prompt and re-anchor the
    /// session to it.
    async fn prompt_item(&self, key: SessionKey, position: usize) -> Result<Outcome> {
        let item = self
            .pool
            .get(position)
            .expect("resolved positions stay inside the pool");

        let prompt = if let Item::MultiChoice(_) = item {
            // A fresh render starts the poll on page one, nothing selected.
            let poll = PollState::default();
            self.store.set_poll_state(key, position, &poll).await?;
            item.prompt_request(Some(&poll))
        } else {
            item.prompt_request(None)
        };

        let message_id = self.prompter.send_prompt(key.chat, &prompt).await?;
        self.store.push_message(key, message_id).await?;
        self.store
            .set_cursor(
                key,
                Cursor {
                    position,
                    anchor: message_id,
                },
            )
            .await?;
        Ok(Outcome::Prompted)
    }

    /// Request the free-form follow-up for the OTHER option. The anchor is
    /// left on the originating prompt; the next text message answers the
    /// current item.
    async fn ask_other(&self, key: SessionKey) -> Result<Outcome> {
        let message_id = self
            .prompter
            .send_prompt(key.chat, &PromptRequest::ask_other())
            .await?;
        self.store.push_message(key, message_id).await?;
        Ok(Outcome::AskedOther)
    }

    /// Best-effort incremental cell write; failures never disturb the flow.
    async fn mirror_cell(&self, key: SessionKey, item: &Item, answers: &Answers) -> Result<()> {
        if !self.incremental {
            return Ok(());
        }
        let Some(row) = self.store.row(key).await? else {
            return Ok(());
        };
        let values = answers.get(item.name()).cloned().unwrap_or_default();
        if let Err(e) = self.sink.write_cell(row, item.index(), &values).await {
            tracing::warn!(user = key.user, item = item.name(), "Cell mirror failed: {e}");
        }
        Ok(())
    }
}

// ── Pure transition arithmetic ──────────────────────────────────────

/// Reject events that reference a prompt other than the current anchor.
fn check_anchor(cursor: &Cursor, prompt: i64) -> std::result::Result<(), Error> {
    if prompt != cursor.anchor {
        return Err(FlowError::StaleEvent {
            got: prompt,
            want: cursor.anchor,
        }
        .into());
    }
    Ok(())
}

/// First item to present: index 0, or past any leading first-time-only
/// items for a returning user. Never past the end.
pub(crate) fn first_position(pool: &Pool, user_known: bool) -> usize {
    let mut position = Pool::START;
    while user_known
        && position < pool.end()
        && pool
            .get(position)
            .is_some_and(|i| i.meta().first_time_only)
    {
        position += 1;
    }
    position
}

/// One step forward, skipping first-time-only items for returning users.
/// `None` when already at the end. The end item is a valid stop even when
/// flagged.
pub(crate) fn advance(pool: &Pool, from: usize, user_known: bool) -> Option<usize> {
    if from >= pool.end() {
        return None;
    }
    let mut position = from + 1;
    while user_known
        && position < pool.end()
        && pool
            .get(position)
            .is_some_and(|i| i.meta().first_time_only)
    {
        position += 1;
    }
    Some(position)
}

/// One step backward, mirror of `advance`. The first item is a valid stop
/// even when flagged.
pub(crate) fn retreat(pool: &Pool, from: usize, user_known: bool) -> Option<usize> {
    if from == Pool::START {
        return None;
    }
    let mut position = from - 1;
    while user_known
        && position > Pool::START
        && pool
            .get(position)
            .is_some_and(|i| i.meta().first_time_only)
    {
        position -= 1;
    }
    Some(position)
}

/// Clamped page offset: moves in exact multiples of `limit`, never below
/// zero, never at or past `count` — a page always shows at least one
/// option.
pub(crate) fn next_offset(offset: usize, limit: usize, count: usize, dir: PageDir) -> usize {
    match dir {
        PageDir::Next => {
            if offset + limit < count {
                offset + limit
            } else {
                offset
            }
        }
        PageDir::Prev => offset.saturating_sub(limit),
    }
}

/// Flatten the answer map into the ordered results row: the start
/// timestamp first, then one delimited cell per item in pool order, empty
/// for unanswered items.
pub(crate) fn flatten_row(pool: &Pool, answers: &Answers) -> Vec<String> {
    let mut row = Vec::with_capacity(pool.len() + 1);
    row.push(
        answers
            .get(DATETIME_KEY)
            .map(|v| v.join(", "))
            .unwrap_or_default(),
    );
    for item in pool.iter() {
        row.push(
            answers
                .get(item.name())
                .map(|v| v.join(", "))
                .unwrap_or_default(),
        );
    }
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::items::model::RawItem;

    fn raw(kind: &str, first_time_only: bool) -> RawItem {
        RawItem {
            kind: kind.to_string(),
            value: "q".to_string(),
            help_text: String::new(),
            choices: if kind == "TEXT" {
                Vec::new()
            } else {
                vec!["a".to_string(), "b".to_string()]
            },
            has_other_option: false,
            required: true,
            first_time_only,
        }
    }

    /// TEXT, TEXT(first-time-only), CHECKBOX, TEXT(first-time-only, last)
    fn pool_with_flags() -> Pool {
        Pool::build(&[
            raw("TEXT", false),
            raw("TEXT", true),
            raw("CHECKBOX", false),
            raw("TEXT", true),
        ])
        .unwrap()
    }

    #[test]
    fn advance_skips_flagged_items_for_known_users() {
        let pool = pool_with_flags();
        assert_eq!(advance(&pool, 0, true), Some(2));
        assert_eq!(advance(&pool, 0, false), Some(1));
    }

    #[test]
    fn advance_stops_at_flagged_boundary() {
        let pool = pool_with_flags();
        // Item 3 is flagged but is the end boundary — still a valid stop.
        assert_eq!(advance(&pool, 2, true), Some(3));
        assert_eq!(advance(&pool, 3, true), None);
        assert_eq!(advance(&pool, 3, false), None);
    }

    #[test]
    fn retreat_mirrors_advance() {
        let pool = pool_with_flags();
        assert_eq!(retreat(&pool, 2, true), Some(0));
        assert_eq!(retreat(&pool, 2, false), Some(1));
        assert_eq!(retreat(&pool, 0, true), None);
    }

    #[test]
    fn retreat_stops_at_flagged_first_item() {
        let pool = Pool::build(&[raw("TEXT", true), raw("TEXT", false), raw("TEXT", false)])
            .unwrap();
        // Item 0 is flagged but is the start boundary — still a valid stop.
        assert_eq!(retreat(&pool, 1, true), Some(0));
    }

    #[test]
    fn first_position_skips_leading_flagged_items() {
        let pool = Pool::build(&[raw("TEXT", true), raw("TEXT", true), raw("TEXT", false)])
            .unwrap();
        assert_eq!(first_position(&pool, false), 0);
        assert_eq!(first_position(&pool, true), 2);
    }

    #[test]
    fn first_position_never_passes_the_end() {
        let pool = Pool::build(&[raw("TEXT", true), raw("TEXT", true)]).unwrap();
        assert_eq!(first_position(&pool, true), 1);
    }

    #[test]
    fn offsets_step_by_limit_and_clamp() {
        // 5 options, pages of 2: 0 → 2 → 4, then stuck at 4.
        let mut offset = 0;
        for expected in [2, 4, 4] {
            offset = next_offset(offset, 2, 5, PageDir::Next);
            assert_eq!(offset, expected);
        }
        for expected in [2, 0, 0] {
            offset = next_offset(offset, 2, 5, PageDir::Prev);
            assert_eq!(offset, expected);
        }
    }

    #[test]
    fn offset_stays_put_when_one_page_fits_all() {
        assert_eq!(next_offset(0, 4, 3, PageDir::Next), 0);
        assert_eq!(next_offset(0, 4, 3, PageDir::Prev), 0);
    }

    #[test]
    fn flatten_row_orders_by_pool_and_fills_gaps() {
        let pool = Pool::build(&[raw("TEXT", false), raw("CHECKBOX", false), raw("TEXT", false)])
            .unwrap();
        let mut answers = Answers::new();
        answers.insert(DATETIME_KEY.to_string(), vec!["2026.08.07 10:00:00".into()]);
        answers.insert("QUESTION_0".to_string(), vec!["hello".into()]);
        answers.insert("POLL_1".to_string(), vec!["a".into(), "b".into()]);

        assert_eq!(
            flatten_row(&pool, &answers),
            vec![
                "2026.08.07 10:00:00".to_string(),
                "hello".to_string(),
                "a, b".to_string(),
                String::new(),
            ]
        );
    }
}
