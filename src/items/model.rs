//! Item model — immutable descriptors for the three questionnaire item
//! kinds, built once from raw definitions.
//!
//! Each variant knows how to render itself into a transport-neutral
//! `PromptRequest`; the traversal engine switches on the variant, never on
//! anything else.

use serde::Deserialize;

use crate::error::ConfigError;
use crate::flow::event::CallbackData;
use crate::flow::render::{Button, Keyboard, PromptRequest};
use crate::store::traits::PollState;

/// Label of the synthetic option that reroutes to a free-text follow-up.
pub const OTHER: &str = "Other";

/// Selected / unselected markers on multi-choice buttons.
const SELECTED_MARK: &str = "\u{1F7E2}"; // green circle
const UNSELECTED_MARK: &str = "\u{26AA}"; // white circle

/// Option buttons per keyboard row on a poll page.
const POLL_ROW_WIDTH: usize = 4;

/// Single-choice keyboards switch from labels to ordinals past this count.
const CHOICE_LABEL_LIMIT: usize = 5;

/// A raw item definition as loaded from the form export.
#[derive(Debug, Clone, Deserialize)]
pub struct RawItem {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
    #[serde(default)]
    pub help_text: String,
    #[serde(default)]
    pub choices: Vec<String>,
    #[serde(default)]
    pub has_other_option: bool,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub first_time_only: bool,
}

fn default_required() -> bool {
    true
}

/// The loaded form: an ordered list of raw item definitions.
#[derive(Debug, Clone, Deserialize)]
pub struct RawForm {
    pub items: Vec<RawItem>,
}

/// Fields shared by every item kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemMeta {
    /// Position in the pool, 0-based.
    pub index: usize,
    /// Stable identifier, doubles as the answer-map key and the
    /// callback-data namespace.
    pub name: String,
    /// When false, navigation may skip past without an answer.
    pub required: bool,
    /// Shown only to users who have never completed the flow.
    pub first_time_only: bool,
    /// True only for the final item; set by `Pool::build`.
    pub is_last: bool,
}

/// One selectable option of a choice item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChoiceOption {
    /// Callback key, `{item name}:{position}`.
    pub key: String,
    pub label: String,
    /// 1-based display number used in the message text and compact buttons.
    pub ordinal: usize,
}

/// A free-text question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeTextItem {
    pub meta: ItemMeta,
    pub text: String,
    pub help_text: String,
}

/// A single-choice prompt: one tap answers and advances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingleChoiceItem {
    pub meta: ItemMeta,
    pub text: String,
    pub help_text: String,
    pub options: Vec<ChoiceOption>,
}

/// A paginated multi-select poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiChoiceItem {
    pub meta: ItemMeta,
    pub text: String,
    pub help_text: String,
    pub options: Vec<ChoiceOption>,
    /// Page size for keyboard pagination.
    pub limit: usize,
}

/// One step in the questionnaire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    FreeText(FreeTextItem),
    SingleChoice(SingleChoiceItem),
    MultiChoice(MultiChoiceItem),
}

/// Page size rule: half the options per page, never zero.
pub fn page_size(option_count: usize) -> usize {
    (option_count / 2).max(1)
}

fn build_options(name: &str, choices: &[String], has_other: bool) -> Vec<ChoiceOption> {
    let mut options: Vec<ChoiceOption> = choices
        .iter()
        .enumerate()
        .map(|(i, label)| ChoiceOption {
            key: format!("{name}:{i}"),
            label: label.clone(),
            ordinal: i + 1,
        })
        .collect();
    if has_other {
        options.push(ChoiceOption {
            key: format!("{name}:{}", choices.len()),
            label: OTHER.to_string(),
            ordinal: choices.len() + 1,
        });
    }
    options
}

fn numbered_list(text: &str, help_text: &str, options: &[ChoiceOption]) -> String {
    let mut out = String::from(text);
    if !help_text.is_empty() {
        out.push('\n');
        out.push_str(help_text);
    }
    for opt in options {
        out.push_str(&format!("\n {}. {}", opt.ordinal, opt.label));
    }
    out
}

impl Item {
    /// Construct a typed item from a raw definition. `index` is its
    /// position in the pool; `is_last` is stamped later by `Pool::build`.
    pub fn from_raw(index: usize, raw: &RawItem) -> Result<Self, ConfigError> {
        match raw.kind.as_str() {
            "TEXT" | "PARAGRAPH_TEXT" => Ok(Self::FreeText(FreeTextItem {
                meta: ItemMeta {
                    index,
                    name: format!("QUESTION_{index}"),
                    required: raw.required,
                    first_time_only: raw.first_time_only,
                    is_last: false,
                },
                text: raw.value.clone(),
                help_text: raw.help_text.clone(),
            })),
            "MULTIPLE_CHOICE" => {
                if raw.choices.is_empty() {
                    return Err(ConfigError::EmptyChoices { index });
                }
                let name = format!("CHOICE_{index}");
                let options = build_options(&name, &raw.choices, raw.has_other_option);
                Ok(Self::SingleChoice(SingleChoiceItem {
                    meta: ItemMeta {
                        index,
                        name,
                        required: raw.required,
                        first_time_only: raw.first_time_only,
                        is_last: false,
                    },
                    text: raw.value.clone(),
                    help_text: raw.help_text.clone(),
                    options,
                }))
            }
            "CHECKBOX" => {
                if raw.choices.is_empty() {
                    return Err(ConfigError::EmptyChoices { index });
                }
                let name = format!("POLL_{index}");
                let options = build_options(&name, &raw.choices, raw.has_other_option);
                let help_text = if raw.help_text.is_empty() {
                    "Select one or more options".to_string()
                } else {
                    raw.help_text.clone()
                };
                let limit = page_size(options.len());
                Ok(Self::MultiChoice(MultiChoiceItem {
                    meta: ItemMeta {
                        index,
                        name,
                        required: raw.required,
                        first_time_only: raw.first_time_only,
                        is_last: false,
                    },
                    text: raw.value.clone(),
                    help_text,
                    options,
                    limit,
                }))
            }
            other => Err(ConfigError::UnknownItemKind {
                index,
                kind: other.to_string(),
            }),
        }
    }

    pub fn meta(&self) -> &ItemMeta {
        match self {
            Self::FreeText(i) => &i.meta,
            Self::SingleChoice(i) => &i.meta,
            Self::MultiChoice(i) => &i.meta,
        }
    }

    pub(crate) fn meta_mut(&mut self) -> &mut ItemMeta {
        match self {
            Self::FreeText(i) => &mut i.meta,
            Self::SingleChoice(i) => &mut i.meta,
            Self::MultiChoice(i) => &mut i.meta,
        }
    }

    pub fn name(&self) -> &str {
        &self.meta().name
    }

    pub fn index(&self) -> usize {
        self.meta().index
    }

    pub fn is_last(&self) -> bool {
        self.meta().is_last
    }

    /// Resolve an option callback key to its label, for choice items.
    pub fn option_label(&self, key: &str) -> Option<&str> {
        let options = match self {
            Self::FreeText(_) => return None,
            Self::SingleChoice(i) => &i.options,
            Self::MultiChoice(i) => &i.options,
        };
        options
            .iter()
            .find(|o| o.key == key)
            .map(|o| o.label.as_str())
    }

    /// Navigation row shown under the item's own controls: back when there
    /// is somewhere to go back to, skip when the item is not required.
    /// The last item carries no nav row — it hands off to the end keyboard.
    fn nav_row(&self) -> Vec<Button> {
        let meta = self.meta();
        if meta.is_last {
            return Vec::new();
        }
        let mut row = Vec::new();
        if meta.index > 0 {
            row.push(Button::new("\u{2B05} Back", CallbackData::Previous));
        }
        if !meta.required {
            row.push(Button::new("Skip \u{27A1}", CallbackData::Skip));
        }
        row
    }

    /// Render the prompt for this item. Multi-choice items render the page
    /// described by `poll`; other kinds ignore it.
    pub fn prompt_request(&self, poll: Option<&PollState>) -> PromptRequest {
        match self {
            Self::FreeText(item) => {
                let mut text = item.text.clone();
                if !item.help_text.is_empty() {
                    text.push('\n');
                    text.push_str(&item.help_text);
                }
                let mut keyboard = Keyboard::default();
                keyboard.push_row(self.nav_row());
                PromptRequest { text, keyboard }
            }
            Self::SingleChoice(item) => {
                let text = numbered_list(&item.text, &item.help_text, &item.options);
                let compact = item.options.len() > CHOICE_LABEL_LIMIT;
                let mut keyboard = Keyboard::default();
                let mut row: Vec<Button> = Vec::new();
                for opt in &item.options {
                    let label = if compact {
                        opt.ordinal.to_string()
                    } else {
                        opt.label.clone()
                    };
                    row.push(Button::new(
                        label,
                        CallbackData::Tap {
                            key: opt.key.clone(),
                        },
                    ));
                    if row.len() == CHOICE_LABEL_LIMIT {
                        keyboard.push_row(std::mem::take(&mut row));
                    }
                }
                keyboard.push_row(row);
                keyboard.push_row(self.nav_row());
                PromptRequest { text, keyboard }
            }
            Self::MultiChoice(item) => {
                let default_state = PollState::default();
                let poll = poll.unwrap_or(&default_state);
                PromptRequest {
                    text: numbered_list(&item.text, &item.help_text, &item.options),
                    keyboard: self.poll_keyboard(poll, true),
                }
            }
        }
    }

    /// Build the paged keyboard for a multi-choice item. `with_submit`
    /// is false when re-rendering after the submit tap (the original
    /// removed the submit row the same way).
    ///
    /// Panics on non-multi-choice items; the engine dispatches on the
    /// variant before calling.
    pub fn poll_keyboard(&self, poll: &PollState, with_submit: bool) -> Keyboard {
        let Self::MultiChoice(item) = self else {
            panic!("poll_keyboard on a non-poll item");
        };
        let mut keyboard = Keyboard::default();

        let end = (poll.offset + item.limit).min(item.options.len());
        let page = &item.options[poll.offset.min(item.options.len())..end];
        for chunk in page.chunks(POLL_ROW_WIDTH) {
            let row = chunk
                .iter()
                .map(|opt| {
                    let mark = if poll.selected(&opt.key) {
                        SELECTED_MARK
                    } else {
                        UNSELECTED_MARK
                    };
                    Button::new(
                        format!("{mark} {}", opt.ordinal),
                        CallbackData::Tap {
                            key: opt.key.clone(),
                        },
                    )
                })
                .collect();
            keyboard.push_row(row);
        }

        let mut nav = Vec::new();
        if poll.offset > 0 {
            nav.push(Button::new("\u{2039} Prev", CallbackData::PagePrev));
        }
        if poll.offset + item.limit < item.options.len() {
            nav.push(Button::new("Next \u{203A}", CallbackData::PageNext));
        }
        keyboard.push_row(nav);

        if with_submit {
            keyboard.push_row(vec![Button::new("Submit", CallbackData::Submit)]);
        }
        keyboard.push_row(self.nav_row());
        keyboard
    }
}
