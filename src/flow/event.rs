//! Inbound events and the callback-data wire codec.
//!
//! Every interaction — a typed message or an inline-keyboard tap — is
//! normalized into one `Event` before it reaches the traversal engine, so
//! the state machine stays testable without a live transport.

use std::sync::LazyLock;

use regex::Regex;

/// Direction of a poll page-navigation tap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageDir {
    Next,
    Prev,
}

/// An inbound event for one (user, chat) pair.
///
/// Callback-born events carry `prompt` — the message id of the keyboard the
/// tap landed on — which the engine checks against the session anchor.
/// Free-text messages carry no prompt identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Start (or restart) the questionnaire.
    Start,
    /// An answer: free text or a single-choice tap.
    Answer(AnswerEvent),
    /// A multi-choice option tap.
    Toggle { prompt: i64, key: String },
    /// Poll page navigation.
    PageNav { prompt: i64, dir: PageDir },
    /// Multi-choice confirmation.
    Submit { prompt: i64 },
    /// Step back to the previous item.
    Previous { prompt: i64 },
    /// Skip a non-required item without answering.
    Skip { prompt: i64 },
    /// Finish the questionnaire (end-keyboard tap).
    End { prompt: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerEvent {
    Text { value: String },
    Choice { prompt: i64, key: String },
}

/// Decoded inline-keyboard callback payload.
///
/// Option keys are namespaced by the owning item's name (`POLL_3:1`,
/// `CHOICE_2:0`), so the item kind is recoverable from the prefix alone —
/// the original bound separate regex filters per kind the same way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackData {
    Start,
    Previous,
    Skip,
    Submit,
    Finish,
    PageNext,
    PagePrev,
    /// A tap on a choice option, multi-select (`POLL_*`) or single (`CHOICE_*`).
    Tap { key: String },
}

static OPTION_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(POLL|CHOICE)_\d+:\d+$").expect("valid option key pattern"));

impl CallbackData {
    pub fn encode(&self) -> String {
        match self {
            Self::Start => "start".to_string(),
            Self::Previous => "previous".to_string(),
            Self::Skip => "skip".to_string(),
            Self::Submit => "submit".to_string(),
            Self::Finish => "finish".to_string(),
            Self::PageNext => "page:next".to_string(),
            Self::PagePrev => "page:prev".to_string(),
            Self::Tap { key } => key.clone(),
        }
    }

    /// Decode a raw callback string. Unknown payloads return `None` and are
    /// dropped by the transport.
    pub fn decode(data: &str) -> Option<Self> {
        match data {
            "start" => Some(Self::Start),
            "previous" => Some(Self::Previous),
            "skip" => Some(Self::Skip),
            "submit" => Some(Self::Submit),
            "finish" => Some(Self::Finish),
            "page:next" => Some(Self::PageNext),
            "page:prev" => Some(Self::PagePrev),
            other if OPTION_KEY.is_match(other) => Some(Self::Tap {
                key: other.to_string(),
            }),
            _ => None,
        }
    }

    /// Lift a decoded callback into an `Event`, given the message id of the
    /// keyboard it came from.
    pub fn into_event(self, prompt: i64) -> Event {
        match self {
            Self::Start => Event::Start,
            Self::Previous => Event::Previous { prompt },
            Self::Skip => Event::Skip { prompt },
            Self::Submit => Event::Submit { prompt },
            Self::Finish => Event::End { prompt },
            Self::PageNext => Event::PageNav {
                prompt,
                dir: PageDir::Next,
            },
            Self::PagePrev => Event::PageNav {
                prompt,
                dir: PageDir::Prev,
            },
            Self::Tap { key } => {
                if key.starts_with("CHOICE_") {
                    Event::Answer(AnswerEvent::Choice { prompt, key })
                } else {
                    Event::Toggle { prompt, key }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_fixed_payloads() {
        let payloads = [
            CallbackData::Start,
            CallbackData::Previous,
            CallbackData::Skip,
            CallbackData::Submit,
            CallbackData::Finish,
            CallbackData::PageNext,
            CallbackData::PagePrev,
        ];
        for p in payloads {
            let decoded = CallbackData::decode(&p.encode()).unwrap();
            assert_eq!(decoded, p);
        }
    }

    #[test]
    fn option_keys_decode_as_taps() {
        assert_eq!(
            CallbackData::decode("POLL_3:12"),
            Some(CallbackData::Tap {
                key: "POLL_3:12".into()
            })
        );
        assert_eq!(
            CallbackData::decode("CHOICE_0:0"),
            Some(CallbackData::Tap {
                key: "CHOICE_0:0".into()
            })
        );
    }

    #[test]
    fn unknown_payloads_are_dropped() {
        assert_eq!(CallbackData::decode(""), None);
        assert_eq!(CallbackData::decode("QUESTION_1:2"), None);
        assert_eq!(CallbackData::decode("POLL_1"), None);
        assert_eq!(CallbackData::decode("POLL_x:1"), None);
        assert_eq!(CallbackData::decode("page:up"), None);
    }

    #[test]
    fn tap_prefix_selects_event_kind() {
        let toggle = CallbackData::Tap {
            key: "POLL_1:0".into(),
        }
        .into_event(42);
        assert!(matches!(toggle, Event::Toggle { prompt: 42, .. }));

        let choice = CallbackData::Tap {
            key: "CHOICE_1:0".into(),
        }
        .into_event(42);
        assert!(matches!(
            choice,
            Event::Answer(AnswerEvent::Choice { prompt: 42, .. })
        ));
    }
}
