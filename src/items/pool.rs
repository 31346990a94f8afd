//! The pool — the ordered, immutable item sequence for one questionnaire.

use crate::error::ConfigError;
use crate::items::model::{Item, RawItem};

/// Ordered, 0-indexed, gap-free sequence of items. Built once at startup
/// and passed by reference into the traversal engine; read-only thereafter.
#[derive(Debug, Clone)]
pub struct Pool {
    items: Vec<Item>,
}

impl Pool {
    /// First item index.
    pub const START: usize = 0;

    /// Build the pool from raw definitions, assigning sequential indices
    /// and marking the final element.
    pub fn build(raw_items: &[RawItem]) -> Result<Self, ConfigError> {
        if raw_items.is_empty() {
            return Err(ConfigError::EmptyForm);
        }
        let mut items = raw_items
            .iter()
            .enumerate()
            .map(|(index, raw)| Item::from_raw(index, raw))
            .collect::<Result<Vec<_>, _>>()?;
        items
            .last_mut()
            .expect("non-empty checked above")
            .meta_mut()
            .is_last = true;
        Ok(Self { items })
    }

    pub fn get(&self, index: usize) -> Option<&Item> {
        self.items.get(index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Index of the final item.
    pub fn end(&self) -> usize {
        self.items.len() - 1
    }

    pub fn iter(&self) -> impl Iterator<Item = &Item> {
        self.items.iter()
    }
}
