use std::cmp::Reverse;

use serde::{Deserialize, Serialize};

use crate::storage::RemoteObject;
use crate::{Error, Result};

/// How "first" is decided before keeping the head of the list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListOrder {
    /// Newest first by the timestamp in the payload filename. Entries without
    /// one go last, in store order.
    #[default]
    NewestFirst,
    /// Trust the order `list()` returned.
    Store,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub keep_last: usize,
    pub order: ListOrder,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            keep_last: 1,
            order: ListOrder::NewestFirst,
        }
    }
}

impl RetentionPolicy {
    /// Keep exactly the first entry the store lists.
    pub fn keep_first() -> Self {
        Self {
            keep_last: 1,
            order: ListOrder::Store,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.keep_last < 1 {
            return Err(Error::config("retention.keep_last must be >= 1"));
        }
        Ok(())
    }

    /// Splits family entries into `(survivors, prune)`. At least one entry
    /// always survives when the input is non-empty.
    pub fn partition(
        &self,
        mut entries: Vec<RemoteObject>,
    ) -> (Vec<RemoteObject>, Vec<RemoteObject>) {
        if self.order == ListOrder::NewestFirst {
            entries.sort_by_key(|e| Reverse(e.created_at()));
        }
        let keep = self.keep_last.max(1).min(entries.len());
        let prune = entries.split_off(keep);
        (entries, prune)
    }

    pub fn prune(&self, entries: Vec<RemoteObject>) -> Vec<RemoteObject> {
        self.partition(entries).1
    }
}
