use serde::Serialize;

use crate::Result;
use crate::storage::RemoteObject;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Choice {
    pub id: String,
    pub label: String,
}

/// Picks backups on behalf of the operator. `Ok(None)` means cancelled.
pub trait Selection {
    fn choose_one(&self, title: &str, choices: &[Choice]) -> Result<Option<String>>;

    fn choose_many(&self, title: &str, choices: &[Choice]) -> Result<Option<Vec<String>>>;
}

/// Answers every prompt with ids fixed up front.
#[derive(Debug, Clone, Default)]
pub struct PresetSelection {
    ids: Option<Vec<String>>,
}

impl PresetSelection {
    pub fn new(ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            ids: Some(ids.into_iter().map(Into::into).collect()),
        }
    }

    pub fn cancelled() -> Self {
        Self { ids: None }
    }
}

impl Selection for PresetSelection {
    fn choose_one(&self, _title: &str, _choices: &[Choice]) -> Result<Option<String>> {
        Ok(self.ids.as_ref().and_then(|ids| ids.first().cloned()))
    }

    fn choose_many(&self, _title: &str, _choices: &[Choice]) -> Result<Option<Vec<String>>> {
        Ok(self.ids.clone())
    }
}

/// Keeps objects whose label contains `marker`, in input order.
pub fn filter_family(objects: Vec<RemoteObject>, marker: &str) -> Vec<RemoteObject> {
    objects
        .into_iter()
        .filter(|o| o.label.contains(marker))
        .collect()
}

pub fn to_choices(entries: &[RemoteObject]) -> Vec<Choice> {
    entries
        .iter()
        .map(|e| Choice {
            id: e.id.clone(),
            label: e.label.clone(),
        })
        .collect()
}
