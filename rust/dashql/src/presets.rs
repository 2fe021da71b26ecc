//! Export column selection and the named/recent presets remembered per source table.

use crate::{
    error::{DashboardError, Result},
    store::{get_json, set_json, KeyValueStore},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

const PRESET_KEY_PREFIX: &str = "export_presets:";

pub fn preset_key(source_table: &str) -> String {
    format!("{PRESET_KEY_PREFIX}{source_table}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportColumn {
    pub id: String,
    pub name: String,
    pub label: String,
    pub selected: bool,
}

impl ExportColumn {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            label: name.clone(),
            name,
            selected: true,
        }
    }
}

/// Ordered, toggleable list of columns to export.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportSelection {
    columns: Vec<ExportColumn>,
}

impl ExportSelection {
    /// Every column selected, in result order.
    pub fn from_columns<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: names.into_iter().map(ExportColumn::new).collect(),
        }
    }

    pub fn columns(&self) -> &[ExportColumn] {
        &self.columns
    }

    pub fn toggle(&mut self, name: &str) {
        if let Some(column) = self.columns.iter_mut().find(|c| c.name == name) {
            column.selected = !column.selected;
        }
    }

    /// Moves the column at `from` to position `to`; `to` is clamped to the list.
    pub fn reorder(&mut self, from: usize, to: usize) {
        if from >= self.columns.len() || from == to {
            return;
        }
        let column = self.columns.remove(from);
        let to = to.min(self.columns.len());
        self.columns.insert(to, column);
    }

    /// Selects everything unless everything already is, in which case clears.
    pub fn toggle_select_all(&mut self) {
        let select = !self.columns.iter().all(|c| c.selected);
        for column in &mut self.columns {
            column.selected = select;
        }
    }

    /// Preset columns move to the front, selected and in preset order; the rest follow
    /// unselected. Preset names missing from the result are ignored.
    pub fn apply_preset(&mut self, preset: &ExportPreset) {
        let mut remaining = std::mem::take(&mut self.columns);
        let mut ordered = Vec::with_capacity(remaining.len());
        for name in &preset.columns {
            if let Some(pos) = remaining.iter().position(|c| &c.name == name) {
                let mut column = remaining.remove(pos);
                column.selected = true;
                ordered.push(column);
            }
        }
        for mut column in remaining {
            column.selected = false;
            ordered.push(column);
        }
        self.columns = ordered;
    }

    pub fn selected_names(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.selected)
            .map(|c| c.name.clone())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportPreset {
    pub name: String,
    pub columns: Vec<String>,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetBook {
    #[serde(default)]
    pub history: Vec<ExportPreset>,
    #[serde(default)]
    pub saved: Vec<ExportPreset>,
}

#[derive(Clone)]
pub struct PresetManager {
    store: Arc<dyn KeyValueStore>,
    history_limit: usize,
}

impl PresetManager {
    pub fn new(store: Arc<dyn KeyValueStore>, history_limit: usize) -> Self {
        Self {
            store,
            history_limit: history_limit.max(1),
        }
    }

    pub fn load(&self, source_table: &str) -> Result<PresetBook> {
        match get_json::<PresetBook>(self.store.as_ref(), &preset_key(source_table)) {
            Ok(book) => Ok(book.unwrap_or_default()),
            Err(DashboardError::Serialization(err)) => {
                warn!(source_table, error = %err, "discarding unreadable export presets");
                Ok(PresetBook::default())
            }
            Err(err) => Err(err),
        }
    }

    fn store_book(&self, source_table: &str, book: &PresetBook) -> Result<()> {
        set_json(self.store.as_ref(), &preset_key(source_table), book)
    }

    /// Saves `columns` under `name`, replacing any preset with the same name, newest first.
    pub fn save_preset(
        &self,
        source_table: &str,
        name: &str,
        columns: Vec<String>,
    ) -> Result<ExportPreset> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DashboardError::Validation("preset name is required".into()));
        }
        if columns.is_empty() {
            return Err(DashboardError::Validation(
                "select at least one column to save a preset".into(),
            ));
        }

        let preset = ExportPreset {
            name: name.to_string(),
            columns,
            saved_at: Utc::now(),
        };
        let mut book = self.load(source_table)?;
        book.saved.retain(|existing| existing.name != preset.name);
        book.saved.insert(0, preset.clone());
        self.store_book(source_table, &book)?;
        debug!(source_table, preset = %preset.name, "saved export preset");
        Ok(preset)
    }

    pub fn delete_preset(&self, source_table: &str, name: &str) -> Result<bool> {
        let mut book = self.load(source_table)?;
        let before = book.saved.len();
        book.saved.retain(|preset| preset.name != name);
        let removed = book.saved.len() != before;
        if removed {
            self.store_book(source_table, &book)?;
        }
        Ok(removed)
    }

    pub fn delete_history(&self, source_table: &str, index: usize) -> Result<bool> {
        let mut book = self.load(source_table)?;
        if index >= book.history.len() {
            return Ok(false);
        }
        book.history.remove(index);
        self.store_book(source_table, &book)?;
        Ok(true)
    }

    /// Remembers an export's column list, keeping only the most recent entries.
    pub fn record_history(&self, source_table: &str, columns: Vec<String>) -> Result<ExportPreset> {
        let saved_at = Utc::now();
        let preset = ExportPreset {
            name: format!("Export {}", saved_at.format("%H:%M:%S")),
            columns,
            saved_at,
        };
        let mut book = self.load(source_table)?;
        book.history.insert(0, preset.clone());
        book.history.truncate(self.history_limit);
        self.store_book(source_table, &book)?;
        Ok(preset)
    }
}
