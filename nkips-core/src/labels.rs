//! Port labels and the `.lbl` text format.
//!
//! A `.lbl` file has one row per port id:
//!
//! ```text
//! id,output label,output description,input label,input description,,
//! ```
//!
//! Inputs and outputs share the id column; a port that only exists on one
//! side leaves the other side's fields empty.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Which side of the router a port is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortKind {
    /// A source.
    Input,
    /// A destination.
    Output,
}

impl PortKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PortKind::Input => "input",
            PortKind::Output => "output",
        }
    }
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PortKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "input" | "inputs" | "in" | "source" | "src" => Ok(PortKind::Input),
            "output" | "outputs" | "out" | "destination" | "dst" => Ok(PortKind::Output),
            other => Err(format!("unknown port kind: {other}")),
        }
    }
}

/// Display name and description of one port.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub label: String,
    pub description: String,
}

impl Label {
    pub fn new(label: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            description: description.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.label.is_empty() && self.description.is_empty()
    }
}

/// Partial label update. `None` fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelUpdate {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl LabelUpdate {
    pub fn label(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Labels of every input and output, keyed by 1-based id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelStore {
    inputs: BTreeMap<u16, Label>,
    outputs: BTreeMap<u16, Label>,
}

impl LabelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `.lbl` text. Blank lines are skipped and missing columns
    /// read as empty strings.
    pub fn parse(text: &str) -> Result<Self, CoreError> {
        let mut store = Self::new();

        for (index, row) in text.lines().enumerate() {
            let row = row.trim_end_matches('\r');
            if row.trim().is_empty() {
                continue;
            }

            let mut columns = row.split(',');
            let id_column = columns.next().unwrap_or_default().trim();
            let id: u16 = id_column.parse().map_err(|_| CoreError::InvalidLabelRow {
                line: index + 1,
                reason: format!("id '{id_column}' is not a number"),
            })?;
            if id == 0 {
                return Err(CoreError::InvalidLabelRow {
                    line: index + 1,
                    reason: "ids are 1-based".to_string(),
                });
            }

            let mut next = || columns.next().unwrap_or_default().to_string();
            let output = Label::new(next(), next());
            let input = Label::new(next(), next());

            if !output.is_empty() {
                store.outputs.insert(id, output);
            }
            if !input.is_empty() {
                store.inputs.insert(id, input);
            }
        }

        Ok(store)
    }

    /// Renders rows `1..=count` in `.lbl` format.
    pub fn to_lbl(&self, count: u16) -> String {
        let empty = Label::default();
        (1..=count)
            .map(|id| {
                let output = self.outputs.get(&id).unwrap_or(&empty);
                let input = self.inputs.get(&id).unwrap_or(&empty);
                format!(
                    "{},{},{},{},{},,",
                    id, output.label, output.description, input.label, input.description
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Reads a `.lbl` file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Writes rows `1..=count` to a `.lbl` file.
    pub fn save(&self, path: impl AsRef<Path>, count: u16) -> Result<(), CoreError> {
        let mut text = self.to_lbl(count);
        text.push('\n');
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Returns the label of a port; missing entries are empty.
    pub fn get(&self, kind: PortKind, id: u16) -> Label {
        self.side(kind).get(&id).cloned().unwrap_or_default()
    }

    /// Applies a partial update to a port's label.
    pub fn set(&mut self, kind: PortKind, id: u16, update: LabelUpdate) -> Result<Label, CoreError> {
        if id == 0 {
            return Err(CoreError::InvalidPortId {
                kind: kind.as_str(),
                id,
            });
        }

        let side = match kind {
            PortKind::Input => &mut self.inputs,
            PortKind::Output => &mut self.outputs,
        };
        let entry = side.entry(id).or_default();
        if let Some(label) = update.label {
            entry.label = label;
        }
        if let Some(description) = update.description {
            entry.description = description;
        }

        Ok(entry.clone())
    }

    /// Number of labelled ports on one side.
    pub fn len(&self, kind: PortKind) -> usize {
        self.side(kind).len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty()
    }

    /// Iterates labelled ports of one side in id order.
    pub fn iter(&self, kind: PortKind) -> impl Iterator<Item = (u16, &Label)> {
        self.side(kind).iter().map(|(id, label)| (*id, label))
    }

    fn side(&self, kind: PortKind) -> &BTreeMap<u16, Label> {
        match kind {
            PortKind::Input => &self.inputs,
            PortKind::Output => &self.outputs,
        }
    }
}
