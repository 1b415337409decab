//! Variables, their metadata, and the ordered schema bound to a data set.

use crate::row::KeyMap;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Column data type hint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    Float,
    String,
    Boolean,
    Date,
    DateTime,
    Json,
}

/// Metadata attached to a variable.
///
/// The recognized keys cover the storage and presentation concerns of the
/// core. Anything else a caller attaches is kept in `extra` and survives a
/// round trip through the canonical format. The key `index` is reserved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableMeta {
    /// Type hint. Rows never coerce; interfaces that read text may use it.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_hint: Option<ColumnType>,
    /// Display format string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Zero-based column position in delimited text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
    /// Human readable label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl VariableMeta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, type_hint: ColumnType) -> Self {
        self.type_hint = Some(type_hint);
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_column(mut self, column: usize) -> Self {
        self.column = Some(column);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// A named schema entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub index: usize,
    #[serde(default)]
    pub meta: VariableMeta,
}

/// Ordered collection of variables. Names are unique and indices are always
/// the dense range `0..len`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableSet {
    variables: Vec<Variable>,
    positions: HashMap<String, usize>,
}

impl VariableSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from names, each with empty metadata.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self::new();
        for name in names {
            set.declare(name, VariableMeta::default());
        }
        set
    }

    /// Declare a variable.
    ///
    /// A new name is appended at the next index. An existing name keeps its
    /// index and has its metadata replaced wholesale.
    pub fn declare(&mut self, name: impl Into<String>, meta: VariableMeta) -> &Variable {
        let name = name.into();
        let index = match self.positions.get(&name) {
            Some(&index) => {
                self.variables[index].meta = meta;
                index
            }
            None => {
                let index = self.variables.len();
                self.positions.insert(name.clone(), index);
                self.variables.push(Variable { name, index, meta });
                index
            }
        };
        &self.variables[index]
    }

    /// Import every variable of `other` that is not already declared here,
    /// keeping `other`'s metadata. Names already present are left untouched.
    pub fn merge_like(&mut self, other: &VariableSet) {
        for variable in other.iter() {
            if !self.contains(&variable.name) {
                self.declare(variable.name.clone(), variable.meta.clone());
            }
        }
    }

    /// Remove a variable, shifting later variables down so indices stay dense.
    pub fn remove(&mut self, name: &str) -> Option<Variable> {
        let index = self.positions.remove(name)?;
        let removed = self.variables.remove(index);
        for variable in self.variables.iter_mut().skip(index) {
            variable.index -= 1;
            self.positions.insert(variable.name.clone(), variable.index);
        }
        Some(removed)
    }

    /// Variable names in index order.
    pub fn keys(&self) -> Vec<&str> {
        self.variables.iter().map(|v| v.name.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.positions.get(name).map(|&i| &self.variables[i])
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.positions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Variable> {
        self.variables.iter()
    }

    /// Snapshot of the name→position lookup used by rows.
    pub fn key_map(&self) -> KeyMap {
        KeyMap::new(self.variables.iter().map(|v| v.name.clone()).collect())
    }
}

impl<'a> IntoIterator for &'a VariableSet {
    type Item = &'a Variable;
    type IntoIter = std::slice::Iter<'a, Variable>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
