//! Rows: fixed-width value tuples addressable by name or by position.

use crate::error::{Result, SchemaError};
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Frozen name→position lookup shared by every row of an open data set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyMap {
    names: Vec<String>,
    positions: HashMap<String, usize>,
}

impl KeyMap {
    pub fn new(names: Vec<String>) -> Self {
        let positions = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self { names, positions }
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// A field reference: a variable name or a raw position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field<'a> {
    Name(&'a str),
    Index(usize),
}

impl<'a> From<&'a str> for Field<'a> {
    fn from(name: &'a str) -> Self {
        Field::Name(name)
    }
}

impl<'a> From<&'a String> for Field<'a> {
    fn from(name: &'a String) -> Self {
        Field::Name(name.as_str())
    }
}

impl From<usize> for Field<'_> {
    fn from(index: usize) -> Self {
        Field::Index(index)
    }
}

/// Where a row came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    /// Real data read from storage or staged by the caller.
    Data,
    /// Filler occupying window slots before data arrives.
    Padding,
    /// All-null sentinel produced once the source is exhausted.
    EndOfStream,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    values: Vec<Value>,
    key_map: Option<Arc<KeyMap>>,
    last_row: bool,
    row_number: Option<u64>,
    kind: RowKind,
}

impl Row {
    /// A positional row without names.
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            values,
            key_map: None,
            last_row: false,
            row_number: None,
            kind: RowKind::Data,
        }
    }

    /// A row whose values line up with `key_map`.
    pub fn with_key_map(values: Vec<Value>, key_map: Arc<KeyMap>) -> Result<Self> {
        if values.len() != key_map.len() {
            return Err(SchemaError::WidthMismatch {
                expected: key_map.len(),
                actual: values.len(),
            }
            .into());
        }
        Ok(Self {
            values,
            key_map: Some(key_map),
            last_row: false,
            row_number: None,
            kind: RowKind::Data,
        })
    }

    /// An all-null data row.
    pub fn blank(key_map: Arc<KeyMap>) -> Self {
        Self {
            values: vec![Value::Null; key_map.len()],
            key_map: Some(key_map),
            last_row: false,
            row_number: None,
            kind: RowKind::Data,
        }
    }

    pub fn padding(key_map: Option<Arc<KeyMap>>) -> Self {
        let width = key_map.as_ref().map_or(0, |k| k.len());
        Self {
            values: vec![Value::Null; width],
            key_map,
            last_row: false,
            row_number: None,
            kind: RowKind::Padding,
        }
    }

    pub fn end_of_stream(key_map: Option<Arc<KeyMap>>) -> Self {
        let width = key_map.as_ref().map_or(0, |k| k.len());
        Self {
            values: vec![Value::Null; width],
            key_map,
            last_row: true,
            row_number: None,
            kind: RowKind::EndOfStream,
        }
    }

    /// Resolve a field reference to a position within this row.
    pub fn position<'a>(&self, field: impl Into<Field<'a>>) -> Result<usize> {
        match field.into() {
            Field::Name(name) => self
                .key_map
                .as_ref()
                .and_then(|k| k.position(name))
                .ok_or_else(|| {
                    SchemaError::UnknownField {
                        name: name.to_string(),
                    }
                    .into()
                }),
            Field::Index(index) if index < self.values.len() => Ok(index),
            Field::Index(index) => Err(SchemaError::IndexOutOfRange {
                index,
                width: self.values.len(),
            }
            .into()),
        }
    }

    pub fn get<'a>(&self, field: impl Into<Field<'a>>) -> Result<&Value> {
        let position = self.position(field)?;
        Ok(&self.values[position])
    }

    pub fn set<'a>(&mut self, field: impl Into<Field<'a>>, value: impl Into<Value>) -> Result<()> {
        let position = self.position(field)?;
        self.values[position] = value.into();
        Ok(())
    }

    /// Replace every value at once. The width must not change.
    pub fn set_values(&mut self, values: Vec<Value>) -> Result<()> {
        if values.len() != self.values.len() {
            return Err(SchemaError::WidthMismatch {
                expected: self.values.len(),
                actual: values.len(),
            }
            .into());
        }
        self.values = values;
        Ok(())
    }

    /// Defensive copy of the values.
    pub fn to_vec(&self) -> Vec<Value> {
        self.values.clone()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Name/value pairs in position order. Empty when the row has no key map.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.key_map
            .iter()
            .flat_map(|k| k.names().iter())
            .map(String::as_str)
            .zip(self.values.iter())
    }

    pub fn key_map(&self) -> Option<&Arc<KeyMap>> {
        self.key_map.as_ref()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn last_row(&self) -> bool {
        self.last_row
    }

    pub fn set_last_row(&mut self, last_row: bool) {
        self.last_row = last_row;
    }

    pub fn row_number(&self) -> Option<u64> {
        self.row_number
    }

    pub fn set_row_number(&mut self, row_number: u64) {
        self.row_number = Some(row_number);
    }

    pub fn kind(&self) -> RowKind {
        self.kind
    }

    pub fn is_padding(&self) -> bool {
        self.kind == RowKind::Padding
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.kind == RowKind::EndOfStream
    }

    /// Padding and end-of-stream rows carry no data.
    pub fn is_data(&self) -> bool {
        self.kind == RowKind::Data
    }
}
