//! Delimited text files (CSV and friends) through the `csv` crate.
//!
//! Each variable maps to a zero-based column: its `column` metadata when set,
//! otherwise the matching header cell when the header is trusted, otherwise
//! its declared position. Cells are parsed with the variable's type hint;
//! empty cells read back as null.

use super::{Interface, OpenState};
use crate::error::{DataStepError, Result, SchemaError, StateError};
use crate::row::{KeyMap, Row};
use crate::value::{Value, parse_text, value_to_text};
use crate::variable_set::{ColumnType, VariableMeta, VariableSet};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Record terminator used when writing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineEnding {
    #[default]
    Lf,
    CrLf,
}

/// Dialect options for delimited text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsvOptions {
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default = "default_quote")]
    pub quote: char,
    /// Escape character. When unset, quotes inside quoted cells are doubled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escape: Option<char>,
    #[serde(default)]
    pub line_ending: LineEnding,
    /// The first line holds column names.
    #[serde(default = "default_true")]
    pub header_row: bool,
    /// Take variable names and positions from the header line.
    #[serde(default = "default_true")]
    pub trust_header: bool,
    #[serde(default = "default_extension")]
    pub extension: String,
}

fn default_delimiter() -> char {
    ','
}

fn default_quote() -> char {
    '"'
}

fn default_true() -> bool {
    true
}

fn default_extension() -> String {
    "csv".into()
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: default_delimiter(),
            quote: default_quote(),
            escape: None,
            line_ending: LineEnding::default(),
            header_row: true,
            trust_header: true,
            extension: default_extension(),
        }
    }
}

impl CsvOptions {
    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_header_row(mut self, header_row: bool) -> Self {
        self.header_row = header_row;
        self
    }

    pub fn with_trust_header(mut self, trust_header: bool) -> Self {
        self.trust_header = trust_header;
        self
    }

    pub fn with_line_ending(mut self, line_ending: LineEnding) -> Self {
        self.line_ending = line_ending;
        self
    }

    /// Problems with the dialect, empty when usable.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        for (label, c) in [("delimiter", self.delimiter), ("quote", self.quote)] {
            if !c.is_ascii() {
                errors.push(format!("{label} must be a single ASCII character, got '{c}'"));
            }
        }
        if let Some(escape) = self.escape
            && !escape.is_ascii()
        {
            errors.push(format!("escape must be a single ASCII character, got '{escape}'"));
        }
        if self.delimiter == self.quote {
            errors.push("delimiter and quote must differ".into());
        }
        if self.trust_header && !self.header_row {
            errors.push("trust_header requires header_row".into());
        }
        errors
    }

    fn byte(c: char, label: &str) -> Result<u8> {
        u8::try_from(c)
            .ok()
            .filter(u8::is_ascii)
            .ok_or_else(|| DataStepError::invalid_input(format!("{label} '{c}' is not ASCII")))
    }

    fn reader_builder(&self) -> Result<csv::ReaderBuilder> {
        let mut builder = csv::ReaderBuilder::new();
        builder
            .delimiter(Self::byte(self.delimiter, "delimiter")?)
            .quote(Self::byte(self.quote, "quote")?)
            .has_headers(false)
            .flexible(true);
        if let Some(escape) = self.escape {
            builder
                .escape(Some(Self::byte(escape, "escape")?))
                .double_quote(false);
        }
        Ok(builder)
    }

    fn writer_builder(&self) -> Result<csv::WriterBuilder> {
        let mut builder = csv::WriterBuilder::new();
        builder
            .delimiter(Self::byte(self.delimiter, "delimiter")?)
            .quote(Self::byte(self.quote, "quote")?)
            .has_headers(false)
            .flexible(true)
            .terminator(match self.line_ending {
                LineEnding::Lf => csv::Terminator::Any(b'\n'),
                LineEnding::CrLf => csv::Terminator::CRLF,
            });
        if let Some(escape) = self.escape {
            builder
                .escape(Self::byte(escape, "escape")?)
                .double_quote(false);
        }
        Ok(builder)
    }
}

/// Where one variable lives in the text and how its cells parse.
#[derive(Debug, Clone)]
struct ColumnPlan {
    column: usize,
    type_hint: Option<ColumnType>,
}

struct DelimitedReader {
    records: csv::Reader<File>,
    plan: HashMap<String, ColumnPlan>,
    lookahead: Option<csv::StringRecord>,
}

struct DelimitedWriter {
    records: csv::Writer<File>,
    /// Column of each row position, known once metadata is written.
    columns: Option<Vec<usize>>,
}

enum Stream {
    Closed,
    Read(Box<DelimitedReader>),
    Write(Box<DelimitedWriter>),
}

impl Stream {
    fn state(&self) -> OpenState {
        match self {
            Stream::Closed => OpenState::Closed,
            Stream::Read(_) => OpenState::Read,
            Stream::Write(_) => OpenState::Write,
        }
    }
}

pub struct DelimitedTextInterface {
    name: String,
    path: PathBuf,
    options: CsvOptions,
    stream: Stream,
}

impl DelimitedTextInterface {
    pub fn new(name: impl Into<String>, path: PathBuf, options: CsvOptions) -> Self {
        Self {
            name: name.into(),
            path,
            options,
            stream: Stream::Closed,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &CsvOptions {
        &self.options
    }

    fn open_records(&self) -> Result<csv::Reader<File>> {
        let file = File::open(&self.path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => DataStepError::not_found(&self.name),
            _ => e.into(),
        })?;
        Ok(self.options.reader_builder()?.from_reader(file))
    }

    fn read_header(&self, records: &mut csv::Reader<File>) -> Result<Option<Vec<String>>> {
        if !self.options.header_row {
            return Ok(None);
        }
        let mut header = csv::StringRecord::new();
        if !records.read_record(&mut header)? {
            return Ok(Some(Vec::new()));
        }
        Ok(Some(header.iter().map(|cell| cell.trim().to_string()).collect()))
    }

    fn create_records(&self) -> Result<csv::Writer<File>> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(&self.path)?;
        Ok(self.options.writer_builder()?.from_writer(file))
    }
}

fn header_variables(header: &[String]) -> VariableSet {
    let mut variables = VariableSet::new();
    for (column, name) in header.iter().enumerate() {
        if name.is_empty() || variables.contains(name) {
            continue;
        }
        variables.declare(name.clone(), VariableMeta::new().with_column(column));
    }
    variables
}

impl DelimitedReader {
    fn next_record(&mut self) -> Result<Option<csv::StringRecord>> {
        let mut record = csv::StringRecord::new();
        if self.records.read_record(&mut record)? {
            Ok(Some(record))
        } else {
            Ok(None)
        }
    }

    fn values(&self, record: &csv::StringRecord, key_map: &KeyMap) -> Vec<Value> {
        key_map
            .names()
            .iter()
            .map(|name| {
                self.plan
                    .get(name)
                    .and_then(|plan| {
                        record
                            .get(plan.column)
                            .map(|cell| parse_text(cell, plan.type_hint.as_ref()))
                    })
                    .unwrap_or(Value::Null)
            })
            .collect()
    }
}

impl Interface for DelimitedTextInterface {
    fn open_for_write(&mut self) -> Result<()> {
        self.stream
            .state()
            .require(OpenState::Closed, &self.name, "open_for_write")?;
        let records = self.create_records()?;
        self.stream = Stream::Write(Box::new(DelimitedWriter {
            records,
            columns: None,
        }));
        tracing::debug!(data_set = %self.name, path = %self.path.display(), "Opened delimited text for write");
        Ok(())
    }

    fn open_for_read(&mut self, variables: &VariableSet) -> Result<()> {
        self.stream
            .state()
            .require(OpenState::Closed, &self.name, "open_for_read")?;
        let mut records = self.open_records()?;
        let header = self.read_header(&mut records)?;

        let plan = variables
            .iter()
            .map(|variable| {
                let from_header = match (&header, self.options.trust_header) {
                    (Some(names), true) => names.iter().position(|n| n == &variable.name),
                    _ => None,
                };
                let column = variable
                    .meta
                    .column
                    .or(from_header)
                    .unwrap_or(variable.index);
                (
                    variable.name.clone(),
                    ColumnPlan {
                        column,
                        type_hint: variable.meta.type_hint.clone(),
                    },
                )
            })
            .collect();

        let mut reader = DelimitedReader {
            records,
            plan,
            lookahead: None,
        };
        reader.lookahead = reader.next_record()?;
        self.stream = Stream::Read(Box::new(reader));
        tracing::debug!(data_set = %self.name, path = %self.path.display(), "Opened delimited text for read");
        Ok(())
    }

    /// The header-derived schema when the header is trusted, else empty.
    fn read_metadata(&mut self) -> Result<VariableSet> {
        if !(self.options.header_row && self.options.trust_header) {
            return Ok(VariableSet::new());
        }
        let mut records = self.open_records()?;
        let header = self.read_header(&mut records)?.unwrap_or_default();
        Ok(header_variables(&header))
    }

    fn write_metadata(&mut self, variables: &VariableSet) -> Result<()> {
        let name = self.name.clone();
        let header_row = self.options.header_row;
        let state = self.stream.state();
        let Stream::Write(writer) = &mut self.stream else {
            return Err(state.mismatch(OpenState::Write, &name, "write_metadata"));
        };
        if writer.columns.is_some() {
            return Err(StateError::MetadataAlreadyWritten { target: name }.into());
        }
        let columns: Vec<usize> = variables
            .iter()
            .map(|v| v.meta.column.unwrap_or(v.index))
            .collect();
        let mut claimed: HashMap<usize, &str> = HashMap::with_capacity(columns.len());
        for (variable, &column) in variables.iter().zip(&columns) {
            if let Some(previous) = claimed.insert(column, &variable.name) {
                return Err(DataStepError::invalid_input(format!(
                    "variables '{previous}' and '{}' both map to column {column} of '{name}'",
                    variable.name
                )));
            }
        }
        if header_row && !variables.is_empty() {
            let mut cells = vec![String::new(); columns.iter().max().map_or(0, |c| c + 1)];
            for (variable, &column) in variables.iter().zip(&columns) {
                cells[column] = variable.name.clone();
            }
            writer.records.write_record(&cells)?;
        }
        writer.columns = Some(columns);
        Ok(())
    }

    fn read_row(&mut self, key_map: &Arc<KeyMap>) -> Result<Option<Row>> {
        let state = self.stream.state();
        let Stream::Read(reader) = &mut self.stream else {
            return Err(state.mismatch(OpenState::Read, &self.name, "read_row"));
        };
        let Some(record) = reader.lookahead.take() else {
            return Ok(None);
        };
        reader.lookahead = reader.next_record()?;
        let values = reader.values(&record, key_map);
        let mut row = Row::with_key_map(values, key_map.clone())?;
        row.set_last_row(reader.lookahead.is_none());
        Ok(Some(row))
    }

    fn write_row(&mut self, row: &Row) -> Result<()> {
        let state = self.stream.state();
        let Stream::Write(writer) = &mut self.stream else {
            return Err(state.mismatch(OpenState::Write, &self.name, "write_row"));
        };
        let Some(columns) = &writer.columns else {
            return Err(StateError::MetadataNotWritten {
                target: self.name.clone(),
            }
            .into());
        };
        if row.len() != columns.len() {
            return Err(SchemaError::WidthMismatch {
                expected: columns.len(),
                actual: row.len(),
            }
            .into());
        }
        let mut cells = vec![String::new(); columns.iter().max().map_or(0, |c| c + 1)];
        for (value, &column) in row.values().iter().zip(columns) {
            cells[column] = value_to_text(value);
        }
        writer.records.write_record(&cells)?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.stream, Stream::Closed) {
            Stream::Closed | Stream::Read(_) => {}
            Stream::Write(mut writer) => {
                writer.records.flush()?;
                tracing::debug!(data_set = %self.name, "Closed delimited text after write");
            }
        }
        Ok(())
    }

    fn data_set_exists(&self) -> bool {
        self.path.exists()
    }

    fn create_empty_data_set(&mut self) -> Result<()> {
        self.stream
            .state()
            .require(OpenState::Closed, &self.name, "create_empty_data_set")?;
        self.create_records()?.flush()?;
        Ok(())
    }

    fn delete(&mut self) -> Result<()> {
        self.stream
            .state()
            .require(OpenState::Closed, &self.name, "delete")?;
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
