//! The native on-disk format: paired header and data files.
//!
//! Both files are gzip streams of MessagePack records. The header file holds a
//! single record mapping each field name to its metadata plus its declared
//! `index`. The data file holds one record per row, an array in header order.
//! The header is always written before the first row and read back before the
//! first row is decoded, since row positions depend on it.

use super::{Interface, OpenState};
use crate::error::{DataStepError, Result, SchemaError, StateError};
use crate::row::{KeyMap, Row};
use crate::value::Value;
use crate::variable_set::{VariableMeta, VariableSet};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const INDEX_KEY: &str = "index";

type HeaderRecord = BTreeMap<String, serde_json::Map<String, Value>>;
type DataReader = GzDecoder<BufReader<File>>;
type DataWriter = GzEncoder<BufWriter<File>>;

struct CanonicalReader {
    variables: VariableSet,
    layout: Vec<String>,
    data: DataReader,
    /// Next record, read one step early so the last real row can be flagged.
    lookahead: Option<Vec<Value>>,
}

struct CanonicalWriter {
    header: DataWriter,
    data: DataWriter,
    /// Row width, known once the header is written.
    width: Option<usize>,
}

enum Stream {
    Closed,
    Read(Box<CanonicalReader>),
    Write(Box<CanonicalWriter>),
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

pub struct CanonicalInterface {
    name: String,
    header_path: PathBuf,
    data_path: PathBuf,
    compression: Compression,
    stream: Stream,
}

impl CanonicalInterface {
    pub fn new(
        name: impl Into<String>,
        header_path: PathBuf,
        data_path: PathBuf,
        compression: Compression,
    ) -> Self {
        Self {
            name: name.into(),
            header_path,
            data_path,
            compression,
            stream: Stream::Closed,
        }
    }

    pub fn header_path(&self) -> &Path {
        &self.header_path
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    fn reader(&mut self, operation: &'static str) -> Result<&mut CanonicalReader> {
        let state = self.stream.state();
        match &mut self.stream {
            Stream::Read(reader) => Ok(reader.as_mut()),
            _ => Err(state.mismatch(OpenState::Read, &self.name, operation)),
        }
    }

    fn writer(&mut self, operation: &'static str) -> Result<&mut CanonicalWriter> {
        let state = self.stream.state();
        match &mut self.stream {
            Stream::Write(writer) => Ok(writer.as_mut()),
            _ => Err(state.mismatch(OpenState::Write, &self.name, operation)),
        }
    }

    fn load_header(&self) -> Result<VariableSet> {
        let file = File::open(&self.header_path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => DataStepError::not_found(&self.name),
            _ => e.into(),
        })?;
        let mut decoder = GzDecoder::new(BufReader::new(file));
        let record: HeaderRecord = rmp_serde::from_read(&mut decoder)?;
        decode_header(record)
    }

    fn create_writer(&self) -> Result<CanonicalWriter> {
        if let Some(parent) = self.header_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if let Some(parent) = self.data_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let header = File::create(&self.header_path)?;
        let data = File::create(&self.data_path)?;
        Ok(CanonicalWriter {
            header: GzEncoder::new(BufWriter::new(header), self.compression),
            data: GzEncoder::new(BufWriter::new(data), self.compression),
            width: None,
        })
    }
}

impl CanonicalWriter {
    fn write_header(&mut self, variables: &VariableSet) -> Result<()> {
        rmp_serde::encode::write(&mut self.header, &encode_header(variables)?)?;
        self.width = Some(variables.len());
        Ok(())
    }

    fn finish(self) -> Result<()> {
        self.header.finish()?.flush()?;
        self.data.finish()?.flush()?;
        Ok(())
    }
}

impl CanonicalReader {
    /// Place values recorded in header order at the positions of `key_map`.
    fn align(&self, mut values: Vec<Value>, key_map: &KeyMap) -> Vec<Value> {
        if key_map.names() == self.layout.as_slice() {
            values.resize(key_map.len(), Value::Null);
            return values;
        }
        let mut aligned = vec![Value::Null; key_map.len()];
        for (name, value) in self.layout.iter().zip(values) {
            if let Some(position) = key_map.position(name) {
                aligned[position] = value;
            }
        }
        aligned
    }
}

fn read_record(data: &mut DataReader) -> Result<Option<Vec<Value>>> {
    match rmp_serde::from_read(&mut *data) {
        Ok(values) => Ok(Some(values)),
        Err(rmp_serde::decode::Error::InvalidMarkerRead(e))
            if e.kind() == io::ErrorKind::UnexpectedEof =>
        {
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

fn encode_header(variables: &VariableSet) -> Result<HeaderRecord> {
    let mut record = HeaderRecord::new();
    for variable in variables {
        let mut entry = match serde_json::to_value(&variable.meta)? {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        entry.insert(INDEX_KEY.to_string(), Value::from(variable.index));
        record.insert(variable.name.clone(), entry);
    }
    Ok(record)
}

fn decode_header(record: HeaderRecord) -> Result<VariableSet> {
    let mut entries = Vec::with_capacity(record.len());
    for (name, mut entry) in record {
        let index = entry
            .remove(INDEX_KEY)
            .and_then(|v| v.as_u64())
            .ok_or_else(|| {
                DataStepError::invalid_input(format!("header entry '{name}' has no index"))
            })?;
        let meta: VariableMeta = serde_json::from_value(Value::Object(entry))?;
        entries.push((index, name, meta));
    }
    entries.sort_by_key(|(index, _, _)| *index);

    let mut variables = VariableSet::new();
    for (_, name, meta) in entries {
        variables.declare(name, meta);
    }
    Ok(variables)
}

impl Interface for CanonicalInterface {
    fn open_for_write(&mut self) -> Result<()> {
        self.stream
            .state()
            .require(OpenState::Closed, &self.name, "open_for_write")?;
        let writer = self.create_writer()?;
        self.stream = Stream::Write(Box::new(writer));
        tracing::debug!(data_set = %self.name, path = %self.data_path.display(), "Opened canonical data set for write");
        Ok(())
    }

    fn open_for_read(&mut self, _variables: &VariableSet) -> Result<()> {
        self.stream
            .state()
            .require(OpenState::Closed, &self.name, "open_for_read")?;
        let variables = self.load_header()?;
        let layout = variables.keys().iter().map(|k| k.to_string()).collect();
        let file = File::open(&self.data_path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => DataStepError::not_found(&self.name),
            _ => e.into(),
        })?;
        let mut data = GzDecoder::new(BufReader::new(file));
        let lookahead = read_record(&mut data)?;
        self.stream = Stream::Read(Box::new(CanonicalReader {
            variables,
            layout,
            data,
            lookahead,
        }));
        tracing::debug!(data_set = %self.name, path = %self.data_path.display(), "Opened canonical data set for read");
        Ok(())
    }

    fn read_metadata(&mut self) -> Result<VariableSet> {
        match &self.stream {
            Stream::Read(reader) => Ok(reader.variables.clone()),
            _ => self.load_header(),
        }
    }

    fn write_metadata(&mut self, variables: &VariableSet) -> Result<()> {
        let name = self.name.clone();
        let writer = self.writer("write_metadata")?;
        if writer.width.is_some() {
            return Err(StateError::MetadataAlreadyWritten { target: name }.into());
        }
        writer.write_header(variables)
    }

    fn read_row(&mut self, key_map: &Arc<KeyMap>) -> Result<Option<Row>> {
        let reader = self.reader("read_row")?;
        let Some(values) = reader.lookahead.take() else {
            return Ok(None);
        };
        reader.lookahead = read_record(&mut reader.data)?;
        let aligned = reader.align(values, key_map);
        let mut row = Row::with_key_map(aligned, key_map.clone())?;
        row.set_last_row(reader.lookahead.is_none());
        Ok(Some(row))
    }

    fn write_row(&mut self, row: &Row) -> Result<()> {
        let name = self.name.clone();
        let writer = self.writer("write_row")?;
        let Some(width) = writer.width else {
            return Err(StateError::MetadataNotWritten { target: name }.into());
        };
        if row.len() != width {
            return Err(SchemaError::WidthMismatch {
                expected: width,
                actual: row.len(),
            }
            .into());
        }
        rmp_serde::encode::write(&mut writer.data, row.values())?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.stream, Stream::Closed) {
            Stream::Closed => {}
            Stream::Read(_) => {
                tracing::debug!(data_set = %self.name, "Closed canonical data set after read");
            }
            Stream::Write(mut writer) => {
                if writer.width.is_none() {
                    writer.write_header(&VariableSet::new())?;
                }
                writer.finish()?;
                tracing::debug!(data_set = %self.name, "Closed canonical data set after write");
            }
        }
        Ok(())
    }

    fn data_set_exists(&self) -> bool {
        self.header_path.exists() && self.data_path.exists()
    }

    fn create_empty_data_set(&mut self) -> Result<()> {
        self.stream
            .state()
            .require(OpenState::Closed, &self.name, "create_empty_data_set")?;
        let mut writer = self.create_writer()?;
        writer.write_header(&VariableSet::new())?;
        writer.finish()
    }

    fn delete(&mut self) -> Result<()> {
        self.stream
            .state()
            .require(OpenState::Closed, &self.name, "delete")?;
        for path in [&self.header_path, &self.data_path] {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
