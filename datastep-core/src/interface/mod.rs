//! Pluggable persistence strategies for data sets.
//!
//! An [`Interface`] reads and writes one row at a time and carries schema
//! metadata, which keeps the streaming core independent of the storage medium.
//! Every variant follows the same state machine, `closed → read | write →
//! closed`, and rejects operations attempted in the wrong state.

pub mod basic;
pub mod canonical;
pub mod delimited;
pub mod shell;

pub use basic::{BasicInterface, BasicRegistry};
pub use canonical::CanonicalInterface;
pub use delimited::{CsvOptions, DelimitedTextInterface, LineEnding};
pub use shell::ShellInterface;

use crate::error::{DataStepError, Result, StateError};
use crate::row::{KeyMap, Row};
use crate::variable_set::VariableSet;
use std::fmt;
use std::sync::Arc;

/// Storage strategy bound one-to-one to a data set.
pub trait Interface: Send {
    /// Prepare the storage for writing, truncating anything already there.
    fn open_for_write(&mut self) -> Result<()>;

    /// Prepare the storage for reading. `variables` is the schema the data
    /// set declared; interfaces that map columns by metadata use it.
    fn open_for_read(&mut self, variables: &VariableSet) -> Result<()>;

    /// Schema recorded in storage. Empty when the medium records none.
    fn read_metadata(&mut self) -> Result<VariableSet>;

    /// Record the schema. Must precede every row.
    fn write_metadata(&mut self, variables: &VariableSet) -> Result<()>;

    /// Next row, aligned to `key_map`, or `None` once the source is exhausted.
    fn read_row(&mut self, key_map: &Arc<KeyMap>) -> Result<Option<Row>>;

    fn write_row(&mut self, row: &Row) -> Result<()>;

    /// Flush and release every handle. Closing a closed interface is a no-op.
    fn close(&mut self) -> Result<()>;

    fn data_set_exists(&self) -> bool;

    /// Create (or overwrite) an empty data set with an empty schema.
    fn create_empty_data_set(&mut self) -> Result<()>;

    fn delete(&mut self) -> Result<()>;
}

/// Open state shared by the interface variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenState {
    #[default]
    Closed,
    Read,
    Write,
}

impl fmt::Display for OpenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenState::Closed => write!(f, "closed"),
            OpenState::Read => write!(f, "read"),
            OpenState::Write => write!(f, "write"),
        }
    }
}

impl OpenState {
    /// Fail unless the state is `expected`.
    pub fn require(self, expected: OpenState, target: &str, operation: &'static str) -> Result<()> {
        if self == expected {
            Ok(())
        } else {
            Err(self.mismatch(expected, target, operation))
        }
    }

    /// The error describing an operation attempted in this state when it
    /// needs `expected`.
    pub fn mismatch(self, expected: OpenState, target: &str, operation: &'static str) -> DataStepError {
        let err = match (self, expected) {
            (OpenState::Closed, _) => StateError::NotOpen {
                target: target.to_string(),
                operation,
            },
            (_, OpenState::Closed) => StateError::AlreadyOpen {
                target: target.to_string(),
                mode: self.to_string(),
            },
            _ => StateError::WrongMode {
                target: target.to_string(),
                operation,
                expected: expected.to_string(),
                actual: self.to_string(),
            },
        };
        err.into()
    }
}
