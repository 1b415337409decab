//! Placeholder interface with no physical backing.

use super::{Interface, OpenState};
use crate::error::Result;
use crate::row::{KeyMap, Row};
use crate::variable_set::VariableSet;
use std::sync::Arc;

/// Used for intermediate data sets that only ever live in a row window.
/// Reads are exhausted immediately and writes go nowhere.
#[derive(Debug)]
pub struct ShellInterface {
    name: String,
    state: OpenState,
}

impl ShellInterface {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: OpenState::Closed,
        }
    }
}

impl Interface for ShellInterface {
    fn open_for_write(&mut self) -> Result<()> {
        self.state
            .require(OpenState::Closed, &self.name, "open_for_write")?;
        self.state = OpenState::Write;
        Ok(())
    }

    fn open_for_read(&mut self, _variables: &VariableSet) -> Result<()> {
        self.state
            .require(OpenState::Closed, &self.name, "open_for_read")?;
        self.state = OpenState::Read;
        Ok(())
    }

    fn read_metadata(&mut self) -> Result<VariableSet> {
        Ok(VariableSet::new())
    }

    fn write_metadata(&mut self, _variables: &VariableSet) -> Result<()> {
        self.state
            .require(OpenState::Write, &self.name, "write_metadata")
    }

    fn read_row(&mut self, _key_map: &Arc<KeyMap>) -> Result<Option<Row>> {
        self.state.require(OpenState::Read, &self.name, "read_row")?;
        Ok(None)
    }

    fn write_row(&mut self, _row: &Row) -> Result<()> {
        self.state.require(OpenState::Write, &self.name, "write_row")
    }

    fn close(&mut self) -> Result<()> {
        self.state = OpenState::Closed;
        Ok(())
    }

    fn data_set_exists(&self) -> bool {
        false
    }

    fn create_empty_data_set(&mut self) -> Result<()> {
        Ok(())
    }

    fn delete(&mut self) -> Result<()> {
        Ok(())
    }
}
