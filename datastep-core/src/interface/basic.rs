//! In-memory stand-in interface used for testing and stubbing.

use super::{Interface, OpenState};
use crate::error::Result;
use crate::row::{KeyMap, Row};
use crate::variable_set::VariableSet;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};

/// Names of the basic data sets created through one library.
#[derive(Debug, Clone, Default)]
pub struct BasicRegistry {
    created: Arc<Mutex<BTreeSet<String>>>,
}

impl BasicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: &str) {
        self.lock().insert(name.to_string());
    }

    pub fn remove(&self, name: &str) -> bool {
        self.lock().remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.lock().iter().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeSet<String>> {
        self.created.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Reads yield endless all-null rows; writes are accepted and discarded.
#[derive(Debug)]
pub struct BasicInterface {
    name: String,
    registry: BasicRegistry,
    state: OpenState,
}

impl BasicInterface {
    pub fn new(name: impl Into<String>, registry: BasicRegistry) -> Self {
        Self {
            name: name.into(),
            registry,
            state: OpenState::Closed,
        }
    }
}

impl Interface for BasicInterface {
    fn open_for_write(&mut self) -> Result<()> {
        self.state
            .require(OpenState::Closed, &self.name, "open_for_write")?;
        self.registry.insert(&self.name);
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

    fn read_row(&mut self, key_map: &Arc<KeyMap>) -> Result<Option<Row>> {
        self.state.require(OpenState::Read, &self.name, "read_row")?;
        Ok(Some(Row::blank(key_map.clone())))
    }

    fn write_row(&mut self, _row: &Row) -> Result<()> {
        self.state.require(OpenState::Write, &self.name, "write_row")
    }

    fn close(&mut self) -> Result<()> {
        self.state = OpenState::Closed;
        Ok(())
    }

    fn data_set_exists(&self) -> bool {
        self.registry.contains(&self.name)
    }

    fn create_empty_data_set(&mut self) -> Result<()> {
        self.registry.insert(&self.name);
        Ok(())
    }

    fn delete(&mut self) -> Result<()> {
        self.registry.remove(&self.name);
        Ok(())
    }
}
