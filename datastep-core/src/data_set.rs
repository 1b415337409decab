//! A named data set: schema, storage interface and row window bound together.
//!
//! A [`DataSet`] moves through `closed → read | write → closed`. While closed
//! its schema may change; once opened the schema is frozen into a shared
//! [`KeyMap`] and every row produced or written is aligned to it.
//!
//! In read mode the current row sits at offset 0 of the [`RowSet`], with
//! `lead_rows` rows read ahead of it and `lag_rows` retained behind it. In
//! write mode the caller fills an active row and [`DataSet::write_row`]
//! pushes a copy into the window, so `lag(1)` is the row most recently
//! written and `lag(0)` is the row being staged.

use crate::error::{DataStepError, Result, SchemaError, StateError};
use crate::interface::{Interface, OpenState};
use crate::row::{Field, KeyMap, Row};
use crate::row_set::RowSet;
use crate::value::Value;
use crate::variable_set::{VariableMeta, VariableSet};
use std::sync::Arc;

/// Window and grouping used when a data set is opened for read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOptions {
    pub lead_rows: usize,
    pub lag_rows: usize,
    /// By-group variables, outer to inner.
    pub by_groups: Vec<String>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            lead_rows: 1,
            lag_rows: 1,
            by_groups: Vec::new(),
        }
    }
}

impl ReadOptions {
    pub fn with_lead_rows(mut self, lead_rows: usize) -> Self {
        self.lead_rows = lead_rows;
        self
    }

    pub fn with_lag_rows(mut self, lag_rows: usize) -> Self {
        self.lag_rows = lag_rows;
        self
    }

    pub fn with_by_groups<I, S>(mut self, by_groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.by_groups = by_groups.into_iter().map(Into::into).collect();
        self
    }
}

pub struct DataSet {
    name: String,
    interface: Box<dyn Interface>,
    variables: VariableSet,
    key_map: Arc<KeyMap>,
    active_row: Row,
    row_set: Option<RowSet>,
    mode: OpenState,
    metadata_written: bool,
    primed: bool,
    exhausted: bool,
}

impl std::fmt::Debug for DataSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSet")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("variables", &self.variables.keys())
            .finish()
    }
}

impl DataSet {
    pub fn new(name: impl Into<String>, interface: Box<dyn Interface>) -> Self {
        Self::with_variables(name, interface, VariableSet::new())
    }

    pub fn with_variables(
        name: impl Into<String>,
        interface: Box<dyn Interface>,
        variables: VariableSet,
    ) -> Self {
        let key_map = Arc::new(variables.key_map());
        Self {
            name: name.into(),
            interface,
            active_row: Row::blank(key_map.clone()),
            key_map,
            variables,
            row_set: None,
            mode: OpenState::Closed,
            metadata_written: false,
            primed: false,
            exhausted: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn variables(&self) -> &VariableSet {
        &self.variables
    }

    pub fn key_map(&self) -> &Arc<KeyMap> {
        &self.key_map
    }

    pub fn mode(&self) -> OpenState {
        self.mode
    }

    pub fn is_open(&self) -> bool {
        self.mode != OpenState::Closed
    }

    pub fn exists(&self) -> bool {
        self.interface.data_set_exists()
    }

    // Schema

    /// Declare one variable, replacing the metadata of an existing one.
    pub fn declare(&mut self, name: impl Into<String>, meta: VariableMeta) -> Result<()> {
        self.schema_mut()?.declare(name, meta);
        self.refresh_schema();
        Ok(())
    }

    /// Edit the schema in place.
    pub fn define_variables(&mut self, define: impl FnOnce(&mut VariableSet)) -> Result<()> {
        define(self.schema_mut()?);
        self.refresh_schema();
        Ok(())
    }

    /// Inherit the variables of `other` that this data set lacks.
    pub fn like(&mut self, other: &DataSet) -> Result<()> {
        self.schema_mut()?.merge_like(&other.variables);
        self.refresh_schema();
        Ok(())
    }

    /// Declare every variable of `other`; the incoming metadata wins.
    pub fn merge_variables(&mut self, other: &VariableSet) -> Result<()> {
        let schema = self.schema_mut()?;
        for variable in other {
            schema.declare(variable.name.clone(), variable.meta.clone());
        }
        self.refresh_schema();
        Ok(())
    }

    fn schema_mut(&mut self) -> Result<&mut VariableSet> {
        if self.is_open() {
            return Err(StateError::SchemaFrozen {
                target: self.name.clone(),
            }
            .into());
        }
        Ok(&mut self.variables)
    }

    fn refresh_schema(&mut self) {
        self.key_map = Arc::new(self.variables.key_map());
        self.active_row = Row::blank(self.key_map.clone());
    }

    // Lifecycle

    pub fn open_for_read(&mut self, options: ReadOptions) -> Result<()> {
        self.mode
            .require(OpenState::Closed, &self.name, "open_for_read")?;
        for by in &options.by_groups {
            if !self.variables.contains(by) {
                return Err(SchemaError::UnknownByGroupVariable {
                    name: by.clone(),
                    data_set: self.name.clone(),
                }
                .into());
            }
        }

        let (mut lag_rows, mut lead_rows) = (options.lag_rows, options.lead_rows);
        if !options.by_groups.is_empty() {
            lag_rows = lag_rows.max(1);
            lead_rows = lead_rows.max(1);
        }

        self.key_map = Arc::new(self.variables.key_map());
        self.interface.open_for_read(&self.variables)?;
        self.row_set = Some(RowSet::with_blank(
            lag_rows,
            lead_rows,
            options.by_groups,
            Row::padding(Some(self.key_map.clone())),
        ));
        self.mode = OpenState::Read;
        self.primed = false;
        self.exhausted = false;
        tracing::debug!(data_set = %self.name, lag_rows, lead_rows, "Data set opened for read");
        Ok(())
    }

    /// Open for writing, retaining the last `lag_rows` written rows.
    pub fn open_for_write(&mut self, lag_rows: usize) -> Result<()> {
        self.mode
            .require(OpenState::Closed, &self.name, "open_for_write")?;
        self.key_map = Arc::new(self.variables.key_map());
        self.interface.open_for_write()?;
        self.active_row = Row::blank(self.key_map.clone());
        self.row_set = Some(RowSet::with_blank(
            lag_rows.saturating_sub(1),
            0,
            Vec::new(),
            Row::padding(Some(self.key_map.clone())),
        ));
        self.mode = OpenState::Write;
        self.metadata_written = false;
        tracing::debug!(data_set = %self.name, lag_rows, "Data set opened for write");
        Ok(())
    }

    /// Advance to the next row. Once storage is exhausted the window fills
    /// with end-of-stream rows, which report `last_row`.
    pub fn read_row(&mut self) -> Result<&Row> {
        self.mode.require(OpenState::Read, &self.name, "read_row")?;
        if !self.primed {
            let lead_rows = self.window()?.lead_rows();
            for _ in 0..lead_rows {
                self.pull()?;
            }
            self.primed = true;
        }
        self.pull()?;
        Ok(self.window()?.current())
    }

    fn pull(&mut self) -> Result<()> {
        let row = if self.exhausted {
            None
        } else {
            self.interface.read_row(&self.key_map)?
        };
        let row = row.unwrap_or_else(|| {
            self.exhausted = true;
            Row::end_of_stream(Some(self.key_map.clone()))
        });
        self.window_mut("read_row")?.add(row)
    }

    /// Write the active row. The schema is recorded before the first row.
    pub fn write_row(&mut self) -> Result<()> {
        self.mode
            .require(OpenState::Write, &self.name, "write_row")?;
        if !self.metadata_written {
            self.interface.write_metadata(&self.variables)?;
            self.metadata_written = true;
        }
        self.interface.write_row(&self.active_row)?;
        let mut written = self.active_row.clone();
        written.set_last_row(false);
        self.window_mut("write_row")?.add(written)
    }

    /// Release the storage. Closing a closed data set does nothing.
    pub fn close(&mut self) -> Result<()> {
        let mode = std::mem::take(&mut self.mode);
        let mut outcome = Ok(());
        if mode == OpenState::Write && !self.metadata_written {
            outcome = self.interface.write_metadata(&self.variables);
            self.metadata_written = outcome.is_ok();
        }
        let closed = self.interface.close();
        self.row_set = None;
        self.primed = false;
        self.active_row = Row::blank(self.key_map.clone());
        if mode != OpenState::Closed {
            tracing::debug!(data_set = %self.name, was = %mode, "Data set closed");
        }
        outcome.and(closed)
    }

    // Row access

    fn window(&self) -> Result<&RowSet> {
        self.row_set
            .as_ref()
            .ok_or_else(|| self.mode.mismatch(OpenState::Read, &self.name, "window"))
    }

    fn window_mut(&mut self, operation: &'static str) -> Result<&mut RowSet> {
        let mode = self.mode;
        match self.row_set.as_mut() {
            Some(window) => Ok(window),
            None => Err(mode.mismatch(OpenState::Read, &self.name, operation)),
        }
    }

    /// The current row in read mode, otherwise the active row.
    pub fn row(&self) -> &Row {
        match (&self.row_set, self.mode) {
            (Some(window), OpenState::Read) => window.current(),
            _ => &self.active_row,
        }
    }

    pub fn row_mut(&mut self) -> &mut Row {
        match (&mut self.row_set, self.mode) {
            (Some(window), OpenState::Read) => window.current_mut(),
            _ => &mut self.active_row,
        }
    }

    pub fn get<'a>(&self, field: impl Into<Field<'a>>) -> Result<&Value> {
        self.row().get(field)
    }

    pub fn set<'a>(&mut self, field: impl Into<Field<'a>>, value: impl Into<Value>) -> Result<()> {
        self.row_mut().set(field, value)
    }

    pub fn set_values(&mut self, values: Vec<Value>) -> Result<()> {
        self.row_mut().set_values(values)
    }

    /// Copy values from the current row of `source` by variable name.
    ///
    /// With `fields`, only those names are copied and each must exist on both
    /// sides. Without, every name the two schemas share is copied.
    pub fn copy_from(&mut self, source: &DataSet, fields: Option<&[&str]>) -> Result<()> {
        let names: Vec<&str> = match fields {
            Some(fields) => fields.to_vec(),
            None => self
                .variables
                .keys()
                .into_iter()
                .filter(|name| source.variables.contains(name))
                .collect(),
        };
        let from = source.row();
        let mut copied = Vec::with_capacity(names.len());
        for name in names {
            copied.push((self.row().position(name)?, from.get(name)?.clone()));
        }
        let to = self.row_mut();
        for (position, value) in copied {
            to.set(position, value)?;
        }
        Ok(())
    }

    /// Row `n` positions behind the current one. Non-positive `n` looks ahead.
    pub fn lag(&self, n: isize) -> Result<&Row> {
        if n <= 0 {
            let ahead = n.checked_neg().ok_or_else(|| self.outside_window(isize::MAX))?;
            return self.lead(ahead);
        }
        let found = match self.mode {
            OpenState::Read => self.window()?.lag(n.unsigned_abs()),
            OpenState::Write => self.window()?.lag(n.unsigned_abs() - 1),
            OpenState::Closed => {
                return Err(self.mode.mismatch(OpenState::Read, &self.name, "lag"));
            }
        };
        found.ok_or_else(|| self.outside_window(-n))
    }

    /// Row `n` positions ahead of the current one. Negative `n` looks behind.
    pub fn lead(&self, n: isize) -> Result<&Row> {
        if n < 0 {
            let behind = n.checked_neg().ok_or_else(|| self.outside_window(n))?;
            return self.lag(behind);
        }
        let found = match self.mode {
            OpenState::Read => self.window()?.lead(n.unsigned_abs()),
            OpenState::Write => (n == 0).then_some(&self.active_row),
            OpenState::Closed => {
                return Err(self.mode.mismatch(OpenState::Read, &self.name, "lead"));
            }
        };
        found.ok_or_else(|| self.outside_window(n))
    }

    fn outside_window(&self, offset: isize) -> DataStepError {
        let (lag_rows, lead_rows) = self
            .row_set
            .as_ref()
            .map_or((0, 0), |w| (w.lag_rows(), w.lead_rows()));
        StateError::OutsideWindow {
            target: self.name.clone(),
            offset,
            lag_rows,
            lead_rows,
        }
        .into()
    }

    // By-group flags

    /// Whether the current row starts a group at by-group level `level`.
    pub fn first(&self, level: usize) -> bool {
        self.row_set.as_ref().is_some_and(|w| w.first(level))
    }

    /// Whether the current row ends a group at by-group level `level`.
    pub fn last(&self, level: usize) -> bool {
        self.row_set.as_ref().is_some_and(|w| w.last(level))
    }

    pub fn first_by(&self, name: &str) -> Result<bool> {
        Ok(self.first(self.by_level(name)?))
    }

    pub fn last_by(&self, name: &str) -> Result<bool> {
        Ok(self.last(self.by_level(name)?))
    }

    fn by_level(&self, name: &str) -> Result<usize> {
        self.row_set
            .as_ref()
            .and_then(|w| w.by_group_keys().iter().position(|k| k == name))
            .ok_or_else(|| {
                SchemaError::UnknownByGroupVariable {
                    name: name.to_string(),
                    data_set: self.name.clone(),
                }
                .into()
            })
    }

    /// Whether the current row is the final row of the stream.
    pub fn last_row(&self) -> bool {
        self.row().last_row()
    }

    /// Whether reading can still produce a data row.
    pub fn has_more(&self) -> bool {
        self.mode == OpenState::Read && !(self.primed && self.row().last_row())
    }
}

impl Drop for DataSet {
    fn drop(&mut self) {
        if self.is_open()
            && let Err(e) = self.close()
        {
            tracing::warn!(data_set = %self.name, error = %e, "Failed to close data set on drop");
        }
    }
}
