//! # datastep-core
//!
//! Streaming data-step engine: sequential row cursors over tabular data sets
//! with lead/lag windows, by-group first/last detection, N-way interleave,
//! key-ordered merge and bounded-memory external sort.
//!
//! Data sets live in a [`DataLibrary`] and are read and written through
//! pluggable [`Interface`]s. The native format stores each data set as a
//! gzip-compressed MessagePack header file plus a data file.
//!
//! ```no_run
//! use datastep_core::{CanonicalLibrary, DataLibrary, data_step};
//!
//! # fn main() -> datastep_core::Result<()> {
//! let lib = CanonicalLibrary::new("data");
//! let mut sales = lib.get("sales")?;
//! data_step::read(&mut sales, &["region"], |ds| {
//!     if ds.last(0) {
//!         println!("{} ends here", ds.get("region")?);
//!     }
//!     Ok(())
//! })?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod data_set;
pub mod data_step;
pub mod error;
pub mod interface;
pub mod library;
pub mod logging;
pub mod row;
pub mod row_set;
pub mod sort;
pub mod value;
pub mod variable_set;

pub use config::{EngineConfig, LoggingConfig, load_config};
pub use data_set::{DataSet, ReadOptions};
pub use error::{DataStepError, Result, SchemaError, StateError};
pub use interface::{
    BasicInterface, CanonicalInterface, CsvOptions, DelimitedTextInterface, Interface, LineEnding,
    OpenState, ShellInterface,
};
pub use library::{BasicLibrary, CanonicalLibrary, DataLibrary, DelimitedTextLibrary, ShellLibrary};
pub use row::{Field, KeyMap, Row, RowKind};
pub use row_set::RowSet;
pub use sort::{SortKey, SortOptions, SortSummary, external_sort};
pub use value::{Value, compare_values};
pub use variable_set::{ColumnType, Variable, VariableMeta, VariableSet};
