//! Bounded-memory external sort.
//!
//! Phase one streams the input in chunks of at most `split_size` rows, sorts
//! each chunk in memory with a stable comparison on the composite key, and
//! spills it to a canonical data set in a scratch directory. Phase two merges
//! the chunks with [`data_step::merge_with`], which holds one row per chunk.
//! At most `merge_fan_in` chunks are merged at once; beyond that, groups of
//! chunks are first merged into longer intermediate chunks.
//!
//! Keys compare with [`compare_values`]; a descending key reverses its
//! component only, and ties cascade to the next key.

use crate::data_set::{DataSet, ReadOptions};
use crate::data_step;
use crate::error::{DataStepError, Result, SchemaError};
use crate::library::{CanonicalLibrary, DataLibrary};
use crate::value::{Value, compare_values};
use crate::variable_set::VariableSet;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::PathBuf;

pub const DEFAULT_SPLIT_SIZE: usize = 100_000;
/// Most chunks opened together by one merge pass.
pub const DEFAULT_MERGE_FAN_IN: usize = 64;

/// One component of a composite sort key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub name: String,
    #[serde(default)]
    pub descending: bool,
}

impl SortKey {
    pub fn asc(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            descending: false,
        }
    }

    pub fn desc(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            descending: true,
        }
    }

    /// Parse `name` (ascending) or `-name` (descending).
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let key = match text.strip_prefix('-') {
            Some(name) => Self::desc(name.trim()),
            None => Self::asc(text.strip_prefix('+').unwrap_or(text).trim()),
        };
        if key.name.is_empty() {
            return Err(DataStepError::invalid_input(format!(
                "empty sort key in '{text}'"
            )));
        }
        Ok(key)
    }

    /// Parse a comma separated key list such as `region,-amount`.
    pub fn parse_list(text: &str) -> Result<Vec<Self>> {
        text.split(',').map(Self::parse).collect()
    }
}

#[derive(Debug, Clone)]
pub struct SortOptions {
    pub keys: Vec<SortKey>,
    /// Maximum rows held in memory during phase one.
    pub split_size: usize,
    /// Parent of the scratch directory; the system temp dir when unset.
    pub work_dir: Option<PathBuf>,
    /// Most chunks merged at once. More chunks than this are merged in
    /// intermediate passes, so open files stay bounded.
    pub merge_fan_in: usize,
}

impl SortOptions {
    pub fn new(keys: Vec<SortKey>) -> Self {
        Self {
            keys,
            split_size: DEFAULT_SPLIT_SIZE,
            work_dir: None,
            merge_fan_in: DEFAULT_MERGE_FAN_IN,
        }
    }

    pub fn with_split_size(mut self, split_size: usize) -> Self {
        self.split_size = split_size;
        self
    }

    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(work_dir.into());
        self
    }

    pub fn with_merge_fan_in(mut self, merge_fan_in: usize) -> Self {
        self.merge_fan_in = merge_fan_in;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SortSummary {
    pub rows: u64,
    pub chunks: usize,
    pub largest_chunk: usize,
    /// Merge passes over the chunks, the final one included.
    pub merge_passes: usize,
}

/// Sort keys resolved to positions within one schema.
#[derive(Debug, Clone)]
pub struct ResolvedKeys {
    positions: Vec<(usize, bool)>,
}

impl ResolvedKeys {
    pub fn resolve(variables: &VariableSet, keys: &[SortKey]) -> Result<Self> {
        let positions = keys
            .iter()
            .map(|key| {
                variables
                    .position(&key.name)
                    .map(|p| (p, key.descending))
                    .ok_or_else(|| {
                        SchemaError::UnknownField {
                            name: key.name.clone(),
                        }
                        .into()
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { positions })
    }

    /// Compare two rows of the same schema.
    pub fn compare(&self, a: &[Value], b: &[Value]) -> Ordering {
        for &(position, descending) in &self.positions {
            let ordering = match (a.get(position), b.get(position)) {
                (Some(x), Some(y)) => compare_values(x, y),
                (x, y) => x.is_some().cmp(&y.is_some()),
            };
            let ordering = if descending { ordering.reverse() } else { ordering };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    /// The key values of a row, in key order. Missing positions read as null.
    pub fn key_of(&self, values: &[Value]) -> Vec<Value> {
        self.positions
            .iter()
            .map(|&(position, _)| values.get(position).cloned().unwrap_or(Value::Null))
            .collect()
    }
}

/// Compare two key tuples component by component; `descending[i]` reverses
/// component `i` only.
pub fn compare_keys(a: &[Value], b: &[Value], descending: &[bool]) -> Ordering {
    for ((x, y), &desc) in a.iter().zip(b).zip(descending) {
        let ordering = compare_values(x, y);
        let ordering = if desc { ordering.reverse() } else { ordering };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Sort `input` into `output` without holding more than `split_size` rows.
///
/// `output` inherits every variable of `input` it does not already declare
/// and must be closed. Both data sets are closed on return.
pub fn external_sort(
    input: &mut DataSet,
    output: &mut DataSet,
    options: &SortOptions,
) -> Result<SortSummary> {
    if options.split_size == 0 {
        return Err(DataStepError::invalid_input("split size must be at least 1"));
    }
    if options.merge_fan_in < 2 {
        return Err(DataStepError::invalid_input("merge fan-in must be at least 2"));
    }
    let variables = input.variables().clone();
    let resolved = ResolvedKeys::resolve(&variables, &options.keys)?;
    output.like(input)?;

    let scratch = match &options.work_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            tempfile::Builder::new().prefix("datastep-sort").tempdir_in(dir)?
        }
        None => tempfile::Builder::new().prefix("datastep-sort").tempdir()?,
    };
    let library = CanonicalLibrary::new(scratch.path()).with_compression_level(1);

    tracing::info!(
        input = %input.name(),
        split_size = options.split_size,
        keys = options.keys.len(),
        "Sort phase 1: splitting input into sorted chunks"
    );
    let mut summary = SortSummary::default();
    let mut chunk_names = Vec::new();
    let mut buffer: Vec<Vec<Value>> = Vec::with_capacity(options.split_size.min(4096));
    data_step::read(input, &[], |ds| {
        buffer.push(ds.row().to_vec());
        summary.rows += 1;
        if buffer.len() >= options.split_size {
            spill(&library, &variables, &resolved, &mut buffer, &mut chunk_names, &mut summary)?;
        }
        Ok(())
    })?;
    if !buffer.is_empty() {
        spill(&library, &variables, &resolved, &mut buffer, &mut chunk_names, &mut summary)?;
    }

    tracing::info!(
        output = %output.name(),
        rows = summary.rows,
        chunks = summary.chunks,
        fan_in = options.merge_fan_in,
        "Sort phase 2: merging chunks"
    );
    while chunk_names.len() > options.merge_fan_in {
        summary.merge_passes += 1;
        let mut merged = Vec::with_capacity(chunk_names.len().div_ceil(options.merge_fan_in));
        for group in chunk_names.chunks(options.merge_fan_in) {
            let name = format!("pass-{:03}-{:06}", summary.merge_passes, merged.len());
            let mut target = library.build_replace(&name)?;
            target.merge_variables(&variables)?;
            merge_chunks(&library, group, &mut target, &options.keys)?;
            for chunk in group {
                library.delete(chunk)?;
            }
            merged.push(name);
        }
        tracing::debug!(
            pass = summary.merge_passes,
            chunks = merged.len(),
            "Merged chunks into intermediate runs"
        );
        chunk_names = merged;
    }
    summary.merge_passes += 1;
    merge_chunks(&library, &chunk_names, output, &options.keys)?;

    tracing::info!(
        rows = summary.rows,
        chunks = summary.chunks,
        largest_chunk = summary.largest_chunk,
        merge_passes = summary.merge_passes,
        "Sort complete"
    );
    Ok(summary)
}

/// Merge the named sorted chunks into `output`, holding one row per chunk.
fn merge_chunks(
    library: &CanonicalLibrary,
    names: &[String],
    output: &mut DataSet,
    keys: &[SortKey],
) -> Result<()> {
    let mut chunks = names
        .iter()
        .map(|name| library.get(name))
        .collect::<Result<Vec<_>>>()?;
    let mut inputs: Vec<&mut DataSet> = chunks.iter_mut().collect();
    let window = ReadOptions::default().with_lag_rows(0).with_lead_rows(0);
    data_step::create(&mut [output], |outputs| {
        let out = &mut *outputs[0];
        data_step::merge_with(&mut inputs, keys, window, |chunk, _| {
            out.copy_from(chunk, None)?;
            out.write_row()
        })
    })
}

fn spill(
    library: &CanonicalLibrary,
    variables: &VariableSet,
    resolved: &ResolvedKeys,
    buffer: &mut Vec<Vec<Value>>,
    chunk_names: &mut Vec<String>,
    summary: &mut SortSummary,
) -> Result<()> {
    buffer.sort_by(|a, b| resolved.compare(a, b));

    let name = format!("chunk-{:06}", chunk_names.len());
    let mut chunk = library.build_replace(&name)?;
    chunk.merge_variables(variables)?;
    let len = buffer.len();
    data_step::create(&mut [&mut chunk], |sets| {
        for values in buffer.drain(..) {
            sets[0].set_values(values)?;
            sets[0].write_row()?;
        }
        Ok(())
    })?;

    tracing::debug!(chunk = %name, rows = len, "Spilled sorted chunk");
    chunk_names.push(name);
    summary.chunks += 1;
    summary.largest_chunk = summary.largest_chunk.max(len);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::CanonicalLibrary;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    fn fill(lib: &CanonicalLibrary, name: &str, rows: &[(Value, Value)]) -> DataSet {
        let mut ds = lib.build_replace(name).unwrap();
        ds.define_variables(|vars| {
            vars.declare("k", Default::default());
            vars.declare("seq", Default::default());
        })
        .unwrap();
        data_step::create(&mut [&mut ds], |sets| {
            for (k, seq) in rows {
                sets[0].set_values(vec![k.clone(), seq.clone()])?;
                sets[0].write_row()?;
            }
            Ok(())
        })
        .unwrap();
        lib.get(name).unwrap()
    }

    fn collect(ds: &mut DataSet) -> Vec<Vec<Value>> {
        let mut rows = Vec::new();
        data_step::read(ds, &[], |ds| {
            rows.push(ds.row().to_vec());
            Ok(())
        })
        .unwrap();
        rows
    }

    #[test]
    fn test_parse_keys() {
        assert_eq!(
            SortKey::parse_list("region, -amount,+id").unwrap(),
            vec![SortKey::asc("region"), SortKey::desc("amount"), SortKey::asc("id")]
        );
        assert!(SortKey::parse("-").is_err());
    }

    #[test]
    fn test_sort_across_chunks_is_stable() {
        let dir = TempDir::new().unwrap();
        let lib = CanonicalLibrary::new(dir.path());
        let data: Vec<(Value, Value)> = [3, 1, 2, 1, 3, 2, 1]
            .iter()
            .enumerate()
            .map(|(i, k)| (json!(k), json!(i)))
            .collect();
        let mut input = fill(&lib, "in", &data);
        let mut output = lib.build_replace("out").unwrap();

        let options = SortOptions::new(vec![SortKey::asc("k")])
            .with_split_size(3)
            .with_work_dir(dir.path().join("work"));
        let summary = external_sort(&mut input, &mut output, &options).unwrap();
        assert_eq!(
            summary,
            SortSummary {
                rows: 7,
                chunks: 3,
                largest_chunk: 3,
                merge_passes: 1,
            }
        );

        let mut sorted = lib.get("out").unwrap();
        let rows = collect(&mut sorted);
        let pairs: Vec<(i64, i64)> = rows
            .iter()
            .map(|r| (r[0].as_i64().unwrap(), r[1].as_i64().unwrap()))
            .collect();
        assert_eq!(
            pairs,
            vec![(1, 1), (1, 3), (1, 6), (2, 2), (2, 5), (3, 0), (3, 4)]
        );
    }

    #[test]
    fn test_sort_merges_in_bounded_passes() {
        let dir = TempDir::new().unwrap();
        let lib = CanonicalLibrary::new(dir.path());
        let data: Vec<(Value, Value)> = (0..40)
            .map(|i| (json!((i * 7) % 5), json!(i)))
            .collect();
        let mut input = fill(&lib, "in", &data);
        let mut output = lib.build_replace("out").unwrap();

        let work = dir.path().join("work");
        let options = SortOptions::new(vec![SortKey::asc("k")])
            .with_split_size(1)
            .with_merge_fan_in(3)
            .with_work_dir(&work);
        let summary = external_sort(&mut input, &mut output, &options).unwrap();
        // 40 chunks -> 14 -> 5 -> 2, then the final merge
        assert_eq!(summary.chunks, 40);
        assert_eq!(summary.merge_passes, 4);

        let rows = collect(&mut lib.get("out").unwrap());
        let pairs: Vec<(i64, i64)> = rows
            .iter()
            .map(|r| (r[0].as_i64().unwrap(), r[1].as_i64().unwrap()))
            .collect();
        let mut expected: Vec<(i64, i64)> = (0..40).map(|i| ((i * 7) % 5, i)).collect();
        expected.sort_by_key(|&(k, _)| k);
        assert_eq!(pairs, expected);
        assert_eq!(std::fs::read_dir(&work).unwrap().count(), 0);
    }

    #[test]
    fn test_sort_more_chunks_than_default_fan_in() {
        let dir = TempDir::new().unwrap();
        let lib = CanonicalLibrary::new(dir.path());
        let count = DEFAULT_MERGE_FAN_IN as i64 * 3 + 5;
        let data: Vec<(Value, Value)> = (0..count).rev().map(|i| (json!(i), json!(i))).collect();
        let mut input = fill(&lib, "in", &data);
        let mut output = lib.build_replace("out").unwrap();

        let options = SortOptions::new(vec![SortKey::asc("k")]).with_split_size(1);
        let summary = external_sort(&mut input, &mut output, &options).unwrap();
        assert_eq!(summary.chunks as i64, count);
        assert_eq!(summary.merge_passes, 2);

        let keys: Vec<i64> = collect(&mut lib.get("out").unwrap())
            .iter()
            .map(|r| r[0].as_i64().unwrap())
            .collect();
        assert_eq!(keys, (0..count).collect::<Vec<_>>());
    }

    #[test]
    fn test_sort_descending_with_nulls() {
        let dir = TempDir::new().unwrap();
        let lib = CanonicalLibrary::new(dir.path());
        let mut input = fill(
            &lib,
            "in",
            &[
                (json!("b"), json!(0)),
                (Value::Null, json!(1)),
                (json!("a"), json!(2)),
            ],
        );
        let mut output = lib.build_replace("out").unwrap();
        let options = SortOptions::new(vec![SortKey::desc("k")]);
        external_sort(&mut input, &mut output, &options).unwrap();

        let rows = collect(&mut lib.get("out").unwrap());
        let keys: Vec<Value> = rows.into_iter().map(|r| r[0].clone()).collect();
        assert_eq!(keys, vec![json!("b"), json!("a"), Value::Null]);
    }

    #[test]
    fn test_sort_empty_input() {
        let dir = TempDir::new().unwrap();
        let lib = CanonicalLibrary::new(dir.path());
        let mut input = fill(&lib, "in", &[]);
        let mut output = lib.build_replace("out").unwrap();
        let summary = external_sort(&mut input, &mut output, &SortOptions::new(vec![SortKey::asc("k")]))
            .unwrap();
        assert_eq!(
            summary,
            SortSummary {
                merge_passes: 1,
                ..SortSummary::default()
            }
        );
        let out = lib.get("out").unwrap();
        assert_eq!(out.variables().keys(), vec!["k", "seq"]);
    }

    #[test]
    fn test_sort_rejects_bad_options() {
        let dir = TempDir::new().unwrap();
        let lib = CanonicalLibrary::new(dir.path());
        let mut input = fill(&lib, "in", &[]);
        let mut output = lib.build_replace("out").unwrap();

        let zero = SortOptions::new(vec![SortKey::asc("k")]).with_split_size(0);
        assert!(matches!(
            external_sort(&mut input, &mut output, &zero).unwrap_err(),
            DataStepError::InvalidInput { .. }
        ));
        let narrow = SortOptions::new(vec![SortKey::asc("k")]).with_merge_fan_in(1);
        assert!(matches!(
            external_sort(&mut input, &mut output, &narrow).unwrap_err(),
            DataStepError::InvalidInput { .. }
        ));
        let unknown = SortOptions::new(vec![SortKey::asc("missing")]);
        assert!(matches!(
            external_sort(&mut input, &mut output, &unknown).unwrap_err(),
            DataStepError::Schema(SchemaError::UnknownField { .. })
        ));
    }
}
