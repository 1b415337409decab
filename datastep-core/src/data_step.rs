//! Orchestration over data set lifecycles.
//!
//! Every function here opens the data sets it is given, drives the caller's
//! closure, and closes every data set on all paths, including when opening,
//! the closure, or reading fails. When the run already failed, close errors
//! are logged and the original error is returned; otherwise the first close
//! error is returned.

use crate::data_set::{DataSet, ReadOptions};
use crate::error::Result;
use crate::sort::{self, ResolvedKeys, SortKey, SortOptions, SortSummary};
use crate::value::Value;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// Lag depth used by [`create`].
pub const DEFAULT_WRITE_LAG: usize = 1;

/// Open `data_sets` for write, run `body`, then close them all.
pub fn create<F>(data_sets: &mut [&mut DataSet], body: F) -> Result<()>
where
    F: FnOnce(&mut [&mut DataSet]) -> Result<()>,
{
    let outcome = open_all(data_sets, |ds| ds.open_for_write(DEFAULT_WRITE_LAG))
        .and_then(|()| body(data_sets));
    finish(data_sets, outcome)
}

/// Read every row of `data_set`, grouped by `by`, handing each to `body`.
///
/// The closure sees the data set positioned on a real row, so by-group flags
/// and lag/lead rows are available. An empty data set never calls `body`.
pub fn read<F>(data_set: &mut DataSet, by: &[&str], mut body: F) -> Result<()>
where
    F: FnMut(&mut DataSet) -> Result<()>,
{
    let options = ReadOptions::default().with_by_groups(by.iter().copied());
    let outcome = data_set
        .open_for_read(options)
        .and_then(|()| drain(data_set, &mut body));
    finish(&mut [data_set], outcome)
}

fn drain<F>(data_set: &mut DataSet, body: &mut F) -> Result<()>
where
    F: FnMut(&mut DataSet) -> Result<()>,
{
    loop {
        if !advance(data_set)? {
            return Ok(());
        }
        body(data_set)?;
        if data_set.last_row() {
            return Ok(());
        }
    }
}

/// Step a data set open for read. False once only end-of-stream remains.
fn advance(data_set: &mut DataSet) -> Result<bool> {
    Ok(data_set.read_row()?.is_data())
}

/// Round-robin over `data_sets` until every one is exhausted.
///
/// Each pass advances every data set that still has rows by one and hands
/// it to `body` with its position in `data_sets`. No ordering by key is
/// imposed; see [`merge`] for key-ordered traversal.
pub fn interleave<F>(data_sets: &mut [&mut DataSet], by: &[&str], mut body: F) -> Result<()>
where
    F: FnMut(&mut DataSet, usize) -> Result<()>,
{
    let options = ReadOptions::default().with_by_groups(by.iter().copied());
    let outcome = open_all(data_sets, |ds| ds.open_for_read(options.clone()))
        .and_then(|()| round_robin(data_sets, &mut body));
    finish(data_sets, outcome)
}

fn round_robin<F>(data_sets: &mut [&mut DataSet], body: &mut F) -> Result<()>
where
    F: FnMut(&mut DataSet, usize) -> Result<()>,
{
    let mut done = vec![false; data_sets.len()];
    while done.contains(&false) {
        for (position, ds) in data_sets.iter_mut().enumerate() {
            if done[position] {
                continue;
            }
            if !advance(ds)? {
                done[position] = true;
                continue;
            }
            body(&mut **ds, position)?;
            done[position] = ds.last_row();
        }
    }
    Ok(())
}

/// Key-ordered merge of data sets already sorted on `by`.
///
/// Rows are handed to `body` smallest key tuple first; equal keys go to the
/// data set listed first, so the merge is stable. By-group flags for `by`
/// are available on each data set.
pub fn merge<F>(data_sets: &mut [&mut DataSet], by: &[&str], body: F) -> Result<()>
where
    F: FnMut(&mut DataSet, usize) -> Result<()>,
{
    let keys: Vec<SortKey> = by.iter().map(|name| SortKey::asc(*name)).collect();
    let options = ReadOptions::default().with_by_groups(by.iter().copied());
    merge_with(data_sets, &keys, options, body)
}

/// [`merge`] with explicit key directions and window.
pub fn merge_with<F>(
    data_sets: &mut [&mut DataSet],
    keys: &[SortKey],
    options: ReadOptions,
    mut body: F,
) -> Result<()>
where
    F: FnMut(&mut DataSet, usize) -> Result<()>,
{
    let outcome = open_all(data_sets, |ds| ds.open_for_read(options.clone()))
        .and_then(|()| merge_rows(data_sets, keys, &mut body));
    finish(data_sets, outcome)
}

/// Key of the current row of one merge input. Orders by key, then by input
/// position, so equal keys leave the heap in input order.
struct MergeHead<'a> {
    key: Vec<Value>,
    position: usize,
    descending: &'a [bool],
}

impl PartialEq for MergeHead<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MergeHead<'_> {}

impl PartialOrd for MergeHead<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeHead<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        sort::compare_keys(&self.key, &other.key, self.descending)
            .then_with(|| self.position.cmp(&other.position))
    }
}

fn merge_rows<F>(data_sets: &mut [&mut DataSet], keys: &[SortKey], body: &mut F) -> Result<()>
where
    F: FnMut(&mut DataSet, usize) -> Result<()>,
{
    let resolved = data_sets
        .iter()
        .map(|ds| ResolvedKeys::resolve(ds.variables(), keys))
        .collect::<Result<Vec<_>>>()?;
    let descending: Vec<bool> = keys.iter().map(|key| key.descending).collect();

    // Min-heap through Reverse; one entry per input that still has rows.
    let mut heap = BinaryHeap::with_capacity(data_sets.len());
    for (position, ds) in data_sets.iter_mut().enumerate() {
        if advance(ds)? {
            heap.push(Reverse(MergeHead {
                key: resolved[position].key_of(ds.row().values()),
                position,
                descending: &descending,
            }));
        }
    }

    while let Some(Reverse(head)) = heap.pop() {
        let position = head.position;
        let ds = &mut *data_sets[position];
        body(ds, position)?;
        if !ds.last_row() && advance(ds)? {
            heap.push(Reverse(MergeHead {
                key: resolved[position].key_of(ds.row().values()),
                position,
                descending: &descending,
            }));
        }
    }
    Ok(())
}

/// Sort `input` into `output`. See [`sort::external_sort`].
pub fn sort(input: &mut DataSet, output: &mut DataSet, options: &SortOptions) -> Result<SortSummary> {
    sort::external_sort(input, output, options)
}

fn open_all<F>(data_sets: &mut [&mut DataSet], mut open: F) -> Result<()>
where
    F: FnMut(&mut DataSet) -> Result<()>,
{
    for ds in data_sets.iter_mut() {
        open(&mut **ds)?;
    }
    Ok(())
}

fn finish(data_sets: &mut [&mut DataSet], outcome: Result<()>) -> Result<()> {
    let mut first_close_error = None;
    for ds in data_sets.iter_mut() {
        if let Err(e) = ds.close() {
            if outcome.is_err() || first_close_error.is_some() {
                tracing::warn!(data_set = %ds.name(), error = %e, "Failed to close data set");
            } else {
                first_close_error = Some(e);
            }
        }
    }
    outcome?;
    first_close_error.map_or(Ok(()), Err)
}
