//! Sliding window of rows with by-group boundary detection.
//!
//! A [`RowSet`] holds exactly `lag_rows + lead_rows + 1` rows. Offset 0 is the
//! current row, negative offsets are lag rows and positive offsets are lead
//! rows. Slots that have not received data yet hold padding rows.
//!
//! By-group flags are recomputed on every [`RowSet::add`]. For each grouping
//! key, outer to inner, the current row starts a group when its key differs
//! from the previous row's, and ends one when it differs from the next row's.
//! A boundary on an outer key is inherited by every inner key, and the final
//! row of the stream ends a group at every level.

use crate::error::Result;
use crate::row::Row;
use crate::value::compare_values;
use std::cmp::Ordering;
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct RowSet {
    lag_rows: usize,
    lead_rows: usize,
    by_groups: Vec<String>,
    slots: VecDeque<Row>,
    first: Vec<bool>,
    last: Vec<bool>,
}

impl RowSet {
    pub fn new(lag_rows: usize, lead_rows: usize, by_groups: Vec<String>) -> Self {
        Self::with_blank(lag_rows, lead_rows, by_groups, Row::padding(None))
    }

    /// Like [`RowSet::new`], filling the window with copies of `blank`.
    pub fn with_blank(lag_rows: usize, lead_rows: usize, by_groups: Vec<String>, blank: Row) -> Self {
        let slots = std::iter::repeat_n(blank, lag_rows + lead_rows + 1).collect();
        let groups = by_groups.len();
        Self {
            lag_rows,
            lead_rows,
            by_groups,
            slots,
            first: vec![false; groups],
            last: vec![false; groups],
        }
    }

    /// Push a row onto the leading edge of the window.
    ///
    /// The oldest lag row falls off and every other row moves one slot towards
    /// the lag side. Rows without a number are numbered after the row that
    /// previously held the leading edge.
    pub fn add(&mut self, mut row: Row) -> Result<()> {
        if row.row_number().is_none() {
            let prior = self.slots.back().and_then(Row::row_number).unwrap_or(0);
            row.set_row_number(prior + 1);
        }
        self.slots.pop_front();
        self.slots.push_back(row);

        if !self.by_groups.is_empty() {
            self.update_by_groups()?;
        }
        Ok(())
    }

    fn update_by_groups(&mut self) -> Result<()> {
        let current = self.current();
        let previous = self.previous();
        let next = self.next();

        let mut parent_first = false;
        let mut parent_last = false;
        let mut first = Vec::with_capacity(self.by_groups.len());
        let mut last = Vec::with_capacity(self.by_groups.len());
        for key in &self.by_groups {
            let is_first = parent_first || keys_differ(current, previous, key)?;
            let is_last = parent_last || current.last_row() || keys_differ(current, next, key)?;
            first.push(is_first);
            last.push(is_last);
            parent_first = is_first;
            parent_last = is_last;
        }
        self.first = first;
        self.last = last;
        Ok(())
    }

    pub fn current(&self) -> &Row {
        &self.slots[self.lag_rows]
    }

    pub fn current_mut(&mut self) -> &mut Row {
        &mut self.slots[self.lag_rows]
    }

    pub fn previous(&self) -> Option<&Row> {
        self.lag(1)
    }

    pub fn next(&self) -> Option<&Row> {
        self.lead(1)
    }

    /// Row `n` positions behind the current row.
    pub fn lag(&self, n: usize) -> Option<&Row> {
        if n > self.lag_rows {
            return None;
        }
        self.slots.get(self.lag_rows - n)
    }

    /// Row `n` positions ahead of the current row.
    pub fn lead(&self, n: usize) -> Option<&Row> {
        if n > self.lead_rows {
            return None;
        }
        self.slots.get(self.lag_rows + n)
    }

    /// Row at a signed offset from the current row.
    pub fn offset(&self, offset: isize) -> Option<&Row> {
        if offset < 0 {
            self.lag(offset.unsigned_abs())
        } else {
            self.lead(offset.unsigned_abs())
        }
    }

    /// Whether the current row starts a group at by-group level `key_index`.
    /// Always false when no such level is configured.
    pub fn first(&self, key_index: usize) -> bool {
        self.first.get(key_index).copied().unwrap_or(false)
    }

    /// Whether the current row ends a group at by-group level `key_index`.
    pub fn last(&self, key_index: usize) -> bool {
        self.last.get(key_index).copied().unwrap_or(false)
    }

    pub fn lag_rows(&self) -> usize {
        self.lag_rows
    }

    pub fn lead_rows(&self) -> usize {
        self.lead_rows
    }

    pub fn window_len(&self) -> usize {
        self.slots.len()
    }

    pub fn by_group_keys(&self) -> &[String] {
        &self.by_groups
    }

    pub fn iter(&self) -> impl Iterator<Item = &Row> {
        self.slots.iter()
    }
}

/// Padding, end-of-stream rows and missing neighbours never share a group.
/// Keys compare with the same equality merges and sorts use.
fn keys_differ(current: &Row, other: Option<&Row>, key: &str) -> Result<bool> {
    let Some(other) = other else {
        return Ok(true);
    };
    if !current.is_data() || !other.is_data() {
        return Ok(true);
    }
    Ok(compare_values(current.get(key)?, other.get(key)?) != Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::KeyMap;
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};
    use std::sync::Arc;

    fn key_map(names: &[&str]) -> Arc<KeyMap> {
        Arc::new(KeyMap::new(names.iter().map(|s| s.to_string()).collect()))
    }

    fn rows(map: &Arc<KeyMap>, data: Vec<Vec<Value>>) -> Vec<Row> {
        let count = data.len();
        data.into_iter()
            .enumerate()
            .map(|(i, values)| {
                let mut row = Row::with_key_map(values, map.clone()).unwrap();
                row.set_last_row(i + 1 == count);
                row
            })
            .collect()
    }

    /// Feed rows the way a reader does: prime the lead window, then one row
    /// per step, then end-of-stream rows. Returns the flags seen on each real row.
    fn drive(set: &mut RowSet, input: Vec<Row>, levels: usize) -> Vec<Vec<(bool, bool)>> {
        let map = input[0].key_map().cloned();
        let total = input.len();
        let mut feed = input.into_iter();
        let mut next_row = || feed.next().unwrap_or_else(|| Row::end_of_stream(map.clone()));

        for _ in 0..set.lead_rows() {
            set.add(next_row()).unwrap();
        }
        let mut seen = Vec::new();
        for _ in 0..total {
            set.add(next_row()).unwrap();
            seen.push((0..levels).map(|i| (set.first(i), set.last(i))).collect());
        }
        seen
    }

    #[test]
    fn test_simple_by_group_sequence() {
        let map = key_map(&["k", "v"]);
        let input = rows(
            &map,
            vec![
                vec![json!("A"), json!(1)],
                vec![json!("A"), json!(2)],
                vec![json!("B"), json!(3)],
            ],
        );
        let mut set = RowSet::new(1, 1, vec!["k".into()]);
        let seen = drive(&mut set, input, 1);
        assert_eq!(
            seen,
            vec![
                vec![(true, false)],
                vec![(false, true)],
                vec![(true, true)],
            ]
        );
    }

    #[test]
    fn test_outer_change_forces_inner_boundary() {
        let map = key_map(&["outer", "inner"]);
        // inner value repeats across the outer boundary
        let input = rows(
            &map,
            vec![
                vec![json!(1), json!("x")],
                vec![json!(2), json!("x")],
                vec![json!(2), json!("x")],
            ],
        );
        let mut set = RowSet::new(1, 1, vec!["outer".into(), "inner".into()]);
        let seen = drive(&mut set, input, 2);
        assert_eq!(seen[0], vec![(true, true), (true, true)]);
        assert_eq!(seen[1], vec![(true, false), (true, false)]);
        assert_eq!(seen[2], vec![(false, true), (false, true)]);
    }

    #[test]
    fn test_single_row_group_is_first_and_last() {
        let map = key_map(&["k"]);
        let input = rows(&map, vec![vec![json!("only")]]);
        let mut set = RowSet::new(1, 1, vec!["k".into()]);
        let seen = drive(&mut set, input, 1);
        assert_eq!(seen, vec![vec![(true, true)]]);
    }

    #[test]
    fn test_last_row_forces_last_at_every_level() {
        let map = key_map(&["a", "b"]);
        let mut set = RowSet::new(1, 0, vec!["a".into(), "b".into()]);
        let mut first = Row::with_key_map(vec![json!(1), json!(1)], map.clone()).unwrap();
        first.set_row_number(1);
        set.add(first).unwrap();

        let mut closing = Row::with_key_map(vec![json!(1), json!(1)], map.clone()).unwrap();
        closing.set_last_row(true);
        set.add(closing).unwrap();
        assert!(!set.first(0));
        assert!(set.last(0));
        assert!(set.last(1));
    }

    #[test]
    fn test_window_shift_and_numbering() {
        let map = key_map(&["v"]);
        let mut set = RowSet::new(2, 1, Vec::new());
        assert_eq!(set.window_len(), 4);
        for i in 1..=5 {
            set.add(Row::with_key_map(vec![json!(i)], map.clone()).unwrap())
                .unwrap();
            assert_eq!(set.window_len(), 4);
        }
        assert_eq!(set.current().get("v").unwrap(), &json!(4));
        assert_eq!(set.current().row_number(), Some(4));
        assert_eq!(set.previous().unwrap().row_number(), Some(3));
        assert_eq!(set.lag(2).unwrap().get("v").unwrap(), &json!(2));
        assert_eq!(set.next().unwrap().get("v").unwrap(), &json!(5));
        assert_eq!(set.offset(-1).unwrap().get("v").unwrap(), &json!(3));
        assert!(set.lag(3).is_none());
        assert!(set.lead(2).is_none());
    }

    #[test]
    fn test_padding_before_data() {
        let mut set = RowSet::new(1, 1, vec!["k".into()]);
        assert!(set.current().is_padding());
        assert!(set.previous().unwrap().is_padding());
        assert!(!set.first(0));
        set.add(Row::new(vec![json!(1)])).unwrap();
        // the only data row sits in the lead slot; current is still padding
        assert!(set.current().is_padding());
        assert!(set.first(0));
        assert!(set.last(0));
    }

    #[test]
    fn test_integer_and_float_keys_share_a_group() {
        let map = key_map(&["k"]);
        let input = rows(&map, vec![vec![json!(1)], vec![json!(1.0)], vec![json!(2)]]);
        let mut set = RowSet::new(1, 1, vec!["k".into()]);
        let seen = drive(&mut set, input, 1);
        assert_eq!(
            seen,
            vec![
                vec![(true, false)],
                vec![(false, true)],
                vec![(true, true)],
            ]
        );
    }

    #[test]
    fn test_no_by_groups_reports_false() {
        let set = RowSet::new(0, 0, Vec::new());
        assert!(!set.first(0));
        assert!(!set.last(3));
    }
}
