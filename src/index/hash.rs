//! # Non-Unique Hash Index
//!
//! An in-memory, equality-only index over a single column. Each distinct
//! column value maps to the list of row keys carrying it.
//!
//! ## Backing Map
//!
//! The bucket map is a hash map when the column type has a total ordering
//! that agrees with equality. For types where comparison and equality
//! diverge (`Double`: signed zero, NaN), buckets live in an ordered map
//! driven by the explicit value comparator instead, so probes find the
//! stored representative even when bit patterns differ.
//!
//! ## Cost
//!
//! `MAX` unless every indexed column is probed by equality; then a flat `2`.
//! The optimizer therefore only ever picks this index for exact-match
//! predicates, where it beats every scan.

use std::collections::BTreeMap;

use eyre::Result;
use hashbrown::HashMap;
use smallvec::SmallVec;

use super::{mask, Index};
use crate::error::DbError;
use crate::types::{Row, SqlType, Value};

type Bucket = SmallVec<[i64; 4]>;

#[derive(Debug)]
enum Buckets {
    Hash(HashMap<Value, Bucket>),
    Ordered(BTreeMap<Value, Bucket>),
}

impl Buckets {
    fn get(&self, key: &Value) -> Option<&Bucket> {
        match self {
            Buckets::Hash(m) => m.get(key),
            Buckets::Ordered(m) => m.get(key),
        }
    }

    fn get_mut_or_insert(&mut self, key: Value) -> &mut Bucket {
        match self {
            Buckets::Hash(m) => m.entry(key).or_default(),
            Buckets::Ordered(m) => m.entry(key).or_default(),
        }
    }

    fn get_mut(&mut self, key: &Value) -> Option<&mut Bucket> {
        match self {
            Buckets::Hash(m) => m.get_mut(key),
            Buckets::Ordered(m) => m.get_mut(key),
        }
    }

    fn remove(&mut self, key: &Value) -> Option<Bucket> {
        match self {
            Buckets::Hash(m) => m.remove(key),
            Buckets::Ordered(m) => m.remove(key),
        }
    }
}

/// Equality-only, non-unique in-memory index.
#[derive(Debug)]
pub struct NonUniqueHashIndex {
    id: u32,
    name: String,
    column_index: usize,
    column_type: SqlType,
    total_ordering: bool,
    rows: Buckets,
    row_count: u64,
}

impl NonUniqueHashIndex {
    pub fn new(id: u32, name: impl Into<String>, column_index: usize, column_type: SqlType) -> Self {
        let total_ordering = column_type.has_total_ordering();
        Self {
            id,
            name: name.into(),
            column_index,
            column_type,
            total_ordering,
            rows: Self::fresh_buckets(total_ordering),
            row_count: 0,
        }
    }

    fn fresh_buckets(total_ordering: bool) -> Buckets {
        if total_ordering {
            Buckets::Hash(HashMap::new())
        } else {
            Buckets::Ordered(BTreeMap::new())
        }
    }

    pub fn column_index(&self) -> usize {
        self.column_index
    }

    pub fn add(&mut self, row: &Row) {
        let key = row.value(self.column_index as i32);
        self.rows.get_mut_or_insert(key).push(row.key());
        self.row_count += 1;
    }

    pub fn remove(&mut self, row: &Row) {
        if self.row_count == 1 {
            // last row in the table
            self.rows = Self::fresh_buckets(self.total_ordering);
            self.row_count = 0;
            return;
        }
        let key = row.value(self.column_index as i32);
        let emptied = match self.rows.get_mut(&key) {
            Some(bucket) => {
                if bucket.len() == 1 {
                    true
                } else {
                    if let Some(pos) = bucket.iter().position(|&k| k == row.key()) {
                        bucket.remove(pos);
                    }
                    false
                }
            }
            None => false,
        };
        if emptied {
            // last row with this key
            self.rows.remove(&key);
        }
        self.row_count -= 1;
    }

    /// Equality probe: both bounds must be present and equal. The probe value
    /// is coerced to the column's declared type before lookup.
    pub fn find(&self, first: Option<&Value>, last: Option<&Value>) -> Result<Vec<i64>> {
        let (first, last) = match (first, last) {
            (Some(f), Some(l)) => (f, l),
            (f, l) => {
                return Err(DbError::internal(format!(
                    "hash index probe needs both bounds: {f:?} {l:?}"
                )))
            }
        };
        if first.compare(last) != std::cmp::Ordering::Equal {
            return Err(DbError::internal("hash index probe bounds differ"));
        }
        // the incoming search may carry a similar but different type, e.g.
        // an INT probe against a LONG column
        let probe = first.convert_to(self.column_type)?;
        Ok(self
            .rows
            .get(&probe)
            .map(|b| b.iter().copied().collect())
            .unwrap_or_default())
    }

    pub fn truncate(&mut self) {
        self.rows = Self::fresh_buckets(self.total_ordering);
        self.row_count = 0;
    }
}

impl Index for NonUniqueHashIndex {
    fn id(&self) -> u32 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn row_count(&self) -> u64 {
        self.row_count
    }

    fn get_cost(&self, masks: &[u32]) -> f64 {
        let mask_for_column = masks.get(self.column_index).copied().unwrap_or(0);
        if mask_for_column & mask::EQUALITY != mask::EQUALITY {
            return f64::MAX;
        }
        2.0
    }

    fn can_scan(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(key: i64, v: Value) -> Row {
        Row::new(vec![v], key)
    }

    #[test]
    fn add_and_find_by_equality() {
        let mut index = NonUniqueHashIndex::new(3, "t_name", 0, SqlType::Long);
        index.add(&row(1, Value::Long(10)));
        index.add(&row(2, Value::Long(10)));
        index.add(&row(3, Value::Long(20)));

        let probe = Value::Long(10);
        let hits = index.find(Some(&probe), Some(&probe)).unwrap();
        assert_eq!(hits, vec![1, 2]);
    }

    #[test]
    fn probe_is_coerced_to_column_type() {
        let mut index = NonUniqueHashIndex::new(3, "t_name", 0, SqlType::Long);
        index.add(&row(1, Value::Long(42)));

        let probe = Value::Int(42);
        let hits = index.find(Some(&probe), Some(&probe)).unwrap();
        assert_eq!(hits, vec![1]);
    }

    #[test]
    fn double_column_uses_ordered_backing() {
        let mut index = NonUniqueHashIndex::new(3, "t_val", 0, SqlType::Double);
        assert!(matches!(index.rows, Buckets::Ordered(_)));

        index.add(&row(1, Value::Double(1.5)));
        let probe = Value::Double(1.5);
        assert_eq!(index.find(Some(&probe), Some(&probe)).unwrap(), vec![1]);
    }

    #[test]
    fn mismatched_bounds_are_rejected() {
        let index = NonUniqueHashIndex::new(3, "t_name", 0, SqlType::Long);

        assert!(index.find(Some(&Value::Long(1)), None).is_err());
        assert!(index
            .find(Some(&Value::Long(1)), Some(&Value::Long(2)))
            .is_err());
    }

    #[test]
    fn remove_drops_bucket_when_last_key_goes() {
        let mut index = NonUniqueHashIndex::new(3, "t_name", 0, SqlType::Long);
        index.add(&row(1, Value::Long(10)));
        index.add(&row(2, Value::Long(10)));
        index.add(&row(3, Value::Long(20)));

        index.remove(&row(3, Value::Long(20)));

        let probe = Value::Long(20);
        assert!(index.find(Some(&probe), Some(&probe)).unwrap().is_empty());
        assert_eq!(index.row_count(), 2);
    }

    #[test]
    fn removing_last_row_resets() {
        let mut index = NonUniqueHashIndex::new(3, "t_name", 0, SqlType::Long);
        index.add(&row(1, Value::Long(10)));

        index.remove(&row(1, Value::Long(10)));

        assert_eq!(index.row_count(), 0);
        let probe = Value::Long(10);
        assert!(index.find(Some(&probe), Some(&probe)).unwrap().is_empty());
    }

    #[test]
    fn cost_is_two_for_equality_and_max_otherwise() {
        let index = NonUniqueHashIndex::new(3, "t_name", 0, SqlType::Long);

        assert_eq!(index.get_cost(&[mask::EQUALITY]), 2.0);
        assert_eq!(index.get_cost(&[mask::START]), f64::MAX);
        assert_eq!(index.get_cost(&[]), f64::MAX);
    }
}
