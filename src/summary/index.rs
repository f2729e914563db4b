//! Fixed-depth ordered multi-level mapping
//!
//! `MetricIndex` stores leaves under a tuple of `columns - 1` keys and can hand
//! back its contents either as full rows or grouped at a shallower depth,
//! where the last element of each row is the remaining sub-mapping.

use std::collections::btree_map::{self, BTreeMap};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    #[error("the index must have at least 2 columns")]
    TooFewColumns,
    #[error("wrong number of keys: received {received}, expected {expected}")]
    KeyArity { received: usize, expected: usize },
    #[error("depth {depth} is out of bounds for an index with {columns} columns")]
    DepthOutOfBounds { depth: usize, columns: usize },
}

/// A node of the index: either a leaf value or another level of keys
#[derive(Debug, Clone, PartialEq)]
pub enum IndexNode<K, V> {
    Leaf(V),
    Branch(BTreeMap<K, IndexNode<K, V>>),
}

/// Last element of a row: the leaf at full depth, the sub-mapping otherwise
#[derive(Debug, PartialEq)]
pub enum RowValue<'a, K, V> {
    Leaf(&'a V),
    Branch(&'a BTreeMap<K, IndexNode<K, V>>),
}

impl<'a, K: Ord, V> RowValue<'a, K, V> {
    /// Leaves directly under this row, keyed by their last key
    ///
    /// Only meaningful one level above the leaves; deeper branches are skipped.
    pub fn leaves(&self) -> Vec<(&'a K, &'a V)> {
        match *self {
            RowValue::Leaf(_) => Vec::new(),
            RowValue::Branch(map) => map
                .iter()
                .filter_map(|(key, node)| match node {
                    IndexNode::Leaf(value) => Some((key, value)),
                    IndexNode::Branch(_) => None,
                })
                .collect(),
        }
    }
}

#[derive(Debug, PartialEq)]
pub struct Row<'a, K, V> {
    pub keys: Vec<&'a K>,
    pub value: RowValue<'a, K, V>,
}

#[derive(Debug, Clone)]
pub struct MetricIndex<K, V> {
    columns: usize,
    root: BTreeMap<K, IndexNode<K, V>>,
}

impl<K: Ord + Clone, V> MetricIndex<K, V> {
    /// `columns` counts the keys plus the leaf value
    pub fn new(columns: usize) -> Result<Self, IndexError> {
        if columns < 2 {
            return Err(IndexError::TooFewColumns);
        }
        Ok(Self {
            columns,
            root: BTreeMap::new(),
        })
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Insert or overwrite the leaf stored under `keys`
    pub fn add(&mut self, keys: &[K], value: V) -> Result<(), IndexError> {
        let expected = self.columns - 1;
        if keys.len() != expected {
            return Err(IndexError::KeyArity {
                received: keys.len(),
                expected,
            });
        }

        let (last, path) = keys
            .split_last()
            .ok_or(IndexError::TooFewColumns)?;

        let mut level = &mut self.root;
        for key in path {
            let node = level
                .entry(key.clone())
                .or_insert_with(|| IndexNode::Branch(BTreeMap::new()));
            if let IndexNode::Leaf(_) = node {
                *node = IndexNode::Branch(BTreeMap::new());
            }
            level = match node {
                IndexNode::Branch(children) => children,
                IndexNode::Leaf(_) => unreachable!("leaf replaced by a branch above"),
            };
        }
        level.insert(last.clone(), IndexNode::Leaf(value));
        Ok(())
    }

    /// Rows grouped at `depth` keys
    ///
    /// `depth == columns - 1` (or `columns`) yields one row per leaf. A smaller
    /// depth yields one row per distinct key prefix with the sub-mapping as its
    /// value. Depth 0 yields a single row holding the whole index. The returned
    /// iterator borrows the index and can be recreated at will.
    pub fn rows(&self, depth: usize) -> Result<Rows<'_, K, V>, IndexError> {
        if depth > self.columns {
            return Err(IndexError::DepthOutOfBounds {
                depth,
                columns: self.columns,
            });
        }
        Ok(Rows {
            depth,
            root: Some(&self.root),
            stack: Vec::new(),
            keys: Vec::new(),
        })
    }
}

/// Depth-first traversal with an explicit stack of level iterators
pub struct Rows<'a, K, V> {
    depth: usize,
    root: Option<&'a BTreeMap<K, IndexNode<K, V>>>,
    stack: Vec<btree_map::Iter<'a, K, IndexNode<K, V>>>,
    keys: Vec<&'a K>,
}

impl<'a, K, V> Iterator for Rows<'a, K, V> {
    type Item = Row<'a, K, V>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(root) = self.root.take() {
            if self.depth == 0 {
                return Some(Row {
                    keys: Vec::new(),
                    value: RowValue::Branch(root),
                });
            }
            self.stack.push(root.iter());
        }

        loop {
            let level = self.stack.last_mut()?;
            match level.next() {
                None => {
                    self.stack.pop();
                    self.keys.pop();
                }
                Some((key, node)) => {
                    let mut keys = self.keys.clone();
                    keys.push(key);
                    match node {
                        IndexNode::Leaf(value) => {
                            return Some(Row {
                                keys,
                                value: RowValue::Leaf(value),
                            });
                        }
                        IndexNode::Branch(children) if keys.len() >= self.depth => {
                            return Some(Row {
                                keys,
                                value: RowValue::Branch(children),
                            });
                        }
                        IndexNode::Branch(children) => {
                            self.keys.push(key);
                            self.stack.push(children.iter());
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MetricIndex<&'static str, u64> {
        let mut index = MetricIndex::new(4).unwrap();
        index.add(&["plugin-a", "WP/6.4", "1.0"], 3).unwrap();
        index.add(&["plugin-a", "WP/6.4", "1.1"], 5).unwrap();
        index.add(&["plugin-a", "WP/6.3", "1.0"], 2).unwrap();
        index.add(&["plugin-b", "WP/6.4", "2.0"], 7).unwrap();
        index
    }

    #[test]
    fn test_requires_two_columns() {
        assert_eq!(
            MetricIndex::<String, u64>::new(1).unwrap_err(),
            IndexError::TooFewColumns
        );
    }

    #[test]
    fn test_add_checks_arity() {
        let mut index = MetricIndex::new(3).unwrap();
        assert_eq!(
            index.add(&["only-one"], 1).unwrap_err(),
            IndexError::KeyArity {
                received: 1,
                expected: 2
            }
        );
    }

    #[test]
    fn test_full_depth_rows() {
        let index = sample();
        let rows: Vec<(Vec<&str>, u64)> = index
            .rows(3)
            .unwrap()
            .map(|row| {
                let keys = row.keys.into_iter().copied().collect();
                match row.value {
                    RowValue::Leaf(value) => (keys, *value),
                    RowValue::Branch(_) => panic!("expected a leaf"),
                }
            })
            .collect();

        assert_eq!(
            rows,
            vec![
                (vec!["plugin-a", "WP/6.3", "1.0"], 2),
                (vec!["plugin-a", "WP/6.4", "1.0"], 3),
                (vec!["plugin-a", "WP/6.4", "1.1"], 5),
                (vec!["plugin-b", "WP/6.4", "2.0"], 7),
            ]
        );
    }

    #[test]
    fn test_grouped_rows() {
        let index = sample();
        let groups: Vec<(Vec<&str>, Vec<(&str, u64)>)> = index
            .rows(2)
            .unwrap()
            .map(|row| {
                let keys = row.keys.into_iter().copied().collect();
                let leaves = row.value.leaves().into_iter().map(|(k, v)| (*k, *v)).collect();
                (keys, leaves)
            })
            .collect();

        assert_eq!(
            groups,
            vec![
                (vec!["plugin-a", "WP/6.3"], vec![("1.0", 2)]),
                (vec!["plugin-a", "WP/6.4"], vec![("1.0", 3), ("1.1", 5)]),
                (vec!["plugin-b", "WP/6.4"], vec![("2.0", 7)]),
            ]
        );
    }

    #[test]
    fn test_rows_are_restartable_and_overwrite_leaves() {
        let mut index = sample();
        index.add(&["plugin-b", "WP/6.4", "2.0"], 9).unwrap();

        let first: Vec<_> = index.rows(1).unwrap().map(|row| row.keys).collect();
        let second: Vec<_> = index.rows(1).unwrap().map(|row| row.keys).collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);

        let last = index.rows(3).unwrap().last().unwrap();
        assert_eq!(last.value, RowValue::Leaf(&9));
    }

    #[test]
    fn test_depth_bounds() {
        let index = sample();
        assert_eq!(index.rows(0).unwrap().count(), 1);
        assert_eq!(index.rows(4).unwrap().count(), 4);
        assert!(matches!(
            index.rows(5),
            Err(IndexError::DepthOutOfBounds { depth: 5, columns: 4 })
        ));
    }
}
