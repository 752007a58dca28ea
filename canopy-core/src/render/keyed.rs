//! Keyed diff planning.
//!
//! Given the keys of the old and new children, [`plan`] (or [`plan_mixed`]
//! when some children have no key) decides which old children are
//! removed, which are reused at each new position, and which of the
//! reused ones must move. Survivors whose old positions form the
//! longest increasing subsequence stay put; only the rest move, so the
//! number of moves is minimal.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use tracing::warn;

use crate::error::{Error, Result};

/// The outcome of diffing two key sequences.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Plan {
    /// Old indices whose keys are gone, ascending.
    pub removed: Vec<usize>,
    /// For each new position, the old index it reuses, if any.
    pub sources: Vec<Option<usize>>,
    /// For each new position, whether the reused child must be moved.
    pub moved: Vec<bool>,
}

impl Plan {
    pub fn moves(&self) -> usize {
        self.moved.iter().filter(|&&moved| moved).count()
    }

    /// Number of new positions without an old counterpart.
    pub fn insertions(&self) -> usize {
        self.sources.iter().filter(|source| source.is_none()).count()
    }
}

/// Plan the transition from `old` to `new`.
///
/// Duplicate keys in either sequence are rejected with
/// [`Error::DuplicateKey`].
pub fn plan<K>(old: &[K], new: &[K]) -> Result<Plan>
where
    K: Eq + Hash + fmt::Display,
{
    let old: Vec<Option<&K>> = old.iter().map(Some).collect();
    let new: Vec<Option<&K>> = new.iter().map(Some).collect();
    plan_mixed(&old, &new)
}

/// Plan the transition between sibling lists where only some children
/// carry a key.
///
/// Keyed children are matched by key wherever they sit. Unkeyed children
/// are matched in order against the unkeyed children of the old list, the
/// first with the first and so on. A keyed child never reuses an unkeyed
/// one or the other way round.
pub fn plan_mixed<K>(old: &[Option<K>], new: &[Option<K>]) -> Result<Plan>
where
    K: Eq + Hash + fmt::Display,
{
    let new_index = index_keys(keyed(new))?;
    // Only checked for duplicates
    index_keys(keyed(old))?;

    let mut unkeyed_new = new
        .iter()
        .enumerate()
        .filter(|(_, key)| key.is_none())
        .map(|(pos, _)| pos);

    let mut sources = vec![None; new.len()];
    let mut removed = Vec::new();
    for (old_pos, key) in old.iter().enumerate() {
        let target = match key {
            Some(key) => new_index.get(key).copied(),
            None => unkeyed_new.next(),
        };
        match target {
            Some(new_pos) => sources[new_pos] = Some(old_pos),
            None => removed.push(old_pos),
        }
    }

    // Old positions of the survivors, in new order
    let (positions, survivors): (Vec<usize>, Vec<usize>) = sources
        .iter()
        .enumerate()
        .filter_map(|(new_pos, source)| source.map(|old_pos| (new_pos, old_pos)))
        .unzip();

    let mut moved = vec![false; new.len()];
    for &new_pos in &positions {
        moved[new_pos] = true;
    }
    for stay in longest_increasing_subsequence(&survivors) {
        moved[positions[stay]] = false;
    }

    Ok(Plan {
        removed,
        sources,
        moved,
    })
}

fn keyed<K>(keys: &[Option<K>]) -> impl Iterator<Item = (usize, &K)> {
    keys.iter()
        .enumerate()
        .filter_map(|(pos, key)| key.as_ref().map(|key| (pos, key)))
}

fn index_keys<'a, K>(keys: impl Iterator<Item = (usize, &'a K)>) -> Result<HashMap<&'a K, usize>>
where
    K: Eq + Hash + fmt::Display + 'a,
{
    let mut index = HashMap::new();
    for (pos, key) in keys {
        if index.insert(key, pos).is_some() {
            warn!(%key, "duplicate key among siblings");
            return Err(Error::DuplicateKey {
                key: key.to_string(),
            });
        }
    }
    Ok(index)
}

/// Indices (into `values`) of one longest strictly increasing subsequence.
pub fn longest_increasing_subsequence(values: &[usize]) -> Vec<usize> {
    // tails[k]: index of the smallest tail of an increasing run of length k + 1
    let mut tails: Vec<usize> = Vec::new();
    let mut previous = vec![None; values.len()];

    for (i, &value) in values.iter().enumerate() {
        let len = tails.partition_point(|&t| values[t] < value);
        if len > 0 {
            previous[i] = Some(tails[len - 1]);
        }
        if len == tails.len() {
            tails.push(i);
        } else {
            tails[len] = i;
        }
    }

    let mut result = Vec::with_capacity(tails.len());
    let mut cursor = tails.last().copied();
    while let Some(i) = cursor {
        result.push(i);
        cursor = previous[i];
    }
    result.reverse();
    result
}

// ---- Tests ----
