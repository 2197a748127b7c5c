//! Keyed diff between desired and observed items.

use std::collections::BTreeMap;

/// Outcome of comparing a desired set against an observed set.
///
/// `create` keeps desired order; `update` and `delete` keep observed order
/// for the observed side. Callers that do not own the observed objects
/// exclusively ignore `delete`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyedDiff<D, O> {
    pub create: Vec<D>,
    pub update: Vec<(D, O)>,
    pub delete: Vec<O>,
}

impl<D, O> KeyedDiff<D, O> {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }
}

/// Match `desired` against `observed` by key.
///
/// - desired only: `create`
/// - both, and `drifted(d, o)`: `update`
/// - both, no drift: nothing
/// - observed only: `delete`
///
/// When several observed items share a key the first one is matched and the
/// rest count as observed-only.
pub fn keyed_diff<K, D, O, KD, KO, F>(
    desired: Vec<D>,
    observed: Vec<O>,
    desired_key: KD,
    observed_key: KO,
    drifted: F,
) -> KeyedDiff<D, O>
where
    K: Ord,
    KD: Fn(&D) -> K,
    KO: Fn(&O) -> K,
    F: Fn(&D, &O) -> bool,
{
    let mut by_key: BTreeMap<K, O> = BTreeMap::new();
    let mut delete = Vec::new();
    for item in observed {
        let key = observed_key(&item);
        if by_key.contains_key(&key) {
            delete.push(item);
        } else {
            by_key.insert(key, item);
        }
    }

    let mut create = Vec::new();
    let mut update = Vec::new();
    for item in desired {
        match by_key.remove(&desired_key(&item)) {
            None => create.push(item),
            Some(actual) if drifted(&item, &actual) => update.push((item, actual)),
            Some(_) => {}
        }
    }
    delete.extend(by_key.into_values());

    KeyedDiff {
        create,
        update,
        delete,
    }
}
