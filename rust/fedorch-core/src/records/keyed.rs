//! Ordered keyed records.
//!
//! See the [records module] documentation since this is a private module anyways.
//!
//! [records module]: crate::records

use std::{iter::FromIterator, vec};

use serde::{de::Error as _, Deserialize, Deserializer, Serialize};

/// An ordered mapping from names to values.
///
/// Entries keep their insertion order, which is also the order in which they are encoded.
/// Inserting an existing key replaces the value in place. Decoding fails on duplicate keys.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct KeyedRecord<V> {
    entries: Vec<(String, V)>,
}

impl<V> Default for KeyedRecord<V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<V> KeyedRecord<V> {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value and returns the value it replaced, if any.
    pub fn insert(&mut self, key: impl Into<String>, value: V) -> Option<V> {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    /// Inserts a value, builder style.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<V>) -> Self {
        self.insert(key, value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries
            .iter()
            .find_map(|(k, v)| if k == key { Some(v) } else { None })
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&mut self, key: &str) -> Option<V> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Checks whether both records have the same set of keys, regardless of their order.
    pub fn has_same_keys<W>(&self, other: &KeyedRecord<W>) -> bool {
        self.len() == other.len() && self.keys().all(|key| other.contains_key(key))
    }
}

impl<K: Into<String>, V> FromIterator<(K, V)> for KeyedRecord<V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Self::new();
        for (key, value) in iter {
            record.insert(key, value);
        }
        record
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for KeyedRecord<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entries = Vec::<(String, V)>::deserialize(deserializer)?;
        let mut record = Self {
            entries: Vec::with_capacity(entries.len()),
        };
        for (key, value) in entries {
            if record.contains_key(&key) {
                return Err(D::Error::custom(format!("duplicate key `{}`", key)));
            }
            record.entries.push((key, value));
        }
        Ok(record)
    }
}

impl<V> IntoIterator for KeyedRecord<V> {
    type Item = (String, V);
    type IntoIter = vec::IntoIter<(String, V)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
