//! Ordered header lists (request headers, response headers, and trailers).

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD_NO_PAD;

/// Suffix marking a binary-valued metadata key.
pub const BINARY_SUFFIX: &str = "-bin";

/// An ordered list of header key/value pairs.
///
/// Keys are normalized to lowercase ASCII. Insertion order is preserved
/// because it is load-bearing on the wire: pseudo-headers must precede
/// regular headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: Vec<(String, String)>,
}

impl Metadata {
    /// Create empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create empty metadata with room for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Append a key/value pair, keeping any existing values for the key.
    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into().to_ascii_lowercase();
        self.entries.push((key, value.into()));
    }

    /// Replace every value for `key` with a single value, keeping the position
    /// of the first occurrence.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into().to_ascii_lowercase();
        let value = value.into();
        match self.entries.iter().position(|(k, _)| *k == key) {
            Some(idx) => {
                self.entries[idx].1 = value;
                let mut seen = false;
                self.entries.retain(|(k, _)| {
                    if *k != key {
                        return true;
                    }
                    let keep = !seen;
                    seen = true;
                    keep
                });
            }
            None => self.entries.push((key, value)),
        }
    }

    /// Append a binary value under a `-bin` key, base64 encoded.
    ///
    /// The suffix is added when missing.
    pub fn append_bin(&mut self, key: impl Into<String>, value: &[u8]) {
        let mut key = key.into();
        if !key.to_ascii_lowercase().ends_with(BINARY_SUFFIX) {
            key.push_str(BINARY_SUFFIX);
        }
        self.append(key, STANDARD_NO_PAD.encode(value));
    }

    /// Replace every value for a `-bin` key with one base64-encoded value.
    pub fn insert_bin(&mut self, key: impl Into<String>, value: &[u8]) {
        let mut key = key.into();
        if !key.to_ascii_lowercase().ends_with(BINARY_SUFFIX) {
            key.push_str(BINARY_SUFFIX);
        }
        self.insert(key, STANDARD_NO_PAD.encode(value));
    }

    /// Get the first value for a key.
    pub fn get(&self, key: &str) -> Option<&str> {
        let key = key.to_ascii_lowercase();
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Decode the first value of a `-bin` key.
    ///
    /// Both padded and unpadded base64 are accepted, as peers differ.
    pub fn get_bin(&self, key: &str) -> Option<Vec<u8>> {
        let value = self.get(key)?;
        STANDARD_NO_PAD.decode(value.trim_end_matches('=')).ok()
    }

    /// Get all values for a key, in insertion order.
    pub fn get_all<'a>(&'a self, key: &str) -> impl Iterator<Item = &'a str> + 'a {
        let key = key.to_ascii_lowercase();
        self.entries
            .iter()
            .filter(move |(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Check if a key exists.
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Remove all values for a key, returning them in order.
    pub fn remove(&mut self, key: &str) -> Vec<String> {
        let key = key.to_ascii_lowercase();
        let mut removed = Vec::new();
        self.entries.retain(|(k, v)| {
            if *k == key {
                removed.push(v.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Iterate over all entries in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Iterate over the non-pseudo entries (keys not starting with `:`).
    pub fn regular(&self) -> impl Iterator<Item = (&str, &str)> {
        self.iter().filter(|(k, _)| !k.starts_with(':'))
    }

    /// Append every entry of `other`, preserving its order.
    pub fn extend(&mut self, other: Metadata) {
        self.entries.extend(other.entries);
    }

    /// Check if metadata is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get the number of entries (including duplicates).
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut metadata = Metadata::new();
        for (key, value) in iter {
            metadata.append(key, value);
        }
        metadata
    }
}

impl IntoIterator for Metadata {
    type Item = (String, String);
    type IntoIter = std::vec::IntoIter<(String, String)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
