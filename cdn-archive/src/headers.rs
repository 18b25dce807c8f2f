use std::collections::BTreeMap;
use std::iter::FromIterator;

/// Request headers as handed over by the host.
///
/// Names are matched case-insensitively. A repeated header keeps the last
/// value seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    pub fn new() -> Headers {
        Headers::default()
    }

    pub fn insert<K: AsRef<str>, V: Into<String>>(&mut self, name: K, value: V) {
        self.0
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    pub fn get<K: AsRef<str>>(&self, name: K) -> Option<&str> {
        self.0
            .get(&name.as_ref().to_ascii_lowercase())
            .map(|v| v.as_str())
    }

    pub fn contains<K: AsRef<str>>(&self, name: K) -> bool {
        self.get(name).is_some()
    }

    pub fn remove<K: AsRef<str>>(&mut self, name: K) -> Option<String> {
        self.0.remove(&name.as_ref().to_ascii_lowercase())
    }

    /// Iterate over `(lowercased name, value)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.insert(k, v);
        }
        headers
    }
}
