use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const TEST_TAG_KEY: &str = "test";

/// Flat object tag map. Written to the service as a URL-encoded query string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(BTreeMap<String, String>);

impl TagSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Adds every default whose key is not already present. Existing values
    /// always win.
    #[must_use]
    pub fn with_defaults(mut self, defaults: &TagSet) -> Self {
        for (key, value) in &defaults.0 {
            self.0.entry(key.clone()).or_insert_with(|| value.clone());
        }
        self
    }

    #[must_use]
    pub fn to_query_string(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.0.iter())
            .finish()
    }

    #[must_use]
    pub fn from_query_string(query: &str) -> Self {
        Self(
            url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect(),
        )
    }
}

impl From<BTreeMap<String, String>> for TagSet {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, String)> for TagSet {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Tags every test-owned file carries so lifecycle rules can expire them.
#[must_use]
pub fn default_test_file_tags() -> TagSet {
    TagSet::new().with(TEST_TAG_KEY, "true")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_never_overwrite() -> Result<(), String> {
        let defaults = TagSet::new().with("test", "true").with("team", "perf");
        let merged = TagSet::new().with("test", "false").with_defaults(&defaults);
        if merged.get("test") != Some("false") {
            return Err("existing tag was overwritten".to_owned());
        }
        if merged.get("team") != Some("perf") {
            return Err("missing default tag".to_owned());
        }
        Ok(())
    }

    #[test]
    fn query_string_is_url_encoded() -> Result<(), String> {
        let tags = TagSet::new().with("owner", "a b&c").with("test", "true");
        let query = tags.to_query_string();
        if query != "owner=a+b%26c&test=true" {
            return Err(format!("unexpected query string {}", query));
        }
        if TagSet::from_query_string(&query) != tags {
            return Err("query string did not decode to the same tags".to_owned());
        }
        Ok(())
    }
}
