//! Request parameters as received from the query string

use url::form_urlencoded;

pub const SELECT_PARAM: &str = "select";
pub const ORDER_PARAM: &str = "order";
pub const OR_PARAM: &str = "or";

/// Decoded query string pairs in the order they were sent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestParams {
    pairs: Vec<(String, String)>,
}

impl RequestParams {
    /// Parse a raw (still percent-encoded) query string. A leading `?` is ignored.
    #[must_use]
    pub fn parse(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        Self::from_pairs(form_urlencoded::parse(query.as_bytes()))
    }

    /// Build from already decoded pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            pairs: pairs
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        }
    }

    /// Append a pair, returning `self` for chaining
    #[must_use]
    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.pairs.push((name.to_string(), value.to_string()));
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// First value sent for `name`
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    #[must_use]
    pub fn select(&self) -> Option<&str> {
        self.get(SELECT_PARAM)
    }

    #[must_use]
    pub fn order(&self) -> Option<&str> {
        self.get(ORDER_PARAM)
    }

    /// Pairs that restrict rows: column filters and `or` groups, in order
    pub fn filters(&self) -> impl Iterator<Item = (&str, &str)> {
        self.iter()
            .filter(|(name, _)| *name == OR_PARAM || !is_reserved(name))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

fn is_reserved(name: &str) -> bool {
    matches!(name, SELECT_PARAM | ORDER_PARAM | OR_PARAM)
}
