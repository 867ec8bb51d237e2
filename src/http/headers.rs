//! Header field model: one name/value pair with a lower-cased lookup key and
//! a lazily tokenized value, aggregated into an insertion-ordered block with
//! a single start line.

use std::sync::OnceLock;

/// One HTTP header field.
///
/// The lookup key is the lower-cased name, computed at construction. The
/// value is tokenized lazily on first access: split on commas and linear
/// whitespace, empty tokens dropped.
///
/// # Examples
///
/// ```
/// use wiregate::HeaderField;
///
/// let field = HeaderField::new("Transfer-Encoding", "gzip, chunked");
/// assert_eq!(field.key(), "transfer-encoding");
/// assert_eq!(field.first_token(), Some("gzip"));
/// assert_eq!(field.tokens(), ["gzip", "chunked"]);
/// ```
#[derive(Debug)]
pub struct HeaderField {
    name: String,
    value: String,
    key: String,
    tokens: OnceLock<Vec<String>>,
}

impl HeaderField {
    #[inline]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let key = name.to_ascii_lowercase();

        Self {
            name,
            value: value.into(),
            key,
            tokens: OnceLock::new(),
        }
    }

    /// Returns the field name as it appeared on the wire.
    #[inline(always)]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the raw field value.
    #[inline(always)]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Returns the lower-cased lookup key.
    #[inline(always)]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the value split into tokens (comma/whitespace separated,
    /// empties dropped). Tokenization happens once, on first call.
    pub fn tokens(&self) -> &[String] {
        self.tokens.get_or_init(|| {
            self.value
                .split(|c: char| c == ',' || c == ' ' || c == '\t')
                .filter(|t| !t.is_empty())
                .map(str::to_owned)
                .collect()
        })
    }

    /// Returns the first value token, if any.
    #[inline]
    pub fn first_token(&self) -> Option<&str> {
        self.tokens().first().map(String::as_str)
    }
}

impl Clone for HeaderField {
    fn clone(&self) -> Self {
        // Tokens are cheap to recompute; the clone starts untokenized.
        Self::new(self.name.clone(), self.value.clone())
    }
}

impl PartialEq for HeaderField {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.value == other.value
    }
}

/// An ordered collection of header fields plus the message start line.
///
/// Fields keep insertion order; lookup is by lower-cased name. At most one
/// stored field per key: a repeated `put` replaces the value in place,
/// keeping the original position (last write wins).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderBlock {
    start_line: String,
    fields: Vec<HeaderField>,
}

impl HeaderBlock {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears every field and resets the start line.
    pub fn init(&mut self, start_line: impl Into<String>) {
        self.start_line = start_line.into();
        self.fields.clear();
    }

    /// Returns the message start line.
    #[inline(always)]
    pub fn start_line(&self) -> &str {
        &self.start_line
    }

    /// Stores one field. Replaces an existing field with the same
    /// (case-insensitive) name in place.
    pub fn put(&mut self, field: HeaderField) {
        match self.fields.iter_mut().find(|f| f.key() == field.key()) {
            Some(existing) => *existing = field,
            None => self.fields.push(field),
        }
    }

    /// Looks up a field by name, case-insensitively.
    pub fn get(&self, name: &str) -> Option<&HeaderField> {
        let key = name.to_ascii_lowercase();
        self.fields.iter().find(|f| f.key() == key)
    }

    /// Returns the raw value of the named field, if present.
    #[inline]
    pub fn value(&self, name: &str) -> Option<&str> {
        self.get(name).map(HeaderField::value)
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterates fields in insertion order.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &HeaderField> {
        self.fields.iter()
    }
}

#[cfg(test)]
mod headers_tests {
    use super::*;

    #[test]
    fn lookup_key_is_lowercase() {
        let field = HeaderField::new("Content-Length", "42");
        assert_eq!(field.key(), "content-length");
        assert_eq!(field.name(), "Content-Length");
        assert_eq!(field.value(), "42");
    }

    #[test]
    fn lazy_tokens() {
        #[rustfmt::skip]
        let cases = [
            ("chunked",          vec!["chunked"]),
            ("gzip, chunked",    vec!["gzip", "chunked"]),
            ("gzip,chunked",     vec!["gzip", "chunked"]),
            ("  keep-alive  ",   vec!["keep-alive"]),
            ("a , ,, b",         vec!["a", "b"]),
            ("",                 vec![]),
        ];

        for (value, expected) in cases {
            let field = HeaderField::new("X", value);
            assert_eq!(field.tokens(), expected.as_slice(), "value {value:?}");
            assert_eq!(field.first_token(), expected.first().copied());
        }
    }

    #[test]
    fn put_last_write_wins_keeps_position() {
        let mut block = HeaderBlock::new();
        block.init("GET / HTTP/1.1");
        block.put(HeaderField::new("Host", "a"));
        block.put(HeaderField::new("Accept", "*/*"));
        block.put(HeaderField::new("HOST", "b"));

        assert_eq!(block.len(), 2);
        assert_eq!(block.value("host"), Some("b"));

        let order: Vec<&str> = block.iter().map(HeaderField::key).collect();
        assert_eq!(order, ["host", "accept"]);
    }

    #[test]
    fn init_clears() {
        let mut block = HeaderBlock::new();
        block.init("HTTP/1.1 200 OK");
        block.put(HeaderField::new("Server", "x"));

        block.init("HTTP/1.1 404 Not Found");
        assert!(block.is_empty());
        assert_eq!(block.start_line(), "HTTP/1.1 404 Not Found");
        assert!(!block.contains("server"));
    }

    #[test]
    fn case_insensitive_get() {
        let mut block = HeaderBlock::new();
        block.put(HeaderField::new("Connection", "close"));

        for name in ["connection", "CONNECTION", "Connection", "cOnNeCtIoN"] {
            assert_eq!(block.value(name), Some("close"));
        }
        assert_eq!(block.value("content-length"), None);
    }
}
