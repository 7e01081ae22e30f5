//! Typed field paths
//!
//! Callers address item fields with the JSON-path-ish syntax used by the
//! launcher (`login.password`, `fields[2].value`). A [`FieldPath`] keeps
//! the segments typed so bracket indices and dotted indices end up as the
//! same lookup, and renders back to the dot-index form.

use serde_json::Value;
use std::fmt;

/// One step of a field path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Object key
    Key(String),
    /// Array index
    Index(usize),
}

/// A parsed field path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldPath {
    segments: Vec<Segment>,
}

impl FieldPath {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a caller-supplied path. `fields[2].value` and `fields.2.value`
    /// both yield `[Key(fields), Index(2), Key(value)]`; a leading `$.` is
    /// accepted and ignored.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let raw = raw.strip_prefix("$.").unwrap_or(raw);
        let normalized = raw.replace('[', ".").replace(']', "");

        let segments = normalized
            .split('.')
            .filter(|part| !part.is_empty())
            .map(|part| match part.parse::<usize>() {
                Ok(index) => Segment::Index(index),
                Err(_) => Segment::Key(part.to_string()),
            })
            .collect();

        Self { segments }
    }

    /// Append an object key. The key is taken verbatim, even if it is
    /// numeric or contains dots.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.segments.push(Segment::Key(key.into()));
        self
    }

    /// Append an array index
    pub fn index(mut self, index: usize) -> Self {
        self.segments.push(Segment::Index(index));
        self
    }

    /// Append every segment of `other`
    pub fn join(mut self, other: &FieldPath) -> Self {
        self.segments.extend(other.segments.iter().cloned());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Walk `root` along the path. Index segments also address objects whose
    /// key is the decimal index, and key segments that are numeric address
    /// arrays, mirroring how dotted paths treat both.
    pub fn lookup<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        self.segments.iter().try_fold(root, |current, segment| match (segment, current) {
            (Segment::Key(key), Value::Object(map)) => map.get(key),
            (Segment::Key(key), Value::Array(items)) => {
                key.parse::<usize>().ok().and_then(|i| items.get(i))
            }
            (Segment::Index(index), Value::Array(items)) => items.get(*index),
            (Segment::Index(index), Value::Object(map)) => map.get(&index.to_string()),
            _ => None,
        })
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            match segment {
                Segment::Key(key) => write!(f, "{key}")?,
                Segment::Index(index) => write!(f, "{index}")?,
            }
        }
        Ok(())
    }
}

/// The path of the TOTP seed inside a login item
pub fn totp_seed_path() -> FieldPath {
    FieldPath::new().key("login").key("totp")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bracket_index_normalizes_to_dot_form() {
        let path = FieldPath::parse("fields[2].value");
        assert_eq!(path.to_string(), "fields.2.value");
        assert_eq!(
            path.segments(),
            &[
                Segment::Key("fields".into()),
                Segment::Index(2),
                Segment::Key("value".into())
            ]
        );
        assert_eq!(path, FieldPath::parse("fields.2.value"));
    }

    #[test]
    fn test_parse_strips_root_marker_and_empty_parts() {
        assert_eq!(FieldPath::parse("$.login.password").to_string(), "login.password");
        assert_eq!(FieldPath::parse("").segments().len(), 0);
        assert!(FieldPath::parse("  ").is_empty());
    }

    #[test]
    fn test_lookup_through_arrays() {
        let item = json!({
            "login": {"uris": [{"uri": "https://a.example"}, {"uri": "https://b.example"}]},
            "fields": [{"name": "pin", "value": "1234"}]
        });

        let uri = FieldPath::parse("login.uris[1].uri").lookup(&item);
        assert_eq!(uri, Some(&json!("https://b.example")));

        let pin = FieldPath::parse("fields.0.value").lookup(&item);
        assert_eq!(pin, Some(&json!("1234")));

        assert!(FieldPath::parse("fields[3].value").lookup(&item).is_none());
        assert!(FieldPath::parse("login.password").lookup(&item).is_none());
    }

    #[test]
    fn test_builder_keeps_keys_verbatim() {
        let snapshot = json!({"user.with.dots": {"7": "seven"}});
        let path = FieldPath::new().key("user.with.dots").index(7);
        assert_eq!(path.lookup(&snapshot), Some(&json!("seven")));
    }

    #[test]
    fn test_join() {
        let base = FieldPath::new().key("ciphers_u1").key("item-1");
        let full = base.join(&FieldPath::parse("fields[0].value"));
        assert_eq!(full.to_string(), "ciphers_u1.item-1.fields.0.value");
    }

    #[test]
    fn test_totp_seed_path() {
        assert_eq!(totp_seed_path().to_string(), "login.totp");
    }
}
