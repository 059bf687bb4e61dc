use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Opaque identifier assigned by the TODO service on creation.
///
/// The service may encode ids as JSON numbers or strings; both decode to
/// the same textual form so they can be echoed back in `?id=`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TodoId(String);

impl TodoId {
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TodoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for TodoId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl<'de> Deserialize<'de> for TodoId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Number(serde_json::Number),
            Text(String),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Number(n) => Self(n.to_string()),
            RawId::Text(s) => Self(s),
        })
    }
}

/// One entry in the shared collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: TodoId,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_and_string_ids_decode_alike() {
        let items: Vec<TodoItem> = serde_json::from_str(
            r#"[{"id": 7, "text": "a"}, {"id": "7", "text": "b"}]"#,
        )
        .expect("decode");
        assert_eq!(items[0].id, items[1].id);
        assert_eq!(items[0].id.as_str(), "7");
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let item: TodoItem =
            serde_json::from_str(r#"{"id": "abc", "text": "x", "done": false}"#).expect("decode");
        assert_eq!(item.id, TodoId::new("abc"));
    }
}
