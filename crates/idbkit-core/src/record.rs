//! Records as returned by store operations

use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::key::RecordId;

/// Field holding a record's primary key.
pub const ID_FIELD: &str = "id";

/// Schemaless record payload.
pub type Document = Map<String, Value>;

/// An application value merged with its primary key.
///
/// Serializes flat: `{"id": 1, ...data}`. `T` must serialize to a JSON
/// object and should not carry its own `id` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record<T> {
    pub id: RecordId,
    #[serde(flatten)]
    pub data: T,
}

impl<T> Record<T> {
    pub fn new(id: RecordId, data: T) -> Self {
        Self { id, data }
    }

    pub fn into_inner(self) -> T {
        self.data
    }
}

impl<T> Deref for Record<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.data
    }
}

impl<T> DerefMut for Record<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        title: String,
    }

    #[test]
    fn test_record_serializes_flat() {
        let record = Record::new(7, Note { title: "hi".into() });
        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            json!({"id": 7, "title": "hi"})
        );
        assert_eq!(record.title, "hi");
    }

    #[test]
    fn test_document_record_keeps_other_fields() {
        let record: Record<Document> =
            serde_json::from_value(json!({"id": 3, "a": 1, "b": [true]})).unwrap();
        assert_eq!(record.id, 3);
        assert_eq!(record.len(), 2);
        assert!(!record.contains_key(ID_FIELD));
    }
}
