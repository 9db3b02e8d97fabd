//! Record operations on a single store
//!
//! Every operation awaits the shared connection, opens its own transaction
//! on this store with the narrowest mode it needs, issues one request and
//! returns that request's outcome.

use std::collections::BTreeMap;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::database::Database;
use crate::engine::{Connection, StorageEngine, Transaction, TransactionMode};
use crate::error::{EngineError, Result};
use crate::key::{is_valid_record_id, KeyRange, RecordId};
use crate::record::{Document, Record, ID_FIELD};

type EngineTransaction<E> = <<E as StorageEngine>::Connection as Connection>::Transaction;

/// Exact-match filter for [`StoreHandle::get_by_fields`].
///
/// A record matches when every listed top-level field is present and equal
/// (as JSON) to the given value. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldFilter(BTreeMap<String, Value>);

impl FieldFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `field == value`.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn matches(&self, record: &Value) -> bool {
        self.0
            .iter()
            .all(|(field, expected)| record.get(field) == Some(expected))
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for FieldFilter {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl From<Document> for FieldFilter {
    fn from(map: Document) -> Self {
        Self(map.into_iter().collect())
    }
}

/// Handle to one store of a [`Database`].
///
/// Holds only the store name and a clone of the database; creating one is
/// free and never touches the engine.
pub struct StoreHandle<E: StorageEngine, T = Document> {
    database: Database<E>,
    name: String,
    _record: PhantomData<fn() -> T>,
}

impl<E: StorageEngine, T> Clone for StoreHandle<E, T> {
    fn clone(&self) -> Self {
        Self {
            database: self.database.clone(),
            name: self.name.clone(),
            _record: PhantomData,
        }
    }
}

impl<E: StorageEngine, T> StoreHandle<E, T> {
    pub(crate) fn new(database: Database<E>, name: String) -> Self {
        Self {
            database,
            name,
            _record: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn transaction(&self, mode: TransactionMode) -> Result<EngineTransaction<E>> {
        let connection = self.database.connection().await?;
        Ok(connection.transaction(&self.name, mode)?)
    }
}

impl<E, T> StoreHandle<E, T>
where
    E: StorageEngine,
    T: Serialize + DeserializeOwned,
{
    /// Insert `data` under a newly assigned id.
    ///
    /// An `id` field in the serialized payload is dropped so the store's key
    /// generator always assigns the key.
    pub async fn create(&self, data: T) -> Result<Record<T>> {
        let mut value = serde_json::to_value(&data)?;
        if let Some(object) = value.as_object_mut() {
            object.remove(ID_FIELD);
        }

        let tx = self.transaction(TransactionMode::ReadWrite).await?;
        let id = tx.add(value).await?;
        debug!(store = %self.name, id, "record created");
        Ok(Record::new(id, data))
    }

    /// The record stored at `id`, if any.
    pub async fn get_by_id(&self, id: RecordId) -> Result<Option<Record<T>>> {
        let tx = self.transaction(TransactionMode::ReadOnly).await?;
        tx.get(id).await?.map(decode).transpose()
    }

    /// Every record in the store, in id order.
    pub async fn get_all(&self) -> Result<Vec<Record<T>>> {
        let tx = self.transaction(TransactionMode::ReadOnly).await?;
        decode_all(tx.get_all().await?)
    }

    /// Remove the record at `id`. Removing an absent id succeeds.
    pub async fn delete(&self, id: RecordId) -> Result<()> {
        let tx = self.transaction(TransactionMode::ReadWrite).await?;
        tx.delete(id).await?;
        debug!(store = %self.name, id, "record deleted");
        Ok(())
    }

    /// Store `data` at `id`, replacing whatever was there.
    ///
    /// Ids above [`MAX_RECORD_ID`](crate::MAX_RECORD_ID) fail with `DataError`.
    pub async fn update(&self, id: RecordId, data: T) -> Result<Record<T>> {
        if !is_valid_record_id(id) {
            return Err(EngineError::data(format!("{} is not a valid record key", id)).into());
        }
        let mut value = serde_json::to_value(&data)?;
        if let Some(object) = value.as_object_mut() {
            object.insert(ID_FIELD.to_string(), Value::from(id));
        }

        let tx = self.transaction(TransactionMode::ReadWrite).await?;
        let id = tx.put(value).await?;
        debug!(store = %self.name, id, "record updated");
        Ok(Record::new(id, data))
    }

    /// Records whose indexed `field` matches `query`.
    ///
    /// `field` must have been declared with `index: true`. `query` is a
    /// single key or a [`KeyRange`].
    pub async fn get_by_field(
        &self,
        field: &str,
        query: impl Into<KeyRange>,
    ) -> Result<Vec<Record<T>>> {
        let range = query.into();
        let tx = self.transaction(TransactionMode::ReadOnly).await?;
        decode_all(tx.index_get_all(field, &range).await?)
    }

    /// Records matching every entry of `filter`.
    ///
    /// Walks the whole store with a cursor; no index is used, so cost grows
    /// with the store size.
    pub async fn get_by_fields(&self, filter: &FieldFilter) -> Result<Vec<Record<T>>> {
        let filter = filter.clone();
        let tx = self.transaction(TransactionMode::ReadOnly).await?;
        let matches = tx
            .scan(Box::new(move |record: &Value| filter.matches(record)))
            .await?;
        decode_all(matches)
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<Record<T>> {
    Ok(serde_json::from_value(value)?)
}

fn decode_all<T: DeserializeOwned>(values: Vec<Value>) -> Result<Vec<Record<T>>> {
    values.into_iter().map(decode).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_matches_all_pairs() {
        let filter = FieldFilter::new().with("a", 1).with("b", "x");
        assert!(filter.matches(&json!({"a": 1, "b": "x", "c": null})));
        assert!(!filter.matches(&json!({"a": 1, "b": "y"})));
        assert!(!filter.matches(&json!({"a": 1})));
        assert!(!filter.matches(&json!({"a": "1", "b": "x"})));
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(FieldFilter::new().matches(&json!({"anything": true})));
        assert!(FieldFilter::new().is_empty());
    }

    #[test]
    fn test_filter_from_document() {
        let doc: Document = serde_json::from_value(json!({"kind": "note"})).unwrap();
        let filter = FieldFilter::from(doc);
        assert_eq!(filter.len(), 1);
        assert_eq!(filter, [("kind", "note")].into_iter().collect::<FieldFilter>());
    }
}
