use std::collections::BTreeMap;

use serde_json::Value;

use crate::query::Selector;

use super::{DocumentStore, QueryRecord, QueryResults, StoreError};

/// Keeps every document in an ordered map, queries scan it in key order.
///
/// Values that are not JSON objects (e.g. raw `setData` payloads) can be
/// read back by key but never match a query.
#[derive(Debug, Default, Clone)]
pub struct InMemoryDocumentStore {
    documents: BTreeMap<String, Vec<u8>>,
}

impl InMemoryDocumentStore {
    pub(crate) fn len(&self) -> usize {
        self.documents.len()
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.documents.get(key).cloned())
    }

    fn put(&mut self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.documents.insert(key.to_string(), value);
        Ok(())
    }

    fn query(&self, query: &str) -> Result<QueryResults<'_>, StoreError> {
        let selector = Selector::parse(query).map_err(|err| StoreError::InvalidQuery {
            query: query.to_string(),
            reason: err.to_string(),
        })?;
        Ok(Box::new(self.documents.iter().filter_map(
            move |(key, value)| {
                let document: Value = serde_json::from_slice(value).ok()?;
                selector.matches(&document).then(|| {
                    Ok::<_, StoreError>(QueryRecord {
                        key: key.clone(),
                        value: value.clone(),
                    })
                })
            },
        )))
    }
}
