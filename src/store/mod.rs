use thiserror::Error;

pub mod in_memory_store;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store backend failed: {message}")]
    Backend { message: String },
    #[error("Store rejected query `{query}`: {reason}")]
    InvalidQuery { query: String, reason: String },
}

/// One match of a selector query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRecord {
    pub key: String,
    pub value: Vec<u8>,
}

/// Lazy, single-pass sequence of query matches. Reissue the query to start over.
pub type QueryResults<'a> = Box<dyn Iterator<Item = Result<QueryRecord, StoreError>> + 'a>;

/// Key-value store with selector queries over JSON documents.
///
/// This is the only thing the ledger knows about persistence. Writes are
/// not transactional across keys, every `put` stands on its own.
pub trait DocumentStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    fn put(&mut self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;

    fn query(&self, query: &str) -> Result<QueryResults<'_>, StoreError>;

    /// First match of `query`, if any.
    fn first(&self, query: &str) -> Result<Option<QueryRecord>, StoreError> {
        self.query(query)?.next().transpose()
    }
}
