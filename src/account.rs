use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    config::LedgerConfig,
    document::{DocumentKind, User, UserKey},
    query::QueryBuilder,
    store::{DocumentStore, QueryRecord, StoreError},
};

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("No user with email `{email}`")]
    NotFound { email: String },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Document `{key}` is not a valid user record: {source}")]
    MalformedDocument {
        key: String,
        source: serde_json::Error,
    },
}

/// Lowercase hex SHA-256 of the plaintext. Same input, same digest.
pub fn hash_password(plain: &str) -> String {
    hex::encode(Sha256::digest(plain.as_bytes()))
}

/// Fresh random document key, unrelated to any natural identifier.
pub fn generate_key() -> String {
    Uuid::new_v4().simple().to_string()
}

/// User record lifecycle on top of a [`DocumentStore`].
///
/// Users are addressed by random keys, so every lookup by email goes
/// through a selector query. Nothing stops two users sharing an email;
/// lookups then resolve to the first match in store order.
pub struct AccountManager<'a, S: ?Sized> {
    pub(crate) store: &'a mut S,
    pub(crate) config: &'a LedgerConfig,
}

impl<'a, S> AccountManager<'a, S>
where
    S: DocumentStore + ?Sized,
{
    pub fn new(store: &'a mut S, config: &'a LedgerConfig) -> Self {
        Self { store, config }
    }

    pub fn register(
        &mut self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<UserKey, AccountError> {
        let key = generate_key();
        let user = User {
            name: name.to_string(),
            email: email.to_string(),
            password_hash: hash_password(password),
            balance: self.config.base_grant,
            key: key.clone(),
        };
        self.put_user(user)?;
        info!(%email, %key, "registered user");
        Ok(key)
    }

    /// Returns the user matching both email and password, or `None`.
    ///
    /// A wrong password and an unknown email look the same to the caller.
    pub fn login(&self, email: &str, password: &str) -> Result<Option<User>, AccountError> {
        let query = QueryBuilder::<User>::new()
            .add_selector("Email", email)
            .add_selector("PasswordHash", hash_password(password))
            .build();
        let user = self.store.first(&query)?.map(decode_user).transpose()?;
        debug!(%email, found = user.is_some(), "login attempt");
        Ok(user)
    }

    pub fn lookup_by_email(&self, email: &str) -> Result<User, AccountError> {
        let query = QueryBuilder::<User>::new()
            .add_selector("Email", email)
            .build();
        match self.store.first(&query)? {
            Some(record) => decode_user(record),
            None => Err(AccountError::NotFound {
                email: email.to_string(),
            }),
        }
    }

    /// Direct get by store key. `None` if the key is absent or holds another kind.
    pub fn lookup_by_key(&self, key: &str) -> Result<Option<User>, AccountError> {
        let Some(value) = self.store.get(key)? else {
            return Ok(None);
        };
        User::decode(&value).map_err(|source| AccountError::MalformedDocument {
            key: key.to_string(),
            source,
        })
    }

    /// Writes the user back under its own key.
    pub fn put_user(&mut self, user: User) -> Result<(), AccountError> {
        let key = user.key.clone();
        let bytes = user
            .encode()
            .map_err(|source| AccountError::MalformedDocument {
                key: key.clone(),
                source,
            })?;
        self.store.put(&key, bytes)?;
        Ok(())
    }
}

fn decode_user(record: QueryRecord) -> Result<User, AccountError> {
    let malformed = |source: serde_json::Error| AccountError::MalformedDocument {
        key: record.key.clone(),
        source,
    };
    match User::decode(&record.value) {
        Ok(Some(user)) => Ok(user),
        // the query selected Doctype=user, anything else is a corrupt match
        Ok(None) => Err(malformed(<serde_json::Error as serde::de::Error>::custom(
            "Doctype is not `user`",
        ))),
        Err(source) => Err(malformed(source)),
    }
}
