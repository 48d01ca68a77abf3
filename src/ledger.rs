use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    account::{AccountError, AccountManager, generate_key},
    config::LedgerConfig,
    document::{DocumentKind, Transaction, TransactionId, User},
    query::QueryBuilder,
    store::{DocumentStore, QueryRecord, StoreError},
};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Account(#[from] AccountError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("No user stored under key `{key}`")]
    UserKeyNotFound { key: String },
    #[error("Document `{key}` is not a valid transaction record: {source}")]
    MalformedDocument {
        key: String,
        source: serde_json::Error,
    },
    #[error("Amount must be positive, got {amount}")]
    NonPositiveAmount { amount: Decimal },
    #[error("Insufficient funds: balance is {balance}, transfer needs {amount}")]
    InsufficientFunds { balance: Decimal, amount: Decimal },
    #[error("Balance of `{email}` is out of range")]
    BalanceOverflow { email: String },
}

fn overflow(email: &str) -> LedgerError {
    LedgerError::BalanceOverflow {
        email: email.to_string(),
    }
}

/// One ledger entry as returned by the history queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Record")]
    pub record: Transaction,
}

/// Append-only transaction log plus the two ways of deriving a balance.
///
/// The cached `User::balance` is updated eagerly by [`TransactionLedger::transfer`],
/// the log can always be replayed instead. Writes are separate puts, so
/// an interrupted transfer leaves the log ahead of the cache;
/// [`TransactionLedger::reconcile`] brings the cache back in line.
///
/// Two hosts transferring against the same account at once can still lose
/// a cached update (both read, both write). Only the log is safe from that.
pub struct TransactionLedger<'a, S: ?Sized> {
    accounts: AccountManager<'a, S>,
}

impl<'a, S> TransactionLedger<'a, S>
where
    S: DocumentStore + ?Sized,
{
    pub fn new(store: &'a mut S, config: &'a LedgerConfig) -> Self {
        Self {
            accounts: AccountManager::new(store, config),
        }
    }

    fn config(&self) -> &LedgerConfig {
        self.accounts.config
    }

    /// Records a transfer, then moves `amount` between the cached balances.
    ///
    /// Both users are resolved, the policy is checked and both new balances
    /// are computed before anything is written; a failure there leaves the
    /// store untouched. Once the log entry
    /// is written, a failed balance write aborts the rest and the error is
    /// returned with the log entry in place.
    ///
    /// Sending to yourself records the entry and leaves the balance alone.
    pub fn transfer(
        &mut self,
        sender_email: &str,
        receiver_email: &str,
        amount: Decimal,
    ) -> Result<TransactionId, LedgerError> {
        let policy = self.config().transfer_policy;
        if policy.reject_non_positive && amount <= Decimal::ZERO {
            return Err(LedgerError::NonPositiveAmount { amount });
        }

        let mut sender = self.accounts.lookup_by_email(sender_email)?;
        let receiver = if sender_email == receiver_email {
            None
        } else {
            Some(self.accounts.lookup_by_email(receiver_email)?)
        };
        if policy.reject_overdraft && sender.balance < amount {
            return Err(LedgerError::InsufficientFunds {
                balance: sender.balance,
                amount,
            });
        }

        let balances = match receiver {
            Some(mut receiver) => {
                sender.balance = sender
                    .balance
                    .checked_sub(amount)
                    .ok_or_else(|| overflow(sender_email))?;
                receiver.balance = receiver
                    .balance
                    .checked_add(amount)
                    .ok_or_else(|| overflow(receiver_email))?;
                Some((sender, receiver))
            }
            None => None,
        };

        let transaction = Transaction {
            sender_email: sender_email.to_string(),
            receiver_email: receiver_email.to_string(),
            amount,
            transaction_id: generate_key(),
            timestamp: Utc::now().to_rfc3339(),
        };
        let transaction_id = transaction.transaction_id.clone();
        self.append(transaction)?;

        match balances {
            Some((sender, receiver)) => {
                self.accounts.put_user(sender)?;
                self.accounts.put_user(receiver)?;
            }
            None => debug!(email = %sender_email, "self transfer, cached balance unchanged"),
        }

        info!(%transaction_id, %sender_email, %receiver_email, %amount, "transfer recorded");
        Ok(transaction_id)
    }

    fn append(&mut self, transaction: Transaction) -> Result<(), LedgerError> {
        let key = transaction.transaction_id.clone();
        let bytes = transaction
            .encode()
            .map_err(|source| LedgerError::MalformedDocument {
                key: key.clone(),
                source,
            })?;
        self.accounts.store.put(&key, bytes)?;
        Ok(())
    }

    /// Base grant plus everything ever received by `email`.
    pub fn compute_received_balance(&self, email: &str) -> Result<Decimal, LedgerError> {
        let received = self.sum_amounts("ReceiverEmail", email)?;
        self.config()
            .base_grant
            .checked_add(received)
            .ok_or_else(|| overflow(email))
    }

    /// Base grant minus everything ever sent by `email`. Receipts are not counted.
    pub fn compute_sent_balance(&self, email: &str) -> Result<Decimal, LedgerError> {
        let sent = self.sum_amounts("SenderEmail", email)?;
        self.config()
            .base_grant
            .checked_sub(sent)
            .ok_or_else(|| overflow(email))
    }

    /// Full replay: base grant, plus receipts, minus sends.
    pub fn compute_balance(&self, email: &str) -> Result<Decimal, LedgerError> {
        let received = self.sum_amounts("ReceiverEmail", email)?;
        let sent = self.sum_amounts("SenderEmail", email)?;
        self.config()
            .base_grant
            .checked_add(received)
            .and_then(|balance| balance.checked_sub(sent))
            .ok_or_else(|| overflow(email))
    }

    pub fn get_cached_balance(&self, email: &str) -> Result<Decimal, LedgerError> {
        Ok(self.accounts.lookup_by_email(email)?.balance)
    }

    /// Overwrites the cached balance with the replayed one and returns it.
    pub fn reconcile(&mut self, email: &str) -> Result<Decimal, LedgerError> {
        let replayed = self.compute_balance(email)?;
        let mut user = self.accounts.lookup_by_email(email)?;
        if user.balance != replayed {
            warn!(%email, cached = %user.balance, %replayed, "cached balance diverged from ledger");
            user.balance = replayed;
            self.accounts.put_user(user)?;
        }
        Ok(replayed)
    }

    /// Every transaction sent by `email`, in store order.
    pub fn sent_history(&self, email: &str) -> Result<Vec<HistoryEntry>, LedgerError> {
        self.transactions("SenderEmail", email)?.collect()
    }

    /// Every transaction received by the user stored under `user_key`.
    pub fn received_history(&self, user_key: &str) -> Result<Vec<HistoryEntry>, LedgerError> {
        let user: User = self.accounts.lookup_by_key(user_key)?.ok_or_else(|| {
            LedgerError::UserKeyNotFound {
                key: user_key.to_string(),
            }
        })?;
        self.transactions("ReceiverEmail", &user.email)?.collect()
    }

    fn sum_amounts(&self, field: &str, email: &str) -> Result<Decimal, LedgerError> {
        self.transactions(field, email)?
            .try_fold(Decimal::ZERO, |total, entry| -> Result<_, LedgerError> {
                total
                    .checked_add(entry?.record.amount)
                    .ok_or_else(|| overflow(email))
            })
    }

    fn transactions(
        &self,
        field: &str,
        email: &str,
    ) -> Result<impl Iterator<Item = Result<HistoryEntry, LedgerError>> + '_, LedgerError> {
        let query = QueryBuilder::<Transaction>::new()
            .add_selector(field, email)
            .build();
        let records = self.accounts.store.query(&query)?;
        Ok(records.map(|record| decode_transaction(record?)))
    }
}

fn decode_transaction(record: QueryRecord) -> Result<HistoryEntry, LedgerError> {
    match Transaction::decode(&record.value) {
        Ok(Some(transaction)) => Ok(HistoryEntry {
            key: record.key,
            record: transaction,
        }),
        Ok(None) => Err(LedgerError::MalformedDocument {
            key: record.key,
            source: <serde_json::Error as serde::de::Error>::custom("Doctype is not `transaction`"),
        }),
        Err(source) => Err(LedgerError::MalformedDocument {
            key: record.key,
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::prelude::FromPrimitive;

    use crate::{
        config::TransferPolicy,
        store::{QueryResults, in_memory_store::InMemoryDocumentStore},
    };

    use super::*;

    fn dec(value: i32) -> Decimal {
        Decimal::from_i32(value).unwrap()
    }

    fn register_alice_and_bob<S: DocumentStore>(store: &mut S, config: &LedgerConfig) {
        let mut accounts = AccountManager::new(store, config);
        accounts.register("Alice", "alice@x.com", "pw1").unwrap();
        accounts.register("Bob", "bob@x.com", "pw2").unwrap();
    }

    fn transaction_count(store: &InMemoryDocumentStore) -> usize {
        store
            .query(&QueryBuilder::<Transaction>::new().build())
            .unwrap()
            .count()
    }

    /// Lets a fixed number of puts through, then fails every one after.
    struct FlakyStore {
        inner: InMemoryDocumentStore,
        puts_left: usize,
    }

    impl DocumentStore for FlakyStore {
        fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            self.inner.get(key)
        }

        fn put(&mut self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
            if self.puts_left == 0 {
                return Err(StoreError::Backend {
                    message: "connection reset".to_string(),
                });
            }
            self.puts_left -= 1;
            self.inner.put(key, value)
        }

        fn query(&self, query: &str) -> Result<QueryResults<'_>, StoreError> {
            self.inner.query(query)
        }
    }

    #[test]
    fn transfer_between_users() {
        let mut store = InMemoryDocumentStore::default();
        let config = LedgerConfig::default();
        register_alice_and_bob(&mut store, &config);

        let mut ledger = TransactionLedger::new(&mut store, &config);
        let received_before = ledger.compute_received_balance("bob@x.com").unwrap();
        let tx_id = ledger.transfer("alice@x.com", "bob@x.com", dec(30)).unwrap();

        assert_eq!(ledger.compute_received_balance("bob@x.com").unwrap(), received_before + dec(30));
        assert_eq!(ledger.get_cached_balance("alice@x.com").unwrap(), dec(70));
        assert_eq!(ledger.get_cached_balance("bob@x.com").unwrap(), dec(130));
        assert_eq!(ledger.compute_sent_balance("alice@x.com").unwrap(), dec(70));
        assert_eq!(ledger.compute_balance("alice@x.com").unwrap(), dec(70));
        assert_eq!(ledger.compute_balance("bob@x.com").unwrap(), dec(130));

        let history = ledger.sent_history("alice@x.com").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].key, tx_id);
        assert_eq!(history[0].record.transaction_id, tx_id);
        assert_eq!(history[0].record.receiver_email, "bob@x.com");
        assert!(ledger.sent_history("bob@x.com").unwrap().is_empty());
    }

    #[test]
    fn sent_balance_ignores_receipts() {
        let mut store = InMemoryDocumentStore::default();
        let config = LedgerConfig::default();
        register_alice_and_bob(&mut store, &config);

        let mut ledger = TransactionLedger::new(&mut store, &config);
        ledger.transfer("alice@x.com", "bob@x.com", dec(30)).unwrap();
        ledger.transfer("bob@x.com", "alice@x.com", dec(5)).unwrap();

        assert_eq!(ledger.compute_sent_balance("alice@x.com").unwrap(), dec(70));
        assert_eq!(ledger.compute_received_balance("alice@x.com").unwrap(), dec(105));
        assert_eq!(ledger.compute_balance("alice@x.com").unwrap(), dec(75));
        assert_eq!(ledger.get_cached_balance("alice@x.com").unwrap(), dec(75));
    }

    #[test]
    fn replay_is_idempotent() {
        let mut store = InMemoryDocumentStore::default();
        let config = LedgerConfig::default();
        register_alice_and_bob(&mut store, &config);

        let mut ledger = TransactionLedger::new(&mut store, &config);
        ledger
            .transfer("alice@x.com", "bob@x.com", "12.5".parse().unwrap())
            .unwrap();
        let first = ledger.compute_received_balance("bob@x.com").unwrap();
        let second = ledger.compute_received_balance("bob@x.com").unwrap();
        assert_eq!(first, second);
        assert_eq!(first, "112.5".parse::<Decimal>().unwrap());
    }

    #[test]
    fn unknown_user_aborts_before_writing() {
        let mut store = InMemoryDocumentStore::default();
        let config = LedgerConfig::default();
        register_alice_and_bob(&mut store, &config);

        let mut ledger = TransactionLedger::new(&mut store, &config);
        let err = ledger
            .transfer("carol@x.com", "bob@x.com", dec(10))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Account(AccountError::NotFound { .. })));
        let err = ledger
            .transfer("alice@x.com", "carol@x.com", dec(10))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Account(AccountError::NotFound { .. })));
        assert_eq!(ledger.get_cached_balance("alice@x.com").unwrap(), dec(100));

        assert_eq!(transaction_count(&store), 0);
    }

    #[test]
    fn default_policy_allows_overdraft_and_negative_amounts() {
        let mut store = InMemoryDocumentStore::default();
        let config = LedgerConfig::default();
        register_alice_and_bob(&mut store, &config);

        let mut ledger = TransactionLedger::new(&mut store, &config);
        ledger.transfer("alice@x.com", "bob@x.com", dec(150)).unwrap();
        assert_eq!(ledger.get_cached_balance("alice@x.com").unwrap(), dec(-50));
        ledger.transfer("alice@x.com", "bob@x.com", dec(-20)).unwrap();
        assert_eq!(ledger.get_cached_balance("alice@x.com").unwrap(), dec(-30));
        assert_eq!(ledger.get_cached_balance("bob@x.com").unwrap(), dec(230));
    }

    #[test]
    fn strict_policy_rejects_before_writing() {
        let mut store = InMemoryDocumentStore::default();
        let config = LedgerConfig {
            transfer_policy: TransferPolicy::strict(),
            ..Default::default()
        };
        register_alice_and_bob(&mut store, &config);

        let mut ledger = TransactionLedger::new(&mut store, &config);
        let err = ledger.transfer("alice@x.com", "bob@x.com", dec(0)).unwrap_err();
        assert!(matches!(err, LedgerError::NonPositiveAmount { .. }));
        let err = ledger
            .transfer("alice@x.com", "bob@x.com", dec(101))
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
        assert_eq!(
            err.to_string(),
            "Insufficient funds: balance is 100, transfer needs 101"
        );
        ledger.transfer("alice@x.com", "bob@x.com", dec(100)).unwrap();
        assert_eq!(ledger.get_cached_balance("alice@x.com").unwrap(), dec(0));

        assert_eq!(transaction_count(&store), 1);
    }

    #[test]
    fn self_transfer_is_net_zero() {
        let mut store = InMemoryDocumentStore::default();
        let config = LedgerConfig::default();
        register_alice_and_bob(&mut store, &config);

        let mut ledger = TransactionLedger::new(&mut store, &config);
        ledger.transfer("alice@x.com", "alice@x.com", dec(40)).unwrap();
        assert_eq!(ledger.get_cached_balance("alice@x.com").unwrap(), dec(100));
        assert_eq!(ledger.compute_balance("alice@x.com").unwrap(), dec(100));
        assert_eq!(ledger.compute_received_balance("alice@x.com").unwrap(), dec(140));
        assert_eq!(ledger.compute_sent_balance("alice@x.com").unwrap(), dec(60));
    }

    #[test]
    fn interrupted_transfer_is_reconciled() {
        let mut store = FlakyStore {
            inner: InMemoryDocumentStore::default(),
            puts_left: usize::MAX,
        };
        let config = LedgerConfig::default();
        register_alice_and_bob(&mut store, &config);
        // log entry and sender update go through, receiver update fails
        store.puts_left = 2;

        let mut ledger = TransactionLedger::new(&mut store, &config);
        let err = ledger
            .transfer("alice@x.com", "bob@x.com", dec(30))
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Account(AccountError::Store(StoreError::Backend { .. }))
        ));
        assert_eq!(ledger.get_cached_balance("alice@x.com").unwrap(), dec(70));
        assert_eq!(ledger.get_cached_balance("bob@x.com").unwrap(), dec(100));
        assert_eq!(ledger.compute_balance("bob@x.com").unwrap(), dec(130));

        ledger.accounts.store.puts_left = 1;
        assert_eq!(ledger.reconcile("bob@x.com").unwrap(), dec(130));
        assert_eq!(ledger.get_cached_balance("bob@x.com").unwrap(), dec(130));
        // already consistent, nothing to write
        assert_eq!(ledger.reconcile("alice@x.com").unwrap(), dec(70));
        assert_eq!(ledger.accounts.store.puts_left, 0);
    }

    #[test]
    fn out_of_range_transfer_is_refused_before_writing() {
        let mut store = InMemoryDocumentStore::default();
        let config = LedgerConfig::default();
        register_alice_and_bob(&mut store, &config);

        let mut ledger = TransactionLedger::new(&mut store, &config);
        let err = ledger
            .transfer("alice@x.com", "bob@x.com", Decimal::MAX)
            .unwrap_err();
        assert!(matches!(err, LedgerError::BalanceOverflow { email } if email == "bob@x.com"));

        let half: Decimal = "50000000000000000000000000000".parse().unwrap();
        ledger.transfer("alice@x.com", "bob@x.com", half).unwrap();
        let err = ledger.transfer("alice@x.com", "bob@x.com", half).unwrap_err();
        assert!(matches!(err, LedgerError::BalanceOverflow { email } if email == "alice@x.com"));
        assert_eq!(ledger.get_cached_balance("alice@x.com").unwrap(), dec(100) - half);
        assert_eq!(ledger.compute_balance("alice@x.com").unwrap(), dec(100) - half);

        assert_eq!(transaction_count(&store), 1);
    }

    #[test]
    fn out_of_range_replay_is_an_error() {
        let mut store = InMemoryDocumentStore::default();
        for key in ["t1", "t2"] {
            let entry = format!(
                r#"{{"Doctype":"transaction","SenderEmail":"alice@x.com","ReceiverEmail":"bob@x.com","Amount":"50000000000000000000000000000","TransactionId":"{key}","Timestamp":"2024-01-01T00:00:00+00:00"}}"#
            );
            store.put(key, entry.into_bytes()).unwrap();
        }
        let config = LedgerConfig::default();
        let ledger = TransactionLedger::new(&mut store, &config);
        assert!(matches!(
            ledger.compute_received_balance("bob@x.com").unwrap_err(),
            LedgerError::BalanceOverflow { .. }
        ));
        assert!(matches!(
            ledger.compute_balance("alice@x.com").unwrap_err(),
            LedgerError::BalanceOverflow { .. }
        ));
    }

    #[test]
    fn many_digit_amounts_replay_exactly() {
        let mut store = FlakyStore {
            inner: InMemoryDocumentStore::default(),
            puts_left: usize::MAX,
        };
        let config = LedgerConfig::default();
        register_alice_and_bob(&mut store, &config);

        let amount: Decimal = "0.12345678901234567890123".parse().unwrap();
        let mut ledger = TransactionLedger::new(&mut store, &config);
        let received_before = ledger.compute_received_balance("bob@x.com").unwrap();
        ledger.transfer("alice@x.com", "bob@x.com", amount).unwrap();

        assert_eq!(
            ledger.compute_received_balance("bob@x.com").unwrap() - received_before,
            amount
        );
        let cached = ledger.get_cached_balance("alice@x.com").unwrap();
        assert_eq!(cached, dec(100) - amount);
        assert_eq!(ledger.compute_balance("alice@x.com").unwrap(), cached);
        assert_eq!(ledger.sent_history("alice@x.com").unwrap()[0].record.amount, amount);

        // cache and log agree, so reconcile has nothing to write
        ledger.accounts.store.puts_left = 0;
        assert_eq!(ledger.reconcile("alice@x.com").unwrap(), cached);
        assert_eq!(ledger.reconcile("bob@x.com").unwrap(), dec(100) + amount);
    }

    #[test]
    fn received_history_by_user_key() {
        let mut store = InMemoryDocumentStore::default();
        let config = LedgerConfig::default();
        let bob_key = AccountManager::new(&mut store, &config)
            .register("Bob", "bob@x.com", "pw2")
            .unwrap();
        AccountManager::new(&mut store, &config)
            .register("Alice", "alice@x.com", "pw1")
            .unwrap();

        let mut ledger = TransactionLedger::new(&mut store, &config);
        ledger.transfer("alice@x.com", "bob@x.com", dec(1)).unwrap();
        ledger.transfer("alice@x.com", "bob@x.com", dec(2)).unwrap();

        let received = ledger.received_history(&bob_key).unwrap();
        assert_eq!(received.len(), 2);
        assert!(received.iter().all(|entry| entry.record.sender_email == "alice@x.com"));
        let err = ledger.received_history("missing").unwrap_err();
        assert!(matches!(err, LedgerError::UserKeyNotFound { key } if key == "missing"));
    }

    #[test]
    fn malformed_log_entry_surfaces() {
        let mut store = InMemoryDocumentStore::default();
        store
            .put(
                "t1",
                br#"{"Doctype":"transaction","ReceiverEmail":"bob@x.com"}"#.to_vec(),
            )
            .unwrap();
        let config = LedgerConfig::default();
        let ledger = TransactionLedger::new(&mut store, &config);
        let err = ledger.compute_received_balance("bob@x.com").unwrap_err();
        assert!(matches!(err, LedgerError::MalformedDocument { key, .. } if key == "t1"));
    }
}
