use rust_decimal::Decimal;
use serde::{Serialize, Serializer};
use serde_json::value::RawValue;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    account::{AccountError, AccountManager},
    command::{Command, CommandError, Operation},
    config::LedgerConfig,
    document::DocumentKind,
    ledger::{LedgerError, TransactionLedger},
    store::{DocumentStore, StoreError},
};

/// Coarse classification of a failed invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgumentCount,
    InvalidArgument,
    NotFound,
    StoreError,
    UnknownOperation,
    /// Refused by the transfer policy, or a balance would leave the `Decimal` range.
    Rejected,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Account(#[from] AccountError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("No user matches the given email and password")]
    InvalidCredentials,
    #[error("No document stored under key `{key}`")]
    KeyNotFound { key: String },
    #[error("Failed to encode response: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::Command(CommandError::UnknownOperation { .. }) => {
                ErrorKind::UnknownOperation
            }
            DispatchError::Command(CommandError::InvalidArgumentCount { .. }) => {
                ErrorKind::InvalidArgumentCount
            }
            DispatchError::Command(CommandError::InvalidArgument { .. }) => {
                ErrorKind::InvalidArgument
            }
            DispatchError::Account(err) | DispatchError::Ledger(LedgerError::Account(err)) => {
                account_error_kind(err)
            }
            DispatchError::Ledger(LedgerError::UserKeyNotFound { .. }) => ErrorKind::NotFound,
            DispatchError::Ledger(
                LedgerError::NonPositiveAmount { .. }
                | LedgerError::InsufficientFunds { .. }
                | LedgerError::BalanceOverflow { .. },
            ) => ErrorKind::Rejected,
            DispatchError::Ledger(LedgerError::Store(_) | LedgerError::MalformedDocument { .. }) => {
                ErrorKind::StoreError
            }
            DispatchError::InvalidCredentials | DispatchError::KeyNotFound { .. } => {
                ErrorKind::NotFound
            }
            DispatchError::Store(_) | DispatchError::Encoding(_) => ErrorKind::StoreError,
        }
    }
}

fn account_error_kind(err: &AccountError) -> ErrorKind {
    match err {
        AccountError::NotFound { .. } => ErrorKind::NotFound,
        AccountError::Store(_) | AccountError::MalformedDocument { .. } => ErrorKind::StoreError,
    }
}

/// What the host gets back from every invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Success(Vec<u8>),
    Failure { kind: ErrorKind, message: String },
}

impl Response {
    pub fn is_success(&self) -> bool {
        matches!(self, Response::Success(_))
    }

    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            Response::Success(payload) => Some(payload.as_slice()),
            Response::Failure { .. } => None,
        }
    }
}

#[derive(Serialize)]
struct BalancePayload {
    #[serde(serialize_with = "decimal_as_number")]
    balance: Decimal,
}

/// Writes the exact decimal digits as a JSON number.
fn decimal_as_number<S: Serializer>(value: &Decimal, serializer: S) -> Result<S::Ok, S::Error> {
    RawValue::from_string(value.to_string())
        .map_err(serde::ser::Error::custom)?
        .serialize(serializer)
}

/// Routes named invocations with string arguments to the account manager
/// and the ledger, owning the store they share.
pub struct Dispatcher<S> {
    store: S,
    config: LedgerConfig,
}

impl<S: DocumentStore> Dispatcher<S> {
    pub fn new(store: S, config: LedgerConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn invoke(&mut self, name: &str, args: &[String]) -> Response {
        match self.try_invoke(name, args) {
            Ok(payload) => Response::Success(payload),
            Err(err) => {
                let kind = err.kind();
                warn!(operation = name, ?kind, %err, "invocation failed");
                Response::Failure {
                    kind,
                    message: err.to_string(),
                }
            }
        }
    }

    pub fn try_invoke(&mut self, name: &str, args: &[String]) -> Result<Vec<u8>, DispatchError> {
        let operation: Operation = name.parse()?;
        let command = Command::parse(operation, args)?;
        self.execute(command)
    }

    pub fn execute(&mut self, command: Command) -> Result<Vec<u8>, DispatchError> {
        debug!(operation = command.operation().name(), "executing");
        match command {
            Command::Register {
                name,
                email,
                password,
            } => {
                let key = self.accounts().register(&name, &email, &password)?;
                Ok(key.into_bytes())
            }
            Command::Login { email, password } => {
                let user = self
                    .accounts()
                    .login(&email, &password)?
                    .ok_or(DispatchError::InvalidCredentials)?;
                Ok(user.encode()?)
            }
            Command::MakeTransaction {
                sender_email,
                receiver_email,
                amount,
            } => {
                let id = self
                    .ledger()
                    .transfer(&sender_email, &receiver_email, amount)?;
                Ok(id.into_bytes())
            }
            Command::GetData { key } => self
                .store
                .get(&key)?
                .ok_or(DispatchError::KeyNotFound { key }),
            Command::SetData { key, value } => {
                self.store.put(&key, value.into_bytes())?;
                Ok(b"operation successful".to_vec())
            }
            Command::GetBalance { email } => {
                let balance = self.ledger().compute_received_balance(&email)?;
                balance_payload(balance)
            }
            Command::SubtractBalance { email } => {
                let balance = self.ledger().compute_sent_balance(&email)?;
                balance_payload(balance)
            }
            Command::CheckBalance { email } => {
                let balance = self.ledger().get_cached_balance(&email)?;
                balance_payload(balance)
            }
            Command::GetLedgerBalance { email } => {
                let balance = self.ledger().compute_balance(&email)?;
                balance_payload(balance)
            }
            Command::ReconcileBalance { email } => {
                let balance = self.ledger().reconcile(&email)?;
                balance_payload(balance)
            }
            Command::GetHistory { email } => {
                let history = self.ledger().sent_history(&email)?;
                Ok(serde_json::to_vec(&history)?)
            }
            Command::GetReceiveHistory { user_key } => {
                let history = self.ledger().received_history(&user_key)?;
                Ok(serde_json::to_vec(&history)?)
            }
        }
    }

    fn accounts(&mut self) -> AccountManager<'_, S> {
        AccountManager::new(&mut self.store, &self.config)
    }

    fn ledger(&mut self) -> TransactionLedger<'_, S> {
        TransactionLedger::new(&mut self.store, &self.config)
    }
}

fn balance_payload(balance: Decimal) -> Result<Vec<u8>, DispatchError> {
    Ok(serde_json::to_vec(&BalancePayload { balance })?)
}
