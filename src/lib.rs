/// Document model of the shared keyspace. `Doctype` is the tag of one sum type.
pub mod document;

/// Selector query construction, plus a matcher for the same query language.
pub mod query;

/// Document store interface the ledger runs on, plus an "in memory" implementation.
pub mod store;

/// Starting balance and transfer checks.
pub mod config;

/// User registration, login and lookup by email.
pub mod account;

/// Transfers, the transaction log, and balances derived from it.
///
/// NOTE: cached balances and the replayed log can disagree after a partial
/// transfer. Replay is authoritative, `reconcile` rewrites the cache.
pub mod ledger;

/// Operation names, their arity, and parsing string arguments into commands.
pub mod command;

/// Routes invocations to [`account`] and [`ledger`] and wraps the outcome
/// in a success/failure [`dispatcher::Response`].
pub mod dispatcher;

/// Script runner for the binary. Lives in the library so the
/// integration tests can drive the same code path.
pub mod bin_utils;
