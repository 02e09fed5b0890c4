pub mod account_service;
pub mod journal_service;
pub mod ledger_service;
pub mod oauth_service;
pub mod rollback_service;
pub mod scheduler;
pub mod sync_service;

#[cfg(test)]
pub(crate) mod testutil;
