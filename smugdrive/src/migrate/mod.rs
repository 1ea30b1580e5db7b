pub mod backoff;
pub mod catalog;
pub mod engine;
pub mod handle;
pub mod ledger;
pub mod observer;
pub mod store;
pub mod transfer;
