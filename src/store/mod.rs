//! Persistence layer: the file-backed dedup ledger.

pub mod ledger;

pub use ledger::{Ledger, RegenerationRecord};
