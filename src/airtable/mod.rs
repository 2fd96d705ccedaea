//! HTTP implementations of the collaborator traits in `archive::store`.

pub mod client;
pub mod destination;
#[cfg(test)]
pub mod fake_http;
pub mod source;
pub mod tables;

pub use client::ApiClient;
pub use destination::AirtableDestinations;
pub use source::AirtableSource;
pub use tables::{TableLedger, TableRunLog};
