pub mod audit;
pub mod config;
pub mod journal;
pub mod lock;
#[cfg(test)]
pub mod memory;
pub mod migrate;
pub mod paths;
pub mod period;
pub mod pipeline;
pub mod registry;
pub mod report;
pub mod schema;
pub mod state;
pub mod store;
pub mod util;
pub mod warn;
