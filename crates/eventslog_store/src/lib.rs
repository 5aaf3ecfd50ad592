pub mod batch;
pub mod cleaner;
pub mod client;
pub mod config;
pub mod datastore;
mod db;
mod health;
pub mod query;
pub mod store;
#[cfg(test)]
mod testing;

pub use eventslog_core::*;
pub use batch::{BatchSink, BatchWriter};
pub use cleaner::EventsLogCleaner;
pub use client::SqlClient;
pub use config::{
    BatchConfig, BatchSettings, DatabaseConfig, EventsLogConfig, LocalConfig, PoolConfig,
    StoreSettings,
};
pub use datastore::{EventsLog, load_or_init_config, open_events_log};
pub use query::SqlQueryMaker;
pub use store::{SqlStore, StoreState};
