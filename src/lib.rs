pub mod args;
pub mod backtest;
pub mod checkpoint;
pub mod collect;
pub mod config;
pub mod connector;
pub mod error;
pub mod estimators;
pub mod events;
pub mod feature_store;
pub mod features;
pub mod http_client;
pub mod ledger;
pub mod logging;
pub mod metrics;
pub mod raw_store;
pub mod report;
pub mod sources;
pub mod splits;
