pub mod config;
pub mod database;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod heartbeat;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod protocol;
pub mod reaper;
pub mod retry;
pub mod routes;
pub mod rpc;
pub mod shutdown;
pub mod store;
