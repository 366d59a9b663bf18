//! Asynchronous log transports that persist structured records into SQL
//! tables.
//!
//! A [`LogSink`](sink::LogSink) writes one record per call through a pooled
//! [`Backend`](backend::Backend); a [`Transport`](transport::Transport) runs
//! those writes off the caller's thread and reports each outcome exactly
//! once. [`SinkLayer`](layer::SinkLayer) connects transports to `tracing`.

pub mod level;
pub mod metadata;
pub mod record;
pub mod error;
pub mod config;
pub mod env;
pub mod schema;
pub mod backend;
pub mod memory;
pub mod sink;
pub mod transport;
pub mod table_sink;
pub mod site_sink;
pub mod layer;
pub mod init;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "sqlite")]
pub mod sqlite;
