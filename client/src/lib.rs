//! # Ferry Client
//!
//! The local half of the Ferry reconciliation pipeline.
//!
//! The embedded SQLite store is the application's primary read/write
//! target; everything here runs behind it. Local writes commit the
//! domain row and a durable outbox entry in one transaction, a
//! background worker batches outbox entries to the apply gateway with
//! bounded concurrency and exponential backoff, and the shape consumer
//! replays the remote change stream back into the local store through
//! the echo-suppression rule. The application never blocks on the
//! network: sync failure degrades to "offline", nothing more.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod local;
pub mod outbox;
pub mod retry;
pub mod stream;
pub mod sync;

pub use auth::{AuthToken, HttpTokenFetcher, TokenFetcher, TokenManager};
pub use config::{ClientConfig, ConfigError};
pub use error::{Result, SyncError};
pub use gateway::{ApplyAck, Gateway, HttpGateway};
pub use local::LocalStore;
pub use outbox::{Outbox, OutboxEntry};
pub use retry::{retry_with_backoff, BackoffPolicy};
pub use stream::{ShapeConsumer, ShapeCursor};
pub use sync::{InitialLoadReport, SyncReport, SyncWorker};
