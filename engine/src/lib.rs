//! # Ferry Engine
//!
//! Pure reconciliation logic for Ferry, a local-first sync pipeline.
//!
//! A local embedded store is the primary read/write target; this crate
//! holds the logic both halves of the background reconciliation pipeline
//! share: the change-record wire format, per-table schemas, per-record
//! disposition at the gateway, echo suppression for replayed stream
//! events, batch planning, and the convergence fingerprint.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine has no knowledge of files, network, or stores
//! - **Typed tables**: `lists`/`todos`/`goals` are a closed enum with
//!   typed record shapes, not string-keyed branches
//! - **Explicit origin**: whether a write came from the local user or the
//!   remote stream is a parameter, never ambient state
//!
//! ## Core Concepts
//!
//! ### Change records
//!
//! A [`RecordChange`] is one row's pending mutation: the full column set,
//! an ordered `modified_columns` list naming what actually changed, a
//! `new` flag (never applied remotely), and a delete marker. A
//! [`Changeset`] groups records per table and is applied transactionally
//! as a whole.
//!
//! ### Disposition
//!
//! [`disposition`](disposition::disposition) classifies each record into
//! hard delete, upsert, column-scoped update, or no-op. The overloaded
//! `deleted` + empty `modified_columns` wire convention is normalized here
//! and nowhere else.
//!
//! ### Echo suppression
//!
//! [`resolve_insert`](reconcile::resolve_insert) converts a
//! remote-originated insert that collides with an existing key into a full
//! non-key-column update, so a replayed local write never raises a
//! primary-key violation.

pub mod disposition;
pub mod error;
pub mod integrity;
pub mod plan;
pub mod reconcile;
pub mod record;
pub mod schema;
pub mod sql;

// Re-export main types at crate root
pub use disposition::{disposition, Disposition};
pub use error::Error;
pub use integrity::{fingerprint, verify_converged};
pub use plan::{plan_incremental, SyncPlan};
pub use reconcile::{resolve_insert, InsertAction, Origin};
pub use record::{
    well_formed_id, Change, Changeset, ColumnType, ColumnValue, GoalChange, ListChange,
    RecordChange, RefSubstitution, TableKind, TodoChange,
};
pub use sql::{Dialect, SqlStatement};
