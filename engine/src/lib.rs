//! # FieldSync Engine
//!
//! The deterministic core of an offline-first field data client.
//!
//! Records are written locally first and replicated to a remote store later.
//! This crate owns the record table, the implicit mutation queue (every
//! record that is pending or failed), the replay ordering, and every sync
//! state transition. It performs no IO and reads no clock: callers pass
//! timestamps in, and persist the records each call hands back.
//!
//! ## Design Principles
//!
//! - **No IO**: Engine has no knowledge of files, network, or platform
//! - **Deterministic**: Same inputs always produce the same replay plan
//! - **Never lose a local write**: edits made during a replay are detected
//!   through the record revision and requeued
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! A [`Record`] has a permanent client-side [`LocalId`], an optional
//! [`RemoteId`] assigned on first successful replay, and a [`SyncStatus`]:
//!
//! ```text
//! Pending --begin_replay--> Syncing --settle_created/updated--> Synced
//!    ^                         |  \--settle_rejected----------> Failed
//!    |                         \--settle_unreachable--> (previous state)
//!    \------------ requeue / local edit -------------------------/
//! ```
//!
//! ### References
//!
//! Collections declare foreign keys with [`CollectionSchema::with_reference`].
//! A reference holds the target's local ID until the target is confirmed,
//! then [`Store::settle_created`] rewrites it to the remote ID.
//!
//! ### Replay
//!
//! [`plan_replay`] orders the queue so that every record is sent after the
//! records it references.
//!
//! ## Quick Start
//!
//! ```rust
//! use fieldsync_engine::{
//!     plan_replay, CollectionSchema, FieldDef, FieldType, LocalId, RemoteId,
//!     ReplayStart, Schema, Store, SyncStatus,
//! };
//! use serde_json::json;
//!
//! // 1. Define a schema
//! let schema = Schema::new(1)
//!     .with_collection(CollectionSchema::new(
//!         "courses",
//!         vec![FieldDef::required("name", FieldType::String)],
//!     ))
//!     .with_collection(
//!         CollectionSchema::new(
//!             "tasks",
//!             vec![FieldDef::required("courseId", FieldType::String)],
//!         )
//!         .with_reference("courseId", "courses"),
//!     );
//!
//! // 2. Write locally while offline
//! let mut store = Store::new(schema);
//! let course = json!({"name": "Ganton"}).as_object().cloned().unwrap();
//! store.create(LocalId::from("c1"), "courses", course, 1000).unwrap();
//! let task = json!({"courseId": "c1"}).as_object().cloned().unwrap();
//! store.create(LocalId::from("t1"), "tasks", task, 2000).unwrap();
//!
//! // 3. Plan and replay
//! let plan = plan_replay(&store);
//! assert_eq!(plan.order, vec![LocalId::from("c1"), LocalId::from("t1")]);
//!
//! let ReplayStart::Ready(attempt) = store.begin_replay(&plan.order[0]).unwrap() else {
//!     unreachable!()
//! };
//! let confirmed = store
//!     .settle_created(&attempt, RemoteId::from("C-100"), None)
//!     .unwrap();
//! assert_eq!(confirmed.record.sync, SyncStatus::Synced);
//! assert_eq!(confirmed.remapped[0].fields["courseId"], "C-100");
//! ```
//!
//! ## Persistence
//!
//! Use [`Store::export_state`] and [`Store::import_state`] with [`StoreSnapshot`]
//! for whole-store snapshots. Snapshots serialize to JSON with deterministic
//! ordering.

pub mod error;
pub mod reconcile;
pub mod record;
pub mod replay;
pub mod schema;
pub mod snapshot;
pub mod store;
pub mod tracker;

// Re-export main types at crate root
pub use error::Error;
pub use reconcile::{MergeAction, MergeReport, RemoteRecord};
pub use record::{LocalId, Record, RemoteId, SyncStatus};
pub use replay::{plan_replay, Deferral, ReplayAttempt, ReplayMode, ReplayPlan, ReplayStart};
pub use schema::{CollectionSchema, FieldDef, FieldType, ForeignKey, Schema};
pub use snapshot::{SnapshotMetadata, StoreSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use store::{Collection, Condition, Confirmed, Filter, QueryBuilder, Store};
pub use tracker::{FailedRecord, SyncSummary, SyncTracker};

/// Type aliases for clarity
pub type CollectionName = String;
pub type Timestamp = u64;
pub type SchemaVersion = u32;

/// Field values of a record: a JSON object.
pub type Fields = serde_json::Map<String, serde_json::Value>;
