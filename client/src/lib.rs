//! FieldSync client - offline-first storage for field survey data.
//!
//! Writes land in a durable local store and are replayed to the remote store
//! by the [`Reconciler`] whenever the [`ConnectivityMonitor`] reports online.
//!
//! # Example
//!
//! ```no_run
//! use fieldsync_client::{Course, ConnectivityMonitor, FieldSync, InMemoryRemote, SyncContext};
//!
//! # async fn run() -> fieldsync_client::Result<()> {
//! let pool = fieldsync_client::db::create_pool("sqlite::memory:").await?;
//! let monitor = ConnectivityMonitor::new(false);
//! let sync = FieldSync::open(pool, InMemoryRemote::new_shared(), monitor.clone()).await?;
//!
//! let ctx = SyncContext::new().with_principal("user-7");
//! sync.courses().create(&ctx, &Course { name: "Ganton".into() }).await?;
//!
//! // Back online: the queued course is replayed.
//! let watcher = sync.reconciler().watch(ctx);
//! monitor.set_online(true);
//! # drop(watcher);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connectivity;
pub mod context;
pub mod db;
pub mod entities;
pub mod error;
pub mod local;
pub mod reconciler;
pub mod remote;
pub mod repository;

pub use config::{Config, ConfigError};
pub use connectivity::{ConnectivityMonitor, Transition};
pub use context::{FixedPrincipal, PrincipalSource, SyncContext};
pub use entities::{survey_schema, Course, Entity, Hazard, HoleMap, Task};
pub use error::{ClientError, Result};
pub use local::LocalStore;
pub use reconciler::{PassOutcome, PassReport, Reconciler};
pub use remote::{InMemoryRemote, RemoteCalls, RemoteError, RemoteRepository};
pub use repository::EntityRepository;

use std::sync::Arc;

/// Everything a client needs: the local store, the reconciler and one
/// repository per survey collection.
#[derive(Debug, Clone)]
pub struct FieldSync {
    reconciler: Reconciler,
}

impl FieldSync {
    /// Migrate the database, load the local store and reset any replay an
    /// earlier run left in flight.
    pub async fn open(
        pool: db::Pool,
        remote: Arc<dyn RemoteRepository>,
        monitor: ConnectivityMonitor,
    ) -> Result<Self> {
        db::run_migrations(&pool).await?;
        let local = LocalStore::open(survey_schema(), pool).await?;
        let reconciler = Reconciler::new(local, remote, monitor);
        reconciler.recover().await?;
        Ok(Self { reconciler })
    }

    /// Open the configured database with a monitor in the configured
    /// starting state.
    pub async fn connect(config: &Config, remote: Arc<dyn RemoteRepository>) -> Result<Self> {
        let pool = db::create_pool(&config.database_url).await?;
        Self::open(pool, remote, config.monitor()).await
    }

    pub fn courses(&self) -> EntityRepository<Course> {
        EntityRepository::new(self.reconciler.clone())
    }

    pub fn hazards(&self) -> EntityRepository<Hazard> {
        EntityRepository::new(self.reconciler.clone())
    }

    pub fn tasks(&self) -> EntityRepository<Task> {
        EntityRepository::new(self.reconciler.clone())
    }

    pub fn hole_maps(&self) -> EntityRepository<HoleMap> {
        EntityRepository::new(self.reconciler.clone())
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn local(&self) -> &LocalStore {
        self.reconciler.local()
    }

    pub fn monitor(&self) -> &ConnectivityMonitor {
        self.reconciler.monitor()
    }
}
