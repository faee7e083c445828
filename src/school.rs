use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::engine::Engine;
use crate::limits::*;
use crate::model::Minutes;
use crate::notify::NotifyHub;
use crate::sweeper;

/// Manages per-school engines. Each school gets its own Engine + WAL +
/// background sweeper/compactor. School = database name from the pgwire
/// connection.
pub struct SchoolRegistry {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    retention_min: Minutes,
    shutdown: CancellationToken,
}

impl SchoolRegistry {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, retention_min: Minutes) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            retention_min,
            shutdown: CancellationToken::new(),
        }
    }

    /// Get or lazily create an engine for the given school.
    pub fn get_or_create(&self, school: &str) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(school) {
            return Ok(engine.value().clone());
        }
        if school.len() > MAX_SCHOOL_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "school name too long",
            ));
        }
        if self.engines.len() >= MAX_SCHOOLS {
            return Err(std::io::Error::other("too many schools"));
        }

        // Sanitize school name to prevent path traversal
        let safe_name: String = school
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty school name",
            ));
        }

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(wal_path, notify, self.retention_min)?);

        // Spawn sweeper + compactor for this school
        let sweeper_engine = engine.clone();
        let sweeper_token = self.shutdown.child_token();
        tokio::spawn(async move {
            sweeper::run_sweeper(sweeper_engine, sweeper_token).await;
        });
        let compactor_engine = engine.clone();
        let compactor_token = self.shutdown.child_token();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            sweeper::run_compactor(compactor_engine, threshold, compactor_token).await;
        });

        self.engines.insert(school.to_string(), engine.clone());
        metrics::gauge!(crate::observability::SCHOOLS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }

    /// Stop all background tasks across all schools.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
