//! Request-count bounded permission overrides for automated tests.
//!
//! A grant is a list of permissions plus a [`Lifetime`]. While the gate runs
//! in the testing environment every evaluated request consumes one unit of a
//! bounded lifetime; unlimited grants stay until reset. Outside the testing
//! environment nothing here grants or stores anything.
//!
//! Grants live in a [`TemporaryStore`], separate from the static rule table:
//! - [`MemoryTemporaryStore`] for tests that drive the gate in-process,
//! - [`FileTemporaryStore`] when the test runner is a separate process,
//! - [`DocumentTemporaryStore`] for the legacy layout that keeps the grant in
//!   the `testing` block of the rule document itself.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::guard::errors::GuardError;
use crate::guard::loader::{write_atomically, RuleSnapshot, RuleStore};
use crate::guard::types::{split_list, Lifetime, TemporaryGrant, TestingSection};

pub trait TemporaryStore: Send + Sync {
    fn load(&self) -> Result<TemporaryGrant, GuardError>;
    fn save(&self, grant: &TemporaryGrant) -> Result<(), GuardError>;
}

#[derive(Debug, Default)]
pub struct MemoryTemporaryStore {
    grant: Mutex<TemporaryGrant>,
}

impl MemoryTemporaryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TemporaryStore for MemoryTemporaryStore {
    fn load(&self) -> Result<TemporaryGrant, GuardError> {
        Ok(self
            .grant
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, grant: &TemporaryGrant) -> Result<(), GuardError> {
        *self.grant.lock().unwrap_or_else(PoisonError::into_inner) = grant.clone();
        Ok(())
    }
}

/// On-disk shape, kept close to the `testing` block of the rule document.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GrantRecord {
    #[serde(default)]
    temporary_permissions: Option<String>,
    #[serde(default)]
    temporary_request_counter: i64,
}

/// Grant stored in its own small YAML file. A missing file means no grant.
#[derive(Debug, Clone)]
pub struct FileTemporaryStore {
    path: PathBuf,
}

impl FileTemporaryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TemporaryStore for FileTemporaryStore {
    fn load(&self) -> Result<TemporaryGrant, GuardError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(TemporaryGrant::expired())
            }
            Err(e) => return Err(e.into()),
        };
        let record: GrantRecord =
            serde_yaml::from_str(&contents).map_err(|e| GuardError::ConfigParse {
                path: self.path.display().to_string(),
                message: e.to_string(),
            })?;
        Ok(TemporaryGrant::new(
            record
                .temporary_permissions
                .as_deref()
                .map(split_list)
                .unwrap_or_default(),
            Lifetime::from_counter(record.temporary_request_counter),
        ))
    }

    fn save(&self, grant: &TemporaryGrant) -> Result<(), GuardError> {
        let record = GrantRecord {
            temporary_permissions: (!grant.permissions.is_empty())
                .then(|| grant.permissions.join(",")),
            temporary_request_counter: grant.lifetime.counter(),
        };
        let serialized =
            serde_yaml::to_string(&record).map_err(|e| GuardError::Persist(e.to_string()))?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        write_atomically(&self.path, &serialized)
    }
}

/// Grant stored in the `testing` block of the rule document.
#[derive(Debug)]
pub struct DocumentTemporaryStore {
    rules: Arc<RuleStore>,
    app_env: String,
}

impl DocumentTemporaryStore {
    pub fn new(rules: Arc<RuleStore>, app_env: impl Into<String>) -> Self {
        Self {
            rules,
            app_env: app_env.into(),
        }
    }
}

impl TemporaryStore for DocumentTemporaryStore {
    fn load(&self) -> Result<TemporaryGrant, GuardError> {
        self.rules.stored_temporary_grant()
    }

    fn save(&self, grant: &TemporaryGrant) -> Result<(), GuardError> {
        self.rules
            .persist_temporary(&self.app_env, &grant.permissions, grant.lifetime)
    }
}

/// Hands out temporary permissions while the rule document designates the
/// injected `app_env` as its testing environment.
pub struct TemporaryPermissions {
    rules: Arc<RuleStore>,
    store: Arc<dyn TemporaryStore>,
    app_env: String,
    /// Serializes load-decrement-save within this process
    consume_lock: Mutex<()>,
}

impl TemporaryPermissions {
    pub fn new(
        rules: Arc<RuleStore>,
        store: Arc<dyn TemporaryStore>,
        app_env: impl Into<String>,
    ) -> Self {
        Self {
            rules,
            store,
            app_env: app_env.into(),
            consume_lock: Mutex::new(()),
        }
    }

    pub fn app_env(&self) -> &str {
        &self.app_env
    }

    pub fn is_testing(&self, snapshot: &RuleSnapshot) -> bool {
        snapshot.is_testing(&self.app_env)
    }

    fn is_active(&self) -> bool {
        self.is_testing(&self.rules.snapshot())
    }

    /// Default testing permissions followed by any live temporary ones.
    pub fn effective_permissions(&self, testing: &TestingSection) -> Vec<String> {
        if !self.is_active() {
            return Vec::new();
        }
        let mut permissions = testing.default_permission_list();
        permissions.extend(self.consume());
        permissions
    }

    /// Return the live temporary permissions, spending one request of a
    /// bounded lifetime. Fails closed: if the decremented counter cannot be
    /// stored, no temporary permissions apply.
    pub fn consume(&self) -> Vec<String> {
        if !self.is_active() {
            return Vec::new();
        }
        let _guard = self
            .consume_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let grant = match self.store.load() {
            Ok(grant) => grant,
            Err(e) => {
                tracing::warn!(error = %e, "Could not read temporary permissions");
                return Vec::new();
            }
        };
        if grant.permissions.is_empty() || !grant.lifetime.is_live() {
            return Vec::new();
        }

        match grant.lifetime {
            Lifetime::Unlimited => grant.permissions,
            Lifetime::Requests(remaining) => {
                let next = TemporaryGrant::new(
                    grant.permissions.clone(),
                    Lifetime::Requests(remaining - 1),
                );
                match self.store.save(&next) {
                    Ok(()) => grant.permissions,
                    Err(e) => {
                        tracing::warn!(error = %e, "Could not decrement temporary permissions");
                        Vec::new()
                    }
                }
            }
        }
    }

    /// Grant `permissions` for `lifetime`. Returns false when refused: not in
    /// the testing environment, rule document loaded with errors, or the
    /// store failed.
    pub fn set(&self, permissions: &[String], lifetime: Lifetime) -> bool {
        let snapshot = self.rules.snapshot();
        if !self.is_testing(&snapshot) {
            tracing::warn!(
                app_env = %self.app_env,
                "Refusing to set temporary permissions outside the testing environment"
            );
            return false;
        }
        if snapshot.has_errors() {
            tracing::warn!("Refusing to set temporary permissions: rule document has errors");
            return false;
        }

        let permissions: Vec<String> = permissions
            .iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        let _guard = self
            .consume_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match self.store.save(&TemporaryGrant::new(permissions, lifetime)) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Could not store temporary permissions");
                false
            }
        }
    }

    pub fn reset(&self) -> bool {
        self.set(&[], Lifetime::Requests(0))
    }

    /// The grant as currently stored, without consuming it.
    pub fn current(&self) -> Result<TemporaryGrant, GuardError> {
        self.store.load()
    }
}
