use std::path::{Path, PathBuf};

use routeguard::guard::descriptor::HandlerRegistry;
use routeguard::guard::gate::Gate;
use routeguard::settings::{Rules, Settings, Temporary, TemporaryBackend};
use tempfile::TempDir;

/// Rule document written to a temporary directory, removed on drop
pub struct TestRules {
    dir: TempDir,
    path: PathBuf,
}

impl TestRules {
    /// Write `yaml` as `permissions.yml` in a fresh directory
    pub fn new(yaml: &str) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("permissions.yml");
        std::fs::write(&path, yaml).expect("Failed to write rule document");
        Self { dir, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn temporary_path(&self) -> PathBuf {
        self.dir.path().join("storage/temporary.yml")
    }

    pub fn settings(&self, app_env: &str, backend: TemporaryBackend) -> Settings {
        Settings {
            app_env: app_env.to_string(),
            rules: Rules {
                path: self.path.clone(),
            },
            temporary: Temporary {
                backend,
                path: self.temporary_path(),
            },
        }
    }

    pub fn gate(&self, app_env: &str, backend: TemporaryBackend, registry: HandlerRegistry) -> Gate {
        Gate::from_settings(&self.settings(app_env, backend), registry)
    }

    pub fn contents(&self) -> String {
        std::fs::read_to_string(&self.path).expect("Failed to read rule document")
    }
}
