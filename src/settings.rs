use miette::{IntoDiagnostic, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Name of the running environment. Testing behaviour is active when it
    /// equals `testing.appEnv` of the rule document.
    pub app_env: String,
    pub rules: Rules,
    pub temporary: Temporary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rules {
    /// Path to the YAML rule document
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemporaryBackend {
    /// Process-local, lost on restart
    Memory,
    /// Standalone YAML file at `temporary.path`
    File,
    /// Inside the `testing` block of the rule document
    Document,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Temporary {
    pub backend: TemporaryBackend,
    /// Only used by the `file` backend
    pub path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_env: "production".to_string(),
            rules: Rules::default(),
            temporary: Temporary::default(),
        }
    }
}

impl Default for Rules {
    fn default() -> Self {
        Self {
            path: PathBuf::from("resources/config/permissions.yml"),
        }
    }
}

impl Default for Temporary {
    fn default() -> Self {
        Self {
            backend: TemporaryBackend::File,
            path: PathBuf::from("storage/routeguard/temporary.yml"),
        }
    }
}

impl Settings {
    pub fn load(path: &str) -> Result<Self> {
        let defaults = Settings::default();
        let mut builder = config::Config::builder()
            .set_default("app_env", defaults.app_env)
            .into_diagnostic()?
            .set_default(
                "rules.path",
                defaults.rules.path.to_string_lossy().to_string(),
            )
            .into_diagnostic()?
            .set_default("temporary.backend", "file")
            .into_diagnostic()?
            .set_default(
                "temporary.path",
                defaults.temporary.path.to_string_lossy().to_string(),
            )
            .into_diagnostic()?;

        // Optional file
        if Path::new(path).exists() {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Environment overrides: ROUTEGUARD__APP_ENV=testing, ROUTEGUARD__RULES__PATH=..., etc.
        builder =
            builder.add_source(config::Environment::with_prefix("ROUTEGUARD").separator("__"));

        let cfg = builder.build().into_diagnostic()?;
        let mut s: Settings = cfg.try_deserialize().into_diagnostic()?;

        // Normalize paths to be relative to current dir
        if s.rules.path.is_relative() {
            s.rules.path = std::env::current_dir().into_diagnostic()?.join(&s.rules.path);
        }
        if s.temporary.path.is_relative() {
            s.temporary.path = std::env::current_dir()
                .into_diagnostic()?
                .join(&s.temporary.path);
        }

        Ok(s)
    }
}
