use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use regex::{Regex, RegexBuilder};
use serde_yaml::{Mapping, Value};

use crate::guard::errors::GuardError;
use crate::guard::types::*;
use crate::guard::RuleTable;

/// Read and parse the rule document at `path`.
///
/// Semantically invalid rules do not fail here; they are reported by
/// [`compile_rules`].
pub fn load(path: &Path) -> Result<RuleDocument, GuardError> {
    let raw = read_raw(path)?;
    parse_document(path, raw)
}

fn read_raw(path: &Path) -> Result<Value, GuardError> {
    let contents = std::fs::read_to_string(path).map_err(|source| GuardError::ConfigRead {
        path: path.display().to_string(),
        source,
    })?;
    serde_yaml::from_str(&contents).map_err(|e| GuardError::ConfigParse {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

fn parse_document(path: &Path, raw: Value) -> Result<RuleDocument, GuardError> {
    if !raw.is_mapping() {
        return Err(GuardError::ConfigParse {
            path: path.display().to_string(),
            message: "document root must be a mapping".into(),
        });
    }
    serde_yaml::from_value(raw).map_err(|e| GuardError::ConfigParse {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Compile a rule document into a [`RuleTable`].
///
/// Malformed conditions and invalid patterns are collected and skipped; every
/// well-formed rule still ends up in the table.
pub fn compile_rules(document: &RuleDocument) -> (RuleTable, Vec<GuardError>) {
    let mut errors = Vec::new();

    let controller_actions = document
        .controller_action_permissions
        .iter()
        .map(|(permission, raw_conditions)| {
            let conditions = raw_conditions
                .iter()
                .filter_map(|raw| {
                    let parsed = Condition::parse(raw);
                    if parsed.is_none() {
                        errors.push(GuardError::RuleValidation {
                            permission: permission.clone(),
                            condition: raw.clone(),
                        });
                    }
                    parsed
                })
                .collect();
            ControllerActionRule {
                permission: permission.clone(),
                conditions,
            }
        })
        .collect();

    let custom = document
        .custom_permissions
        .iter()
        .map(|(permission, raw_patterns)| {
            let patterns = raw_patterns
                .iter()
                .filter_map(|raw| match compile_pattern(raw) {
                    Ok(re) => Some(re),
                    Err(e) => {
                        errors.push(GuardError::InvalidPattern {
                            permission: permission.clone(),
                            pattern: raw.clone(),
                            message: e.to_string(),
                        });
                        None
                    }
                })
                .collect();
            CustomRule {
                permission: permission.clone(),
                patterns,
            }
        })
        .collect();

    (
        RuleTable {
            controller_actions,
            custom,
        },
        errors,
    )
}

/// Compile a custom permission pattern. Patterns may be written bare
/// (`UsersController@(edit|update)$`) or delimited with trailing flags
/// (`/userscontroller@edit$/i`); supported flags are `i`, `m`, `s` and `x`.
pub fn compile_pattern(raw: &str) -> Result<Regex, regex::Error> {
    if let Some((body, flags)) = split_delimited(raw) {
        return RegexBuilder::new(body)
            .case_insensitive(flags.contains('i'))
            .multi_line(flags.contains('m'))
            .dot_matches_new_line(flags.contains('s'))
            .ignore_whitespace(flags.contains('x'))
            .build();
    }
    Regex::new(raw)
}

fn split_delimited(raw: &str) -> Option<(&str, &str)> {
    let rest = raw.strip_prefix('/')?;
    let end = rest.rfind('/')?;
    let (body, flags) = (&rest[..end], &rest[end + 1..]);
    if flags.chars().all(|c| matches!(c, 'i' | 'm' | 's' | 'x')) {
        Some((body, flags))
    } else {
        None
    }
}

// ---------- Rule store ----------

/// One loaded generation of the rule document.
#[derive(Debug, Default)]
pub struct RuleSnapshot {
    document: Option<RuleDocument>,
    /// The document exactly as read from disk; base for write-backs
    original: Option<Value>,
    rules: RuleTable,
    errors: Vec<GuardError>,
}

impl RuleSnapshot {
    fn failed(error: GuardError) -> Self {
        Self {
            errors: vec![error],
            ..Default::default()
        }
    }

    fn from_document(document: RuleDocument, original: Option<Value>) -> Self {
        let (rules, errors) = compile_rules(&document);
        Self {
            document: Some(document),
            original,
            rules,
            errors,
        }
    }

    pub fn document(&self) -> Option<&RuleDocument> {
        self.document.as_ref()
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    pub fn errors(&self) -> &[GuardError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty() || self.document.is_none()
    }

    pub fn error_messages(&self) -> Vec<String> {
        if self.errors.is_empty() && self.document.is_none() {
            return vec!["No rule document loaded".to_string()];
        }
        self.errors.iter().map(ToString::to_string).collect()
    }

    /// Whether `app_env` is the environment the document designates for testing.
    pub fn is_testing(&self, app_env: &str) -> bool {
        self.document
            .as_ref()
            .is_some_and(|doc| doc.testing.app_env == app_env)
    }
}

/// Holds the current rule snapshot. Loading never panics: a failed load
/// yields a snapshot whose errors the gate reports on every request.
#[derive(Debug)]
pub struct RuleStore {
    path: Option<PathBuf>,
    snapshot: RwLock<Arc<RuleSnapshot>>,
}

impl RuleStore {
    /// Load the rule document at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let snapshot = Self::read_snapshot(&path);
        Self {
            path: Some(path),
            snapshot: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// In-memory store without a backing file. Reload is a no-op and
    /// write-backs are refused.
    pub fn from_document(document: RuleDocument) -> Self {
        Self {
            path: None,
            snapshot: RwLock::new(Arc::new(RuleSnapshot::from_document(document, None))),
        }
    }

    fn read_snapshot(path: &Path) -> RuleSnapshot {
        let snapshot = match read_raw(path) {
            Ok(raw) => match parse_document(path, raw.clone()) {
                Ok(document) => RuleSnapshot::from_document(document, Some(raw)),
                Err(e) => RuleSnapshot::failed(e),
            },
            Err(e) => RuleSnapshot::failed(e),
        };

        if snapshot.has_errors() {
            tracing::error!(
                path = %path.display(),
                errors = %snapshot.error_messages().join(" # "),
                "Loading of permissions failed"
            );
        } else {
            tracing::info!(
                path = %path.display(),
                controller_action_permissions = snapshot.rules.controller_actions.len(),
                custom_permissions = snapshot.rules.custom.len(),
                "Loaded permission rules"
            );
        }
        snapshot
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn snapshot(&self) -> Arc<RuleSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Re-read the backing file and swap in the new snapshot.
    pub fn reload(&self) -> Arc<RuleSnapshot> {
        let Some(path) = &self.path else {
            return self.snapshot();
        };
        let fresh = Arc::new(Self::read_snapshot(path));
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = fresh.clone();
        fresh
    }

    /// Write temporary permissions into the `testing` block of the rule file.
    ///
    /// Only the two temporary fields of the original snapshot are touched;
    /// every other key is written back exactly as it was loaded.
    pub fn persist_temporary(
        &self,
        app_env: &str,
        permissions: &[String],
        lifetime: Lifetime,
    ) -> Result<(), GuardError> {
        let snapshot = self.snapshot();
        if snapshot.has_errors() {
            return Err(GuardError::Persist(
                "the rule document was loaded with errors".into(),
            ));
        }
        if !snapshot.is_testing(app_env) {
            return Err(GuardError::Persist(format!(
                "environment `{app_env}` is not the testing environment"
            )));
        }
        let (Some(path), Some(original)) = (&self.path, &snapshot.original) else {
            return Err(GuardError::Persist(
                "the rule store has no backing file".into(),
            ));
        };

        let mut updated = original.clone();
        write_testing_fields(&mut updated, permissions, lifetime)?;
        let serialized =
            serde_yaml::to_string(&updated).map_err(|e| GuardError::Persist(e.to_string()))?;
        write_atomically(path, &serialized)?;
        Ok(())
    }

    /// Read the temporary grant currently stored in the rule file.
    pub fn stored_temporary_grant(&self) -> Result<TemporaryGrant, GuardError> {
        match &self.path {
            Some(path) => Ok(load(path)?.testing.temporary_grant()),
            None => Ok(self
                .snapshot()
                .document()
                .map(|doc| doc.testing.temporary_grant())
                .unwrap_or_default()),
        }
    }

    /// Every permission name defined by the document, sorted.
    pub fn permission_names(&self) -> Vec<String> {
        self.permission_array().into_keys().collect()
    }

    /// Permission name -> its conditions and patterns, in document order.
    pub fn permission_array(&self) -> BTreeMap<String, Vec<String>> {
        let snapshot = self.snapshot();
        let mut result: BTreeMap<String, Vec<String>> = BTreeMap::new();
        if let Some(doc) = snapshot.document() {
            for (name, rules) in doc
                .controller_action_permissions
                .iter()
                .chain(doc.custom_permissions.iter())
            {
                result.entry(name.clone()).or_default().extend(rules.iter().cloned());
            }
        }
        result
    }
}

fn write_testing_fields(
    document: &mut Value,
    permissions: &[String],
    lifetime: Lifetime,
) -> Result<(), GuardError> {
    let root = document
        .as_mapping_mut()
        .ok_or_else(|| GuardError::Persist("document root is not a mapping".into()))?;
    if !matches!(root.get("testing"), Some(Value::Mapping(_))) {
        root.insert(Value::from("testing"), Value::Mapping(Mapping::new()));
    }
    let testing = root
        .get_mut("testing")
        .and_then(Value::as_mapping_mut)
        .ok_or_else(|| GuardError::Persist("`testing` is not a mapping".into()))?;

    let joined = if permissions.is_empty() {
        Value::Null
    } else {
        Value::from(permissions.join(","))
    };
    testing.insert(Value::from("temporaryPermissions"), joined);
    testing.insert(
        Value::from("temporaryRequestCounter"),
        Value::from(lifetime.counter()),
    );
    Ok(())
}

/// Write to a sibling file and rename over the target so readers never see
/// a half-written document.
pub(crate) fn write_atomically(path: &Path, contents: &str) -> Result<(), GuardError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
