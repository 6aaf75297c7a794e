use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Sentinel for "no default route configured".
pub const NO_ROUTE: &str = "NONE";
/// Permission held by every unauthenticated request.
pub const GUEST_PERMISSION: &str = "guest";
/// Conventional action name that handles denied requests on a controller.
pub const PERMISSION_DENIED_ACTION: &str = "permissionDenied";

/// Set of permission names that would authorize a request. Ordered so that
/// log lines and CLI output are stable.
pub type PermissionSet = BTreeSet<String>;

// ---------- Rule document ----------

/// The parsed rule document (`permissions.yml`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDocument {
    /// permission name -> ordered "<controller>@<action>" conditions
    #[serde(default, deserialize_with = "null_as_default")]
    pub controller_action_permissions: BTreeMap<String, Vec<String>>,
    /// permission name -> ordered regex patterns matched against the handler path
    #[serde(default, deserialize_with = "null_as_default")]
    pub custom_permissions: BTreeMap<String, Vec<String>>,
    #[serde(default = "default_no_permission_route")]
    pub default_no_permission_route: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub debug: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub testing: TestingSection,
}

impl Default for RuleDocument {
    fn default() -> Self {
        Self {
            controller_action_permissions: BTreeMap::new(),
            custom_permissions: BTreeMap::new(),
            default_no_permission_route: default_no_permission_route(),
            debug: false,
            testing: TestingSection::default(),
        }
    }
}

impl RuleDocument {
    /// The configured redirect target for denied requests, if any.
    pub fn no_permission_route(&self) -> Option<&str> {
        let route = self.default_no_permission_route.trim();
        if route.is_empty() || route == NO_ROUTE {
            None
        } else {
            Some(route)
        }
    }
}

fn default_no_permission_route() -> String {
    NO_ROUTE.to_string()
}

/// The `testing` block of the rule document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestingSection {
    /// Environment name in which testing behaviour is switched on
    #[serde(default = "default_app_env")]
    pub app_env: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub debug: bool,
    /// Comma-joined permissions granted on every request while testing
    #[serde(default, deserialize_with = "null_as_default")]
    pub default_permissions: String,
    /// Comma-joined temporary permissions (legacy in-document store)
    #[serde(default)]
    pub temporary_permissions: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub temporary_request_counter: i64,
}

impl Default for TestingSection {
    fn default() -> Self {
        Self {
            app_env: default_app_env(),
            debug: false,
            default_permissions: String::new(),
            temporary_permissions: None,
            temporary_request_counter: 0,
        }
    }
}

impl TestingSection {
    pub fn default_permission_list(&self) -> Vec<String> {
        split_list(&self.default_permissions)
    }

    /// Temporary grant stored inline in the document.
    pub fn temporary_grant(&self) -> TemporaryGrant {
        TemporaryGrant {
            permissions: self
                .temporary_permissions
                .as_deref()
                .map(split_list)
                .unwrap_or_default(),
            lifetime: Lifetime::from_counter(self.temporary_request_counter),
        }
    }
}

fn default_app_env() -> String {
    "testing".to_string()
}

/// Treat an explicit YAML `~` like a missing key.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Split a comma-joined permission list, dropping blanks.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

// ---------- Compiled rules ----------

/// A `<controller>@<action>` condition. `*` on either side matches anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub controller: String,
    pub action: String,
}

impl Condition {
    /// Parse a raw condition; `None` unless it splits into exactly two
    /// non-empty segments on `@`.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split('@');
        let controller = parts.next()?;
        let action = parts.next()?;
        if parts.next().is_some() || controller.is_empty() || action.is_empty() {
            return None;
        }
        Some(Self {
            controller: controller.to_string(),
            action: action.to_string(),
        })
    }

    pub fn matches(&self, controller: &str, action: &str) -> bool {
        (self.controller == controller || self.controller == "*")
            && (self.action == action || self.action == "*")
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.controller, self.action)
    }
}

#[derive(Debug, Clone)]
pub struct ControllerActionRule {
    pub permission: String,
    /// Only the well-formed conditions; malformed ones are reported at compile time
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone)]
pub struct CustomRule {
    pub permission: String,
    pub patterns: Vec<Regex>,
}

// ---------- Temporary permissions ----------

/// How many more requests a temporary grant stays valid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifetime {
    /// Valid until explicitly reset (counter `-1`)
    #[default]
    Unlimited,
    /// Valid for the next `n` requests; `0` means expired
    Requests(u32),
}

impl Lifetime {
    pub const UNLIMITED_COUNTER: i64 = -1;

    /// Any negative counter other than `-1` is treated as expired.
    pub fn from_counter(counter: i64) -> Self {
        match counter {
            Self::UNLIMITED_COUNTER => Lifetime::Unlimited,
            n if n > 0 => Lifetime::Requests(u32::try_from(n).unwrap_or(u32::MAX)),
            _ => Lifetime::Requests(0),
        }
    }

    pub fn counter(self) -> i64 {
        match self {
            Lifetime::Unlimited => Self::UNLIMITED_COUNTER,
            Lifetime::Requests(n) => i64::from(n),
        }
    }

    pub fn is_live(self) -> bool {
        !matches!(self, Lifetime::Requests(0))
    }
}

/// A set of temporary permissions together with its remaining lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemporaryGrant {
    pub permissions: Vec<String>,
    pub lifetime: Lifetime,
}

impl TemporaryGrant {
    pub fn new(permissions: Vec<String>, lifetime: Lifetime) -> Self {
        Self {
            permissions,
            lifetime,
        }
    }

    /// The cleared state written by a reset.
    pub fn expired() -> Self {
        Self::new(Vec::new(), Lifetime::Requests(0))
    }
}

impl Default for TemporaryGrant {
    fn default() -> Self {
        Self::expired()
    }
}

// ---------- Actor ----------

/// The authenticated party a request is made on behalf of.
pub trait Actor: Send + Sync {
    /// Names of the permissions this actor holds.
    fn permissions(&self) -> Vec<String>;
}

impl Actor for Vec<String> {
    fn permissions(&self) -> Vec<String> {
        self.clone()
    }
}
