use serde_yaml::{Mapping, Value};

use super::rules::TestRules;

/// Builder for rule documents
#[derive(Default)]
pub struct RulesBuilder {
    controller_actions: Vec<(String, Vec<String>)>,
    custom: Vec<(String, Vec<String>)>,
    no_permission_route: Option<String>,
    debug: bool,
    testing_env: Option<String>,
    default_permissions: Option<String>,
}

impl RulesBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn permission(mut self, name: &str, conditions: &[&str]) -> Self {
        self.controller_actions
            .push((name.to_string(), strings(conditions)));
        self
    }

    pub fn custom(mut self, name: &str, patterns: &[&str]) -> Self {
        self.custom.push((name.to_string(), strings(patterns)));
        self
    }

    pub fn no_permission_route(mut self, route: &str) -> Self {
        self.no_permission_route = Some(route.to_string());
        self
    }

    pub fn debug(mut self) -> Self {
        self.debug = true;
        self
    }

    /// Designate `app_env` as the testing environment
    pub fn testing(mut self, app_env: &str) -> Self {
        self.testing_env = Some(app_env.to_string());
        self
    }

    pub fn default_permissions(mut self, permissions: &str) -> Self {
        self.default_permissions = Some(permissions.to_string());
        self
    }

    pub fn to_yaml(&self) -> String {
        let mut root = Mapping::new();
        root.insert(
            "controllerActionPermissions".into(),
            to_mapping(&self.controller_actions),
        );
        root.insert("customPermissions".into(), to_mapping(&self.custom));
        if let Some(route) = &self.no_permission_route {
            root.insert("defaultNoPermissionRoute".into(), route.as_str().into());
        }
        root.insert("debug".into(), self.debug.into());

        let mut testing = Mapping::new();
        testing.insert(
            "appEnv".into(),
            self.testing_env.as_deref().unwrap_or("testing").into(),
        );
        if let Some(defaults) = &self.default_permissions {
            testing.insert("defaultPermissions".into(), defaults.as_str().into());
        }
        root.insert("testing".into(), Value::Mapping(testing));
        // unrelated keys must survive write-back
        root.insert("comment".into(), "managed by tests".into());

        serde_yaml::to_string(&Value::Mapping(root)).expect("Failed to serialize rules")
    }

    pub fn build(self) -> TestRules {
        TestRules::new(&self.to_yaml())
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn to_mapping(entries: &[(String, Vec<String>)]) -> Value {
    let mut mapping = Mapping::new();
    for (name, rules) in entries {
        mapping.insert(
            name.as_str().into(),
            Value::Sequence(rules.iter().map(|r| r.as_str().into()).collect()),
        );
    }
    Value::Mapping(mapping)
}
