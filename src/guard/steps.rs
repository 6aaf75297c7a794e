//! Step definitions for acceptance-test runners.
//!
//! Scenarios phrase grants as "I have the permission `edit`" or "I have the
//! permissions `edit,view` for 3 requests". Temporary permissions are cleared
//! before every scenario so grants never leak between them.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::guard::gate::Gate;
use crate::guard::loader::RuleStore;
use crate::guard::temporary::TemporaryPermissions;
use crate::guard::types::{split_list, Lifetime};

#[derive(Clone)]
pub struct ScenarioSteps {
    rules: Arc<RuleStore>,
    temporary: Arc<TemporaryPermissions>,
}

impl ScenarioSteps {
    pub fn new(rules: Arc<RuleStore>, temporary: Arc<TemporaryPermissions>) -> Self {
        Self { rules, temporary }
    }

    pub fn for_gate(gate: &Gate) -> Self {
        Self::new(gate.rules().clone(), gate.temporary().clone())
    }

    /// Before-scenario hook.
    pub fn reset_before_each_scenario(&self) -> bool {
        self.temporary.reset()
    }

    /// "I have the permission :permission [for :lifetime requests]"
    pub fn given_permission(&self, permission: &str, lifetime: Lifetime) -> bool {
        self.temporary.set(&[permission.to_string()], lifetime)
    }

    /// "I have the permissions :permissions [for :lifetime requests]", comma separated.
    pub fn given_permissions(&self, permissions: &str, lifetime: Lifetime) -> bool {
        self.temporary.set(&split_list(permissions), lifetime)
    }

    pub fn permission_names(&self) -> Vec<String> {
        self.rules.permission_names()
    }

    pub fn permission_array(&self) -> BTreeMap<String, Vec<String>> {
        self.rules.permission_array()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::temporary::MemoryTemporaryStore;
    use crate::guard::types::RuleDocument;

    fn steps(app_env: &str) -> ScenarioSteps {
        let mut doc = RuleDocument::default();
        doc.controller_action_permissions
            .insert("edit".into(), vec!["Users@edit".into()]);
        doc.custom_permissions
            .insert("audit".into(), vec!["Controllers".into()]);
        doc.custom_permissions
            .insert("edit".into(), vec!["@update$".into()]);
        let rules = Arc::new(RuleStore::from_document(doc));
        let temporary = Arc::new(TemporaryPermissions::new(
            rules.clone(),
            Arc::new(MemoryTemporaryStore::new()),
            app_env,
        ));
        ScenarioSteps::new(rules, temporary)
    }

    #[test]
    fn test_given_permission_defaults_to_unlimited() {
        let steps = steps("testing");
        assert!(steps.given_permission("edit", Lifetime::default()));
        assert_eq!(steps.temporary.consume(), vec!["edit"]);
        assert_eq!(steps.temporary.consume(), vec!["edit"]);
    }

    #[test]
    fn test_given_permissions_for_requests() {
        let steps = steps("testing");
        assert!(steps.given_permissions("edit, view", Lifetime::Requests(1)));
        assert_eq!(steps.temporary.consume(), vec!["edit", "view"]);
        assert!(steps.temporary.consume().is_empty());
    }

    #[test]
    fn test_reset_before_each_scenario() {
        let steps = steps("testing");
        assert!(steps.given_permission("edit", Lifetime::Unlimited));
        assert!(steps.reset_before_each_scenario());
        assert!(steps.temporary.consume().is_empty());
    }

    #[test]
    fn test_steps_refused_outside_testing() {
        let steps = steps("production");
        assert!(!steps.given_permission("edit", Lifetime::Unlimited));
        assert!(!steps.reset_before_each_scenario());
    }

    #[test]
    fn test_permission_catalogue() {
        let steps = steps("production");
        assert_eq!(steps.permission_names(), vec!["audit", "edit"]);
        assert_eq!(
            steps.permission_array()["edit"],
            vec!["Users@edit", "@update$"]
        );
    }
}
