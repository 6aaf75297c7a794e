use crate::guard::descriptor::RequestDescriptor;
use crate::guard::errors::GuardError;
use crate::guard::loader::compile_rules;
use crate::guard::types::{PermissionSet, RuleDocument};
use crate::guard::RuleTable;

/// Outcome of resolving straight from a rule document: the permissions that
/// matched plus every problem found on the way.
#[derive(Debug, Default)]
pub struct Resolution {
    pub permissions: PermissionSet,
    pub errors: Vec<GuardError>,
}

/// Permissions that would authorize the request described by `descriptor`:
/// the union of direct controller/action matches and custom pattern matches.
pub fn resolve(
    descriptor: &RequestDescriptor,
    rules: &RuleTable,
) -> Result<PermissionSet, GuardError> {
    let mut permissions = match_controller_actions(descriptor, rules)?;
    permissions.extend(match_custom(descriptor.controller_method_path(), rules));
    Ok(permissions)
}

/// Compile `document` and resolve against it in one go. Malformed rules are
/// reported in [`Resolution::errors`] without stopping the remaining rules
/// from matching.
pub fn resolve_document(descriptor: &RequestDescriptor, document: &RuleDocument) -> Resolution {
    let (rules, mut errors) = compile_rules(document);
    let permissions = match resolve(descriptor, &rules) {
        Ok(permissions) => permissions,
        Err(e) => {
            errors.push(e);
            // the controller/action branch failed; custom rules still apply
            match_custom(descriptor.controller_method_path(), &rules)
        }
    };
    Resolution {
        permissions,
        errors,
    }
}

fn match_controller_actions(
    descriptor: &RequestDescriptor,
    rules: &RuleTable,
) -> Result<PermissionSet, GuardError> {
    let controller = descriptor.controller_name();
    let action = descriptor.controller_method();
    if controller.is_empty() || action.is_empty() {
        return Err(GuardError::Unresolvable);
    }

    Ok(rules
        .controller_actions
        .iter()
        .filter(|rule| rule.conditions.iter().any(|c| c.matches(controller, action)))
        .map(|rule| rule.permission.clone())
        .collect())
}

fn match_custom(handler_path: &str, rules: &RuleTable) -> PermissionSet {
    rules
        .custom
        .iter()
        .filter(|rule| rule.patterns.iter().any(|re| re.is_match(handler_path)))
        .map(|rule| rule.permission.clone())
        .collect()
}
