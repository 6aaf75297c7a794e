pub mod descriptor;
pub mod errors;
pub mod gate;
pub mod loader;
pub mod resolver;
pub mod steps;
pub mod temporary;
pub mod types;
pub mod web;

use types::{ControllerActionRule, CustomRule};

/// Rules compiled from a rule document, ready for matching.
/// Immutable; a reload builds a new table instead of mutating this one.
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    /// Controller/action rules in permission-name order
    pub controller_actions: Vec<ControllerActionRule>,
    /// Custom regex rules in permission-name order
    pub custom: Vec<CustomRule>,
}
