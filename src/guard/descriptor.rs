use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;

use crate::guard::errors::GuardError;
use crate::guard::types::PERMISSION_DENIED_ACTION;

/// `<namespace>.Controllers.<Name>Controller@<action>`; `::` and `\` are
/// accepted as namespace separators too.
static HANDLER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^.+(?:\.|::|\\)Controllers(?:\.|::|\\)(?P<controller>.+)Controller@.+$")
        .expect("handler pattern is a valid regex")
});

/// Normalized identity of the handler a request is routed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    controller_name: String,
    controller_method: String,
    controller_path: String,
    controller_method_path: String,
}

impl RequestDescriptor {
    /// Parse a fully-qualified handler identifier such as
    /// `App.Http.Controllers.UsersController@edit`.
    pub fn from_handler_path(handler: &str) -> Result<Self, GuardError> {
        let captures = HANDLER_PATTERN
            .captures(handler)
            .ok_or_else(|| GuardError::DescriptorExtraction(handler.to_string()))?;
        let controller_name = captures
            .name("controller")
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| GuardError::DescriptorExtraction(handler.to_string()))?;
        let (controller_path, controller_method) = handler
            .split_once('@')
            .ok_or_else(|| GuardError::DescriptorExtraction(handler.to_string()))?;

        Ok(Self {
            controller_name,
            controller_method: controller_method.to_string(),
            controller_path: controller_path.to_string(),
            controller_method_path: handler.to_string(),
        })
    }

    /// Build a descriptor from parts the host already knows.
    pub fn new(
        controller_name: impl Into<String>,
        controller_method: impl Into<String>,
        controller_path: impl Into<String>,
    ) -> Self {
        let controller_method = controller_method.into();
        let controller_path = controller_path.into();
        Self {
            controller_name: controller_name.into(),
            controller_method_path: format!("{controller_path}@{controller_method}"),
            controller_method,
            controller_path,
        }
    }

    pub fn controller_name(&self) -> &str {
        &self.controller_name
    }

    pub fn controller_method(&self) -> &str {
        &self.controller_method
    }

    pub fn controller_path(&self) -> &str {
        &self.controller_path
    }

    /// The raw `path@action` handler identifier, matched by custom rules.
    pub fn controller_method_path(&self) -> &str {
        &self.controller_method_path
    }

    pub fn is_permission_denied_action(&self) -> bool {
        self.controller_method == PERMISSION_DENIED_ACTION
    }

    /// The handler a denied request is re-dispatched to.
    pub fn permission_denied_target(&self) -> String {
        format!("{}@{PERMISSION_DENIED_ACTION}", self.controller_path)
    }

    pub fn has_permission_denied_handler(&self, registry: &HandlerRegistry) -> bool {
        registry.supports(&self.controller_path, PERMISSION_DENIED_ACTION)
    }
}

/// Capability lookup: controller type identifier -> action names it defines.
/// Populated once at startup by whoever registers the handlers.
#[derive(Debug, Clone, Default)]
pub struct HandlerRegistry {
    actions: HashMap<String, HashSet<String>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, controller_path: &str, action: &str) {
        self.actions
            .entry(controller_path.to_string())
            .or_default()
            .insert(action.to_string());
    }

    /// Register a `path@action` handler identifier. Identifiers without an
    /// action are ignored.
    pub fn register_handler(&mut self, handler: &str) {
        if let Some((path, action)) = handler.split_once('@') {
            if !path.is_empty() && !action.is_empty() {
                self.register(path, action);
            }
        }
    }

    pub fn supports(&self, controller_path: &str, action: &str) -> bool {
        self.actions
            .get(controller_path)
            .is_some_and(|actions| actions.contains(action))
    }

    pub fn controller_count(&self) -> usize {
        self.actions.len()
    }
}
