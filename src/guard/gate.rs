use std::sync::Arc;

use crate::guard::descriptor::{HandlerRegistry, RequestDescriptor};
use crate::guard::loader::RuleStore;
use crate::guard::resolver;
use crate::guard::temporary::{
    DocumentTemporaryStore, FileTemporaryStore, MemoryTemporaryStore, TemporaryPermissions,
    TemporaryStore,
};
use crate::guard::types::{Actor, PermissionSet, RuleDocument, GUEST_PERMISSION};
use crate::settings::{Settings, TemporaryBackend};

pub const PERMISSION_DENIED_MESSAGE: &str = "Permission denied";

/// What the gate needs to know about an inbound request.
#[derive(Clone, Copy)]
pub struct GateRequest<'a> {
    /// Fully-qualified handler identifier, e.g. `App.Http.Controllers.UsersController@edit`
    pub handler: &'a str,
    /// Request path as seen by the router
    pub path: &'a str,
    /// Client asked for a JSON response
    pub wants_json: bool,
    /// Authenticated actor, `None` for guests
    pub actor: Option<&'a dyn Actor>,
}

/// Result of evaluating a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Pass the request on unchanged
    Continue,
    /// Run the request again against another handler of the same controller
    Redispatch { target: String },
    /// Send the client to the configured no-permission route
    Redirect { location: String },
    /// Terminal error response
    Reject(Rejection),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    /// The rule document could not be loaded or contains invalid rules
    LoadFailed,
    /// The handler identifier did not have the expected shape
    DescriptorFailed,
    /// No matching permission and no other deny strategy configured
    PermissionDenied,
}

/// Terminal error response; always rendered with status 501.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub kind: RejectionKind,
    pub messages: Vec<String>,
    pub json: bool,
}

impl Rejection {
    pub const STATUS: u16 = 501;

    pub fn new(kind: RejectionKind, messages: Vec<String>, json: bool) -> Self {
        Self {
            kind,
            messages,
            json,
        }
    }

    pub fn permission_denied(json: bool) -> Self {
        Self::new(
            RejectionKind::PermissionDenied,
            vec![PERMISSION_DENIED_MESSAGE.to_string()],
            json,
        )
    }

    /// JSON array of messages, or the messages joined with `.`.
    pub fn body(&self) -> String {
        if self.json {
            serde_json::to_string(&self.messages).unwrap_or_else(|_| "[]".to_string())
        } else {
            self.messages.join(".")
        }
    }
}

pub struct Gate {
    rules: Arc<RuleStore>,
    temporary: Arc<TemporaryPermissions>,
    registry: HandlerRegistry,
}

impl Gate {
    pub fn new(
        rules: Arc<RuleStore>,
        temporary: Arc<TemporaryPermissions>,
        registry: HandlerRegistry,
    ) -> Self {
        Self {
            rules,
            temporary,
            registry,
        }
    }

    /// Wire a gate from settings: rule file, temporary store backend and the
    /// environment name that decides whether testing behaviour applies.
    pub fn from_settings(settings: &Settings, registry: HandlerRegistry) -> Self {
        let rules = Arc::new(RuleStore::open(&settings.rules.path));
        let store: Arc<dyn TemporaryStore> = match settings.temporary.backend {
            TemporaryBackend::Memory => Arc::new(MemoryTemporaryStore::new()),
            TemporaryBackend::File => Arc::new(FileTemporaryStore::new(&settings.temporary.path)),
            TemporaryBackend::Document => Arc::new(DocumentTemporaryStore::new(
                rules.clone(),
                settings.app_env.clone(),
            )),
        };
        let temporary = Arc::new(TemporaryPermissions::new(
            rules.clone(),
            store,
            settings.app_env.clone(),
        ));
        Self::new(rules, temporary, registry)
    }

    pub fn rules(&self) -> &Arc<RuleStore> {
        &self.rules
    }

    pub fn temporary(&self) -> &Arc<TemporaryPermissions> {
        &self.temporary
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn evaluate(&self, request: &GateRequest<'_>) -> Decision {
        let snapshot = self.rules.snapshot();
        let document = match snapshot.document() {
            Some(document) if !snapshot.has_errors() => document,
            _ => {
                let messages = snapshot.error_messages();
                tracing::error!(
                    errors = %messages.join(" # "),
                    "Loading of permissions failed"
                );
                return Decision::Reject(Rejection::new(
                    RejectionKind::LoadFailed,
                    messages,
                    request.wants_json,
                ));
            }
        };

        let testing = self.temporary.is_testing(&snapshot);
        let debug = document.debug || (testing && document.testing.debug);

        // The no-permission route must stay reachable even when it is not
        // served by a conventional controller.
        if is_no_permission_route(document, request.path) {
            if debug {
                tracing::info!(path = %request.path, "Request to no-permission route allowed");
            }
            return Decision::Continue;
        }

        let descriptor = match RequestDescriptor::from_handler_path(request.handler) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                tracing::error!(handler = %request.handler, error = %e, "Cannot describe request");
                return Decision::Reject(Rejection::new(
                    RejectionKind::DescriptorFailed,
                    vec![e.to_string()],
                    request.wants_json,
                ));
            }
        };

        if debug {
            tracing::info!(
                controller_path = %descriptor.controller_method_path(),
                "Request received"
            );
        }

        if descriptor.is_permission_denied_action() {
            return Decision::Continue;
        }

        let allowed = match resolver::resolve(&descriptor, snapshot.rules()) {
            Ok(allowed) => non_empty(allowed),
            Err(e) => {
                tracing::error!(error = %e, "Loading of permissions failed");
                return Decision::Reject(Rejection::new(
                    RejectionKind::LoadFailed,
                    vec![e.to_string()],
                    request.wants_json,
                ));
            }
        };
        let held = self.actor_permissions(request.actor, document, testing, debug);

        if allowed.iter().any(|p| held.contains(p)) {
            if debug {
                tracing::info!(
                    allowed = %join(&allowed),
                    actor = %join(&held),
                    "Allow"
                );
            }
            return Decision::Continue;
        }

        if debug {
            tracing::info!(
                allowed = %join(&allowed),
                actor = %join(&held),
                "Deny"
            );
        }
        self.deny(&descriptor, document, request.wants_json, debug)
    }

    fn actor_permissions(
        &self,
        actor: Option<&dyn Actor>,
        document: &RuleDocument,
        testing: bool,
        debug: bool,
    ) -> PermissionSet {
        let mut held = match actor {
            Some(actor) => actor.permissions(),
            None => vec![GUEST_PERMISSION.to_string()],
        };
        if testing {
            let extra = self.temporary.effective_permissions(&document.testing);
            if debug {
                tracing::info!(permissions = %extra.join(","), "Testing permissions applied");
            }
            held.extend(extra);
        }
        non_empty(held)
    }

    fn deny(
        &self,
        descriptor: &RequestDescriptor,
        document: &RuleDocument,
        wants_json: bool,
        debug: bool,
    ) -> Decision {
        if descriptor.has_permission_denied_handler(&self.registry) {
            let target = descriptor.permission_denied_target();
            if debug {
                tracing::info!(target = %target, "Deny with permissionDenied handler");
            }
            return Decision::Redispatch { target };
        }

        if let Some(route) = document.no_permission_route() {
            if debug {
                tracing::info!(route = %route, "Deny with defaultNoPermissionRoute");
            }
            return Decision::Redirect {
                location: route.to_string(),
            };
        }

        if debug {
            tracing::info!("Deny with 501 error");
        }
        Decision::Reject(Rejection::permission_denied(wants_json))
    }
}

fn is_no_permission_route(document: &RuleDocument, path: &str) -> bool {
    document
        .no_permission_route()
        .is_some_and(|route| route.trim_matches('/') == path.trim_matches('/'))
}

fn non_empty(permissions: impl IntoIterator<Item = String>) -> PermissionSet {
    permissions
        .into_iter()
        .filter(|p| !p.trim().is_empty())
        .collect()
}

fn join(permissions: &PermissionSet) -> String {
    permissions
        .iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(",")
}
