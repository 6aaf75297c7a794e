//! axum integration: a per-route middleware that runs the gate before the
//! handler, and an [`ActionTable`] that records which handler identifier each
//! route serves so denied requests can be re-dispatched to `permissionDenied`.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::handler::Handler;
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{from_fn_with_state, Next};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{on, MethodFilter, MethodRouter};
use axum::{Extension, Json, Router};
use tower::ServiceExt;

use crate::guard::descriptor::HandlerRegistry;
use crate::guard::gate::{Decision, Gate, GateRequest, Rejection};
use crate::guard::types::Actor;

/// Handler identifier of the matched route, e.g. `App.Http.Controllers.UsersController@edit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget(pub String);

/// Authenticated actor for the request. Inserted by the host's authentication
/// layer; requests without it are evaluated as guests.
#[derive(Clone)]
pub struct CurrentActor(pub Arc<dyn Actor>);

/// True when the first media type of the `Accept` header is JSON.
pub fn wants_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .and_then(|accept| accept.split(',').next())
        .map(|first| {
            first
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
        .is_some_and(|media| media.contains("/json") || media.contains("+json"))
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let status = StatusCode::NOT_IMPLEMENTED;
        if self.json {
            (status, Json(self.messages)).into_response()
        } else {
            (status, self.messages.join(".")).into_response()
        }
    }
}

#[derive(Clone)]
pub struct GuardState {
    gate: Arc<Gate>,
    actions: Arc<HashMap<String, Router>>,
}

impl GuardState {
    /// State without re-dispatch targets; denied requests fall through to
    /// the redirect or error strategies.
    pub fn new(gate: Arc<Gate>) -> Self {
        Self {
            gate,
            actions: Arc::new(HashMap::new()),
        }
    }

    pub fn gate(&self) -> &Arc<Gate> {
        &self.gate
    }

    fn decide(&self, request: &Request) -> Decision {
        let handler = request
            .extensions()
            .get::<RouteTarget>()
            .map(|t| t.0.as_str())
            .unwrap_or_default();
        let actor = request.extensions().get::<CurrentActor>();
        self.gate.evaluate(&GateRequest {
            handler,
            path: request.uri().path(),
            wants_json: wants_json(request.headers()),
            actor: actor.map(|a| a.0.as_ref()),
        })
    }

    async fn redispatch(&self, target: String, mut request: Request) -> Response {
        let json = wants_json(request.headers());
        let Some(router) = self.actions.get(&target).cloned() else {
            tracing::warn!(target = %target, "No route registered for re-dispatch target");
            return Rejection::permission_denied(json).into_response();
        };

        request.extensions_mut().insert(RouteTarget(target));
        match self.decide(&request) {
            Decision::Continue => match router.oneshot(request).await {
                Ok(response) => response,
                Err(never) => match never {},
            },
            Decision::Redirect { location } => Redirect::to(&location).into_response(),
            Decision::Reject(rejection) => rejection.into_response(),
            // a second re-dispatch would loop
            Decision::Redispatch { .. } => Rejection::permission_denied(json).into_response(),
        }
    }
}

/// Middleware for `axum::middleware::from_fn_with_state`. Expects a
/// [`RouteTarget`] extension on the request; without one the gate rejects
/// the request as undescribable.
pub async fn guard_middleware(
    State(state): State<GuardState>,
    request: Request,
    next: Next,
) -> Response {
    match state.decide(&request) {
        Decision::Continue => next.run(request).await,
        Decision::Redirect { location } => Redirect::to(&location).into_response(),
        Decision::Reject(rejection) => rejection.into_response(),
        Decision::Redispatch { target } => state.redispatch(target, request).await,
    }
}

struct GuardedRoute {
    path: String,
    target: String,
    method_router: MethodRouter,
}

/// Routes keyed by handler identifier. Every route gets its own guard layer
/// and every registered identifier becomes a re-dispatch target.
#[derive(Default)]
pub struct ActionTable {
    routes: Vec<GuardedRoute>,
    actions: HashMap<String, Router>,
}

impl ActionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `handler` at `path` for `filter`, identified as `target`.
    pub fn route<H, T>(mut self, path: &str, filter: MethodFilter, target: &str, handler: H) -> Self
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        self.actions
            .insert(target.to_string(), Router::new().fallback(handler.clone()));
        self.routes.push(GuardedRoute {
            path: path.to_string(),
            target: target.to_string(),
            method_router: on(filter, handler),
        });
        self
    }

    /// Register a handler that is only reachable by re-dispatch, typically
    /// `...Controller@permissionDenied`.
    pub fn action<H, T>(mut self, target: &str, handler: H) -> Self
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        self.actions
            .insert(target.to_string(), Router::new().fallback(handler));
        self
    }

    /// Capability lookup for [`Gate::new`] / [`Gate::from_settings`].
    pub fn registry(&self) -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        for target in self.actions.keys() {
            registry.register_handler(target);
        }
        registry
    }

    pub fn into_router(self, gate: Arc<Gate>) -> Router {
        let state = GuardState {
            gate,
            actions: Arc::new(self.actions),
        };
        self.routes.into_iter().fold(Router::new(), |router, route| {
            let guarded = route
                .method_router
                .layer::<_, Infallible>(from_fn_with_state(state.clone(), guard_middleware))
                .layer(Extension(RouteTarget(route.target)));
            router.route(&route.path, guarded)
        })
    }
}
