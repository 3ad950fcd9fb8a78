//! The ambient request context (spec §9: "carry caller identity, trace
//! ids, and internal-actor markers via a context handle passed to every
//! operation; never via process-global state").

use tokio_util::sync::CancellationToken;

/// The caller identity carried alongside every request, sourced from the
/// outer transport layer (not specified here — spec §1 Non-goals) and
/// consulted by the audit and authorization middleware.
#[derive(Debug, Clone, Default)]
pub struct Actor {
    /// The caller's declared role, resolved/overridden by the
    /// authorization middleware for cluster-scoped operations (spec §7).
    pub role: String,
    /// The caller's user agent string, recorded verbatim in audit events.
    pub user_agent: Option<String>,
    /// The caller's remote IP, recorded verbatim in audit events.
    pub remote_ip: Option<String>,
    /// The caller's email/identity string, recorded verbatim in audit events.
    pub email: Option<String>,
}

/// The per-call ambient context.
///
/// Cloning a `RequestContext` is cheap: the cancellation token is
/// reference-counted, so every clone observes the same cancellation.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// The caller's identity.
    pub actor: Actor,
    /// A trace id correlating this call across middleware and backend logs.
    pub trace_id: String,
    /// Internal-actor contexts bypass the authorization middleware
    /// entirely (spec §8: "internal-actor contexts bypass checks"). Used
    /// by controllers and migration code acting on the control plane's
    /// own behalf, never by an externally-facing caller.
    pub internal: bool,
    /// Cancelled when the caller gives up or the outer transport closes;
    /// every suspension point (I/O, channel send, cache bootstrap wait)
    /// must select on this (spec §5 CONCURRENCY & RESOURCE MODEL).
    pub cancellation: CancellationToken,
}

impl RequestContext {
    /// Builds a new, non-internal context with a fresh cancellation token.
    pub fn new(actor: Actor, trace_id: impl Into<String>) -> Self {
        Self {
            actor,
            trace_id: trace_id.into(),
            internal: false,
            cancellation: CancellationToken::new(),
        }
    }

    /// Builds a context for an internal caller (controllers, migration),
    /// which bypasses authorization.
    pub fn internal(trace_id: impl Into<String>) -> Self {
        Self {
            actor: Actor::default(),
            trace_id: trace_id.into(),
            internal: true,
            cancellation: CancellationToken::new(),
        }
    }

    /// A child context sharing this context's cancellation token but able
    /// to be cancelled independently via [`CancellationToken::child_token`].
    pub fn child(&self) -> Self {
        Self {
            actor: self.actor.clone(),
            trace_id: self.trace_id.clone(),
            internal: self.internal,
            cancellation: self.cancellation.child_token(),
        }
    }

    /// True once the caller has cancelled this context.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}
