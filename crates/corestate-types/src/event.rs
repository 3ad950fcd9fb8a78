//! Watch event envelope (spec §3 `Event`, §4.1 watch guarantees).

use crate::error::CoreError;
use crate::resource::Resource;
use std::sync::Arc;

/// The kind of a watch event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A resource was created. Also used to replay pre-existing state
    /// during `bootstrap-contents` watches, before `Bootstrapped` fires.
    Created,
    /// A resource was updated to a new version.
    Updated,
    /// A resource was permanently removed.
    Destroyed,
    /// Emitted exactly once after a watch has replayed current state.
    Bootstrapped,
    /// The watch failed and the channel will close after this event.
    Errored,
}

/// A single event delivered on a watch channel.
///
/// `old`/`new` follow the shape implied by `kind`: `Created` carries only
/// `new`, `Updated` carries both, `Destroyed` carries only `old`,
/// `Bootstrapped` carries neither, and `Errored` carries `error`.
#[derive(Debug, Clone)]
pub struct Event {
    /// The kind of event.
    pub kind: EventKind,
    /// The resource's state before the event, if applicable.
    pub old: Option<Resource>,
    /// The resource's state after the event, if applicable.
    pub new: Option<Resource>,
    /// The terminal error, present only when `kind == Errored`.
    pub error: Option<Arc<CoreError>>,
}

impl Event {
    /// Builds a `Created` event.
    pub fn created(new: Resource) -> Self {
        Self {
            kind: EventKind::Created,
            old: None,
            new: Some(new),
            error: None,
        }
    }

    /// Builds an `Updated` event.
    pub fn updated(old: Resource, new: Resource) -> Self {
        Self {
            kind: EventKind::Updated,
            old: Some(old),
            new: Some(new),
            error: None,
        }
    }

    /// Builds a `Destroyed` event.
    pub fn destroyed(old: Resource) -> Self {
        Self {
            kind: EventKind::Destroyed,
            old: Some(old),
            new: None,
            error: None,
        }
    }

    /// Builds the sentinel `Bootstrapped` event.
    pub fn bootstrapped() -> Self {
        Self {
            kind: EventKind::Bootstrapped,
            old: None,
            new: None,
            error: None,
        }
    }

    /// Builds an `Errored` event; the channel closes after this is sent.
    pub fn errored(error: CoreError) -> Self {
        Self {
            kind: EventKind::Errored,
            old: None,
            new: None,
            error: Some(Arc::new(error)),
        }
    }

    /// The version of the resource this event concerns, used to order
    /// deltas for a given resource (invariant v).
    pub fn version(&self) -> Option<crate::resource::Version> {
        self.new
            .as_ref()
            .or(self.old.as_ref())
            .map(|r| r.version)
    }
}
