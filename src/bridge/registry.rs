use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::bridge::protocol::{PresentationContext, ReplyPayload, RequestId, RequestKind, TabId};

/// Terminal result of a pending request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Confirmed(ReplyPayload),
    Rejected,
    /// The requesting tab went away before the user decided
    ContextClosed,
    TimedOut,
    /// The surface could not be brought up, so nobody will ever decide
    Abandoned,
}

impl Outcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Outcome::Confirmed(_))
    }
}

/// Callback fired exactly once with the outcome of a request.
///
/// It runs while the owner holds the registry, so it must not call back into it.
pub type ResolveCallback = Box<dyn FnOnce(Outcome) + Send>;

/// Metadata of a request waiting on the presentation surface
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequest {
    pub id: RequestId,
    pub tab: TabId,
    pub kind: RequestKind,
    pub origin: String,
    pub context: PresentationContext,
    pub created_at: DateTime<Utc>,
}

impl PendingRequest {
    pub fn new(tab: TabId, kind: RequestKind, origin: &str, context: PresentationContext) -> Self {
        Self {
            id: RequestId::generate(),
            tab,
            kind,
            origin: origin.to_string(),
            context,
            created_at: Utc::now(),
        }
    }
}

struct Entry {
    request: PendingRequest,
    on_resolve: ResolveCallback,
}

/// Exactly-once correlation between page calls and surface resolutions.
///
/// `resolve` is the only way an entry leaves the map.
#[derive(Default)]
pub struct RequestRegistry {
    entries: HashMap<RequestId, Entry>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `on_resolve` under the request id. Returns `false` and leaves the
    /// existing entry untouched if the id is already registered.
    pub fn register(&mut self, request: PendingRequest, on_resolve: ResolveCallback) -> bool {
        if self.entries.contains_key(&request.id) {
            log::error!(
                "❌ Registry: duplicate request id {} ({}), ignoring registration",
                request.id,
                request.kind
            );
            return false;
        }

        log::info!(
            "📝 Registry: pending {} {} for tab {} ({})",
            request.kind,
            request.id,
            request.tab,
            request.origin
        );
        let id = request.id.clone();
        self.entries.insert(id, Entry { request, on_resolve });
        true
    }

    /// Remove the entry and hand `outcome` to its callback. Unknown or already
    /// settled ids return `false` with no side effect.
    pub fn resolve(&mut self, id: &RequestId, outcome: Outcome) -> bool {
        match self.entries.remove(id) {
            Some(entry) => {
                log::info!(
                    "✅ Registry: {} {} settled ({})",
                    entry.request.kind,
                    id,
                    if outcome.is_confirmed() { "confirmed" } else { "not confirmed" }
                );
                (entry.on_resolve)(outcome);
                true
            }
            None => {
                log::debug!("Registry: ignoring resolution for unknown or settled id {}", id);
                false
            }
        }
    }

    /// Settle every entry matching `predicate` with [`Outcome::ContextClosed`].
    pub fn cancel_all<F>(&mut self, predicate: F) -> usize
    where
        F: Fn(&PendingRequest) -> bool,
    {
        let doomed: Vec<RequestId> = self
            .entries
            .values()
            .filter(|entry| predicate(&entry.request))
            .map(|entry| entry.request.id.clone())
            .collect();

        doomed
            .iter()
            .filter(|id| self.resolve(id, Outcome::ContextClosed))
            .count()
    }

    pub fn get(&self, id: &RequestId) -> Option<&PendingRequest> {
        self.entries.get(id).map(|entry| &entry.request)
    }

    /// Snapshot of outstanding requests, oldest first
    pub fn pending(&self) -> Vec<PendingRequest> {
        let mut pending: Vec<PendingRequest> =
            self.entries.values().map(|entry| entry.request.clone()).collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        pending
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
