//! Per-connection security context negotiation.
//!
//! Every handshake is keyed by a caller supplied [`ConnectionId`]. A context is created on the
//! first token for an unseen id, advanced once per call and removed from the store as soon as it
//! completes or fails, so a terminal id always starts over.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::adapter::{IdentityAdapter, OwnedContext};
use crate::package::PackageList;
use crate::{Error, ErrorKind, Identity, Result, SecurityPackage};

/// Opaque identifier of one handshake conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for ConnectionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NegotiationState {
    Initial,
    Continuing,
    Completed,
    Failed,
}

impl NegotiationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, NegotiationState::Completed | NegotiationState::Failed)
    }
}

/// What a successful round hands back to the caller.
#[derive(Debug, Clone)]
pub enum NegotiationOutcome {
    /// Send `token` to the client and wait for its next token.
    Continue { token: Vec<u8> },
    /// The client is authenticated. `token`, when present, is the final token for the client.
    Complete { token: Option<Vec<u8>>, identity: Identity },
}

impl NegotiationOutcome {
    pub fn token(&self) -> Option<&[u8]> {
        match self {
            NegotiationOutcome::Continue { token } => Some(token),
            NegotiationOutcome::Complete { token, .. } => token.as_deref(),
        }
    }

    pub fn continue_needed(&self) -> bool {
        matches!(self, NegotiationOutcome::Continue { .. })
    }

    pub fn identity(&self) -> Option<&Identity> {
        match self {
            NegotiationOutcome::Continue { .. } => None,
            NegotiationOutcome::Complete { identity, .. } => Some(identity),
        }
    }

    pub fn into_identity(self) -> Option<Identity> {
        match self {
            NegotiationOutcome::Continue { .. } => None,
            NegotiationOutcome::Complete { identity, .. } => Some(identity),
        }
    }
}

/// State of one handshake.
#[derive(Debug)]
struct SecurityContext {
    package: SecurityPackage,
    handle: Option<OwnedContext>,
    token: Option<Vec<u8>>,
    continue_needed: bool,
    state: NegotiationState,
    last_activity: Instant,
}

impl SecurityContext {
    fn new(package: SecurityPackage) -> Self {
        Self {
            package,
            handle: None,
            token: None,
            continue_needed: false,
            state: NegotiationState::Initial,
            last_activity: Instant::now(),
        }
    }

    fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            package: self.package,
            state: self.state,
            token: self.token.clone(),
            continue_needed: self.continue_needed,
            idle: self.last_activity.elapsed(),
        }
    }

    fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        self.state == NegotiationState::Continuing && now.duration_since(self.last_activity) > ttl
    }
}

/// A copy of an in-flight handshake's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextSnapshot {
    pub package: SecurityPackage,
    pub state: NegotiationState,
    /// The last token produced for the peer.
    pub token: Option<Vec<u8>>,
    pub continue_needed: bool,
    pub idle: Duration,
}

type SharedContext = Arc<Mutex<SecurityContext>>;

/// The active contexts, keyed by connection.
///
/// The map lock is only held to insert, look up or remove an entry. Each context carries its own
/// lock, held for the duration of a round, so rounds on one connection are serialized while
/// different connections proceed independently. Lock order is always context, then map.
#[derive(Debug)]
pub struct ContextStore {
    contexts: Mutex<HashMap<ConnectionId, SharedContext>>,
    ttl: Option<Duration>,
}

impl ContextStore {
    /// `ttl` bounds how long an unfinished handshake may sit idle; `None` keeps it forever.
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            contexts: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.contexts.lock().map(|contexts| contexts.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.contexts
            .lock()
            .map(|contexts| contexts.contains_key(connection_id))
            .unwrap_or_default()
    }

    fn get_or_insert(&self, connection_id: &ConnectionId, package: SecurityPackage) -> Result<SharedContext> {
        let mut contexts = self.contexts.lock()?;
        let context = contexts
            .entry(connection_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(SecurityContext::new(package))));

        Ok(Arc::clone(context))
    }

    /// Copies the state of the handshake for `connection_id`, waiting for a running round.
    pub fn snapshot(&self, connection_id: &ConnectionId) -> Result<Option<ContextSnapshot>> {
        let Some(shared) = self.contexts.lock()?.get(connection_id).cloned() else {
            return Ok(None);
        };
        let context = shared.lock()?;

        Ok(self.is_current(connection_id, &shared)?.then(|| context.snapshot()))
    }

    /// Whether `context` still is the entry for `connection_id`.
    fn is_current(&self, connection_id: &ConnectionId, context: &SharedContext) -> Result<bool> {
        Ok(self
            .contexts
            .lock()?
            .get(connection_id)
            .is_some_and(|current| Arc::ptr_eq(current, context)))
    }

    /// Removes the entry for `connection_id` if it still is `context`.
    fn remove_entry(&self, connection_id: &ConnectionId, context: &SharedContext) -> Result<()> {
        let mut contexts = self.contexts.lock()?;
        if contexts
            .get(connection_id)
            .is_some_and(|current| Arc::ptr_eq(current, context))
        {
            contexts.remove(connection_id);
        }

        Ok(())
    }

    /// Drops the context for `connection_id`, whatever its state. Returns whether one existed.
    pub fn remove(&self, connection_id: &ConnectionId) -> Result<bool> {
        let removed = self.contexts.lock()?.remove(connection_id);

        Ok(removed.is_some())
    }

    /// Drops unfinished contexts idle for longer than the TTL. Contexts in the middle of a round
    /// are skipped. Returns the number of evicted contexts.
    pub fn evict_expired(&self) -> Result<usize> {
        let Some(ttl) = self.ttl else {
            return Ok(0);
        };
        let now = Instant::now();

        let evicted = {
            let mut contexts = self.contexts.lock()?;
            let expired = contexts
                .iter()
                .filter(|(_, context)| {
                    context
                        .try_lock()
                        .map(|context| context.is_expired(ttl, now))
                        .unwrap_or(false)
                })
                .map(|(connection_id, _)| connection_id.clone())
                .collect::<Vec<_>>();

            expired
                .into_iter()
                .filter_map(|connection_id| contexts.remove_entry(&connection_id))
                .collect::<Vec<_>>()
        };

        for (connection_id, _) in &evicted {
            warn!(%connection_id, ?ttl, "Evicting abandoned security context");
        }

        // Native handles are released here, outside the map lock.
        Ok(evicted.len())
    }
}

/// Drives server-side handshakes through an [`IdentityAdapter`].
#[derive(Debug)]
pub struct Negotiator {
    adapter: Arc<dyn IdentityAdapter>,
    store: Arc<ContextStore>,
    packages: PackageList,
}

impl Negotiator {
    pub fn new(adapter: Arc<dyn IdentityAdapter>, store: Arc<ContextStore>, packages: PackageList) -> Self {
        Self {
            adapter,
            store,
            packages,
        }
    }

    pub fn store(&self) -> &Arc<ContextStore> {
        &self.store
    }

    /// Feeds one client token into the handshake for `connection_id`.
    ///
    /// Rounds are applied in call order. On completion or failure the context is gone and the
    /// next call with the same id starts a new handshake.
    #[instrument(level = "debug", skip_all, fields(%connection_id, %package, input_len = input.len()))]
    pub fn accept_token(
        &self,
        connection_id: &ConnectionId,
        input: &[u8],
        package: SecurityPackage,
    ) -> Result<NegotiationOutcome> {
        if !self.packages.contains(package) {
            return Err(Error::new(
                ErrorKind::Package,
                format!("security package {package} is disabled"),
            ));
        }

        let evicted = self.store.evict_expired()?;
        if evicted > 0 {
            debug!(evicted, "Evicted expired security contexts");
        }

        loop {
            let shared = self.store.get_or_insert(connection_id, package)?;
            let mut context = shared.lock()?;

            // Another caller finished, reset or evicted this handshake while we waited.
            if context.state.is_terminal() || !self.store.is_current(connection_id, &shared)? {
                continue;
            }

            if context.package != package {
                return Err(Error::new(
                    ErrorKind::Package,
                    format!(
                        "connection {connection_id} negotiates {}, not {package}",
                        context.package
                    ),
                ));
            }

            let result = self.step(&mut context, input);
            if context.state.is_terminal() {
                self.store.remove_entry(connection_id, &shared)?;
            }

            return result;
        }
    }

    /// Discards the handshake for `connection_id`. Returns whether one was in progress.
    #[instrument(level = "debug", skip(self))]
    pub fn reset(&self, connection_id: &ConnectionId) -> Result<bool> {
        self.store.remove(connection_id)
    }

    fn step(&self, context: &mut SecurityContext, input: &[u8]) -> Result<NegotiationOutcome> {
        let existing = context.handle.as_ref().map(OwnedContext::handle);

        let step = match self.adapter.continue_negotiation(existing, input, context.package) {
            Ok(step) => step,
            Err(err) => {
                context.state = NegotiationState::Failed;
                context.handle = None;
                let err = Error::from(err);
                warn!(kind = ?err.error_type, %err, "Security context negotiation failed");

                return Err(err);
            }
        };

        if context.handle.is_none() {
            context.handle = Some(OwnedContext::new(Arc::clone(&self.adapter), step.context));
        }
        context.token = step.output.clone();
        context.continue_needed = step.continue_needed;
        context.last_activity = Instant::now();

        if step.continue_needed {
            context.state = NegotiationState::Continuing;
            debug!(output_len = step.output.as_ref().map_or(0, Vec::len), "Continue needed");

            return Ok(NegotiationOutcome::Continue {
                token: step.output.unwrap_or_default(),
            });
        }

        match self.complete(context) {
            Ok(identity) => {
                context.state = NegotiationState::Completed;
                info!(fqn = %identity.fqn(), "Security context established");

                Ok(NegotiationOutcome::Complete {
                    token: step.output,
                    identity,
                })
            }
            Err(err) => {
                context.state = NegotiationState::Failed;
                warn!(%err, "Can not resolve the identity of an established security context");

                Err(err)
            }
        }
    }

    fn complete(&self, context: &mut SecurityContext) -> Result<Identity> {
        let handle = context
            .handle
            .take()
            .ok_or_else(|| Error::new(ErrorKind::Internal, "established context has no native handle"))?;
        let token = self.adapter.context_token(handle.handle())?;

        Identity::from_token(&self.adapter, token)
    }
}
