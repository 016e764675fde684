use std::sync::Arc;

use crate::adapter::{IdentityAdapter, OwnedContext};
use crate::{Error, ErrorKind, Result, SecurityPackage};

/// The initiating side of a handshake, authenticating as the calling thread's identity.
///
/// Mostly useful to run a loop-back handshake against a [`Negotiator`](crate::negotiator::Negotiator):
///
/// ```no_run
/// # fn run(provider: &winauth::AuthProvider) -> winauth::Result<()> {
/// use winauth::{ConnectionId, SecurityPackage};
///
/// let id = ConnectionId::from("loopback");
/// let mut client = provider.client_context(SecurityPackage::Negotiate, None)?;
/// let mut outcome = provider.accept_token(&id, client.token(), SecurityPackage::Negotiate)?;
///
/// while outcome.continue_needed() {
///     client.initialize(outcome.token().unwrap_or_default())?;
///     outcome = provider.accept_token(&id, client.token(), SecurityPackage::Negotiate)?;
/// }
/// if let (true, Some(token)) = (client.continue_needed(), outcome.token()) {
///     client.initialize(token)?;
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ClientContext {
    adapter: Arc<dyn IdentityAdapter>,
    package: SecurityPackage,
    target_name: Option<String>,
    context: Option<OwnedContext>,
    token: Vec<u8>,
    continue_needed: bool,
}

impl ClientContext {
    /// Starts a handshake and produces the first token for the server.
    #[instrument(level = "debug", skip(adapter))]
    pub fn current(adapter: Arc<dyn IdentityAdapter>, package: SecurityPackage, target_name: Option<&str>) -> Result<Self> {
        let mut context = Self {
            adapter,
            package,
            target_name: target_name.map(str::to_owned),
            context: None,
            token: Vec::new(),
            continue_needed: true,
        };
        context.initialize(&[])?;

        Ok(context)
    }

    /// Processes the server's reply to the last token.
    pub fn initialize(&mut self, input: &[u8]) -> Result<()> {
        if !self.continue_needed {
            return Err(Error::new(ErrorKind::Token, "the client handshake is already complete"));
        }

        let existing = self.context.as_ref().map(OwnedContext::handle);
        let step = self
            .adapter
            .initialize_negotiation(existing, input, self.package, self.target_name.as_deref())
            .map_err(|err| {
                self.continue_needed = false;
                self.context = None;
                Error::from(err)
            })?;

        if self.context.is_none() {
            self.context = Some(OwnedContext::new(Arc::clone(&self.adapter), step.context));
        }
        self.token = step.output.unwrap_or_default();
        self.continue_needed = step.continue_needed;
        debug!(
            package = %self.package,
            token_len = self.token.len(),
            continue_needed = self.continue_needed,
            "Client round"
        );

        Ok(())
    }

    /// The token to send to the server; empty when the last round produced none.
    pub fn token(&self) -> &[u8] {
        &self.token
    }

    pub fn continue_needed(&self) -> bool {
        self.continue_needed
    }

    pub fn package(&self) -> SecurityPackage {
        self.package
    }
}
