use crate::{CryptoEngine, Error, IdentityMaterial, Role, Session};

/// Mode of the channel.
///
/// ```text
/// Unencrypted --enable--> Handshaking --complete--> Encrypted
///      ^                       |                        |
///      +----- fatal error / disable --------------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    /// No session. Packets pass through with `encrypted=0`.
    Unencrypted,
    /// Session exists, handshake in progress. Application data is dropped.
    Handshaking,
    /// Handshake done. Application data is encrypted.
    Encrypted,
}

/// The only owner of the session. Creates it, destroys it, and tracks the
/// state that gates what the multiplexer may do with it.
#[derive(Debug)]
pub(crate) struct Channel {
    role: Role,
    state: ChannelState,
    session: Option<Box<dyn Session>>,
}

impl Channel {
    pub fn new(role: Role) -> Self {
        Channel {
            role,
            state: ChannelState::Unencrypted,
            session: None,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_encryption_enabled(&self) -> bool {
        self.session.is_some()
    }

    pub fn enable(
        &mut self,
        engine: &dyn CryptoEngine,
        max_plaintext_size: usize,
        identity: &IdentityMaterial,
    ) -> Result<(), Error> {
        if self.session.is_some() {
            warn!("Encryption already enabled in state {:?}", self.state);
            return Err(Error::AlreadyEnabled);
        }

        let session = engine
            .create_session(self.role, max_plaintext_size, identity)
            .inspect_err(|e| error!("Failed to create {:?} session: {}", self.role, e))?;

        debug!(
            "Created {:?} session, max plaintext {} bytes",
            self.role, max_plaintext_size
        );

        self.session = Some(session);
        self.state = ChannelState::Handshaking;

        Ok(())
    }

    pub fn disable(&mut self) {
        if self.session.take().is_some() {
            debug!("Encryption disabled in state {:?}", self.state);
        }
        self.state = ChannelState::Unencrypted;
    }

    /// Tear down after an unrecoverable handshake error.
    pub fn fail(&mut self, error: &Error) {
        error!("Handshake failed in state {:?}: {}", self.state, error);
        self.session = None;
        self.state = ChannelState::Unencrypted;
    }

    pub fn complete(&mut self) {
        if self.state == ChannelState::Handshaking {
            info!("Handshake complete, {:?} channel encrypted", self.role);
            self.state = ChannelState::Encrypted;
        }
    }

    pub fn session_mut(&mut self) -> Option<&mut (dyn Session + 'static)> {
        self.session.as_deref_mut()
    }
}
