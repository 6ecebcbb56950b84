// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashMap;
use std::error::Error;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{ConfigError, RatchetConfig};
use crate::crypto::Rng;
use crate::crypto::x25519::{PublicKey, SecretKey};
use crate::key_bundle::PreKeyBundle;
use crate::key_manager::{KeyManager, KeyManagerError, KeyManagerState};
use crate::key_registry::{KeyRegistry, KeyRegistryError, KeyRegistryState};
use crate::message::{CipherMessage, DecodeError, EncodeError, WireMessage, decode_with_limit};
use crate::ratchet::RatchetState;
use crate::session::builder::{
    BuilderError, build_outgoing_friend_request_session, build_outgoing_session,
};
use crate::session::{SessionAddress, SessionCipher, SessionError, SessionRecord};
use crate::traits::{
    IdentityHandle, IdentityManager, IdentityRegistry, NoSessionReset, PreKeyManager,
    PreKeyRegistry, SessionResetHandler, SessionResetStatus, SessionStore,
};

/// Result of a successful decryption.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecryptOutcome {
    pub plaintext: Vec<u8>,

    /// A session reset in progress was completed with this message.
    pub adopted: bool,
}

/// Send and receive messages over pairwise sessions with persistence.
///
/// Every session is guarded by its own lock: all operations on the same session address are
/// serialized, while operations on different sessions run in parallel. Updated records are written
/// to the store before the result is returned, and nothing is written when an operation fails.
///
/// Our own key material and the collected pre-key bundles of others are held by the manager and
/// can be taken out for persistence with [`SessionManager::key_manager_state`] and
/// [`SessionManager::key_registry_state`].
pub struct SessionManager<ID, S, R = NoSessionReset>
where
    ID: IdentityHandle + Serialize + for<'a> Deserialize<'a>,
    S: SessionStore<ID>,
    R: SessionResetHandler<ID>,
{
    store: S,
    reset_handler: R,
    identity_secret: SecretKey,
    keys: Mutex<KeyManagerState>,
    registry: Mutex<KeyRegistryState<ID>>,
    locks: Mutex<HashMap<SessionAddress<ID>, Arc<Mutex<()>>>>,
    rng: Rng,
    config: RatchetConfig,
}

type ManagerResult<T, S> = Result<T, SessionManagerError<S>>;

impl<ID, S, R> SessionManager<ID, S, R>
where
    ID: IdentityHandle + Serialize + for<'a> Deserialize<'a>,
    S: SessionStore<ID>,
    R: SessionResetHandler<ID>,
{
    pub fn new(
        store: S,
        keys: KeyManagerState,
        registry: KeyRegistryState<ID>,
        reset_handler: R,
        rng: Rng,
        config: RatchetConfig,
    ) -> ManagerResult<Self, S::Error> {
        config.validate()?;

        Ok(Self {
            store,
            reset_handler,
            identity_secret: KeyManager::identity_secret(&keys).clone(),
            keys: Mutex::new(keys),
            registry: Mutex::new(registry),
            locks: Mutex::new(HashMap::new()),
            rng,
            config,
        })
    }

    pub fn identity_key(&self) -> ManagerResult<PublicKey, S::Error> {
        Ok(KeyManager::identity_key(&*self.keys()?))
    }

    pub fn config(&self) -> &RatchetConfig {
        &self.config
    }

    /// Snapshot of our key material, for persistence.
    pub fn key_manager_state(&self) -> ManagerResult<KeyManagerState, S::Error> {
        Ok(self.keys()?.clone())
    }

    /// Snapshot of the collected key material of others, for persistence.
    pub fn key_registry_state(&self) -> ManagerResult<KeyRegistryState<ID>, S::Error> {
        Ok(self.registry()?.clone())
    }

    /// Returns our latest pre-key bundle without one-time pre-key.
    pub fn prekey_bundle(&self) -> ManagerResult<PreKeyBundle, S::Error> {
        Ok(KeyManager::prekey_bundle(&*self.keys()?)?)
    }

    /// Returns a pre-key bundle of ours with a fresh one-time pre-key, to be published.
    pub fn generate_onetime_bundle(&self) -> ManagerResult<PreKeyBundle, S::Error> {
        let mut keys = self.keys()?;
        let (keys_i, bundle) = KeyManager::generate_onetime_bundle(keys.clone(), &self.rng)?;
        *keys = keys_i;
        Ok(bundle)
    }

    pub fn rotate_signed_prekey(&self) -> ManagerResult<(), S::Error> {
        let mut keys = self.keys()?;
        *keys = KeyManager::rotate_signed_prekey(keys.clone(), &self.rng)?;
        Ok(())
    }

    /// Registers a pre-key bundle of another party after checking its signature.
    pub fn add_prekey_bundle(&self, id: ID, bundle: PreKeyBundle) -> ManagerResult<(), S::Error> {
        let mut registry = self.registry()?;
        *registry = KeyRegistry::add_bundle(registry.clone(), id, bundle)?;
        Ok(())
    }

    /// Establishes a new session with the device of another party from one of their pre-key
    /// bundles.
    ///
    /// An existing session gets archived; messages which are still on their way can be decrypted
    /// with it.
    pub fn init_outgoing_session(
        &self,
        address: &SessionAddress<ID>,
    ) -> ManagerResult<(), S::Error> {
        let lock = self.session_lock(address)?;
        let _guard = lock.lock().map_err(|_| SessionManagerError::LockPoisoned)?;

        let mut registry = self.registry()?;
        let (registry_i, bundle) = KeyRegistry::key_bundle(registry.clone(), &address.id)
            .unwrap_or_else(|err| match err {});
        let bundle = bundle.ok_or(SessionManagerError::NoPreKeyBundle)?;

        let state = build_outgoing_session(&self.identity_secret, &bundle, &self.rng)?;

        let mut record = self.load(address)?.unwrap_or_default();
        record.promote_state(state, self.config.max_archived_states);
        self.store(address, record)?;

        // The bundle is only marked as used after the session was persisted.
        *registry = registry_i;

        Ok(())
    }

    /// Establishes a new session with the device of another party from their identity key alone.
    pub fn init_friend_request_session(
        &self,
        address: &SessionAddress<ID>,
        their_identity_key: &PublicKey,
    ) -> ManagerResult<(), S::Error> {
        let lock = self.session_lock(address)?;
        let _guard = lock.lock().map_err(|_| SessionManagerError::LockPoisoned)?;

        let state = build_outgoing_friend_request_session(
            &self.identity_secret,
            their_identity_key,
            &self.rng,
        )?;

        let mut record = self.load(address)?.unwrap_or_default();
        record.promote_state(state, self.config.max_archived_states);
        self.store(address, record)?;

        Ok(())
    }

    /// Encrypts a message for the device of another party and returns the encoded wire message.
    pub fn encrypt(
        &self,
        address: &SessionAddress<ID>,
        plaintext: &[u8],
    ) -> ManagerResult<Vec<u8>, S::Error> {
        let lock = self.session_lock(address)?;
        let _guard = lock.lock().map_err(|_| SessionManagerError::LockPoisoned)?;

        let record = self.load(address)?.ok_or(SessionError::NoSession)?;
        let (record_i, message) =
            SessionCipher::<KeyManager>::encrypt(&record, plaintext, &self.config)?;
        let bytes = message.to_bytes()?;
        self.store(address, record_i)?;

        Ok(bytes)
    }

    /// Decodes and decrypts a wire message from the device of another party.
    ///
    /// Pre-key and friend-request messages establish a new session when needed. If no session
    /// existed yet, the reset handler gets to decide if the new session should be accepted.
    pub fn decrypt(
        &self,
        address: &SessionAddress<ID>,
        bytes: &[u8],
    ) -> ManagerResult<DecryptOutcome, S::Error> {
        let message = decode_with_limit(bytes, self.config.max_message_size)?;

        let lock = self.session_lock(address)?;
        let _guard = lock.lock().map_err(|_| SessionManagerError::LockPoisoned)?;

        let record = self.load(address)?.unwrap_or_default();

        if let Some(identity_key) = message.identity_key() {
            self.verify_identity(&address.id, identity_key, &record)?;

            if !record.has_current_state() {
                self.reset_handler
                    .verify_new_session(&address.id, &message)
                    .map_err(|err| SessionManagerError::NewSessionRejected(Box::new(err)))?;
            }
        }

        let (mut record_i, plaintext, keys_update) = match &message {
            WireMessage::Ratchet(message) => {
                let (record_i, plaintext) = SessionCipher::<KeyManager>::decrypt_ratchet(
                    &record,
                    message,
                    &self.rng,
                    &self.config,
                )?;
                (record_i, plaintext, None)
            }
            WireMessage::PreKey(message) => {
                let keys = self.keys()?;
                let (record_i, keys_i, plaintext) = SessionCipher::<KeyManager>::decrypt_prekey(
                    &record,
                    keys.clone(),
                    message,
                    &self.rng,
                    &self.config,
                )?;
                (record_i, plaintext, Some((keys, keys_i)))
            }
            WireMessage::FriendRequest(message) => {
                let (record_i, plaintext) = SessionCipher::<KeyManager>::decrypt_friend_request(
                    &record,
                    &self.identity_secret,
                    message,
                    &self.rng,
                    &self.config,
                )?;
                (record_i, plaintext, None)
            }
        };

        let adopted = self.handle_session_reset(&address.id, record.current_state(), &mut record_i);
        self.store(address, record_i)?;

        // Consumed one-time pre-keys are only removed after the session was persisted.
        if let Some((mut keys, keys_i)) = keys_update {
            *keys = keys_i;
        }

        Ok(DecryptOutcome { plaintext, adopted })
    }

    /// Archives the current session state. The next outgoing message requires a new session.
    pub fn reset_session(&self, address: &SessionAddress<ID>) -> ManagerResult<(), S::Error> {
        let lock = self.session_lock(address)?;
        let _guard = lock.lock().map_err(|_| SessionManagerError::LockPoisoned)?;

        if let Some(mut record) = self.load(address)? {
            if record.archive_current_state(self.config.max_archived_states) {
                debug!(id = ?address.id, device_id = address.device_id, "archived session");
                self.store(address, record)?;
            }
        }

        Ok(())
    }

    /// Removes the session record including all archived states.
    pub fn delete_session(&self, address: &SessionAddress<ID>) -> ManagerResult<(), S::Error> {
        let lock = self.session_lock(address)?;
        let _guard = lock.lock().map_err(|_| SessionManagerError::LockPoisoned)?;
        self.store
            .delete_session(address)
            .map_err(SessionManagerError::Store)
    }

    pub fn has_session(&self, address: &SessionAddress<ID>) -> ManagerResult<bool, S::Error> {
        Ok(self
            .load(address)?
            .is_some_and(|record| record.has_current_state()))
    }

    /// Version of the stored session record, increased with every change.
    pub fn session_version(
        &self,
        address: &SessionAddress<ID>,
    ) -> ManagerResult<Option<u64>, S::Error> {
        Ok(self.load(address)?.map(|record| record.version()))
    }
}

impl<ID, S, R> SessionManager<ID, S, R>
where
    ID: IdentityHandle + Serialize + for<'a> Deserialize<'a>,
    S: SessionStore<ID>,
    R: SessionResetHandler<ID>,
{
    fn session_lock(
        &self,
        address: &SessionAddress<ID>,
    ) -> ManagerResult<Arc<Mutex<()>>, S::Error> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| SessionManagerError::LockPoisoned)?;
        Ok(locks.entry(address.clone()).or_default().clone())
    }

    fn keys(&self) -> ManagerResult<MutexGuard<'_, KeyManagerState>, S::Error> {
        self.keys
            .lock()
            .map_err(|_| SessionManagerError::LockPoisoned)
    }

    fn registry(&self) -> ManagerResult<MutexGuard<'_, KeyRegistryState<ID>>, S::Error> {
        self.registry
            .lock()
            .map_err(|_| SessionManagerError::LockPoisoned)
    }

    fn load(
        &self,
        address: &SessionAddress<ID>,
    ) -> ManagerResult<Option<SessionRecord>, S::Error> {
        self.store
            .load_session(address)
            .map_err(SessionManagerError::Store)
    }

    fn store(
        &self,
        address: &SessionAddress<ID>,
        mut record: SessionRecord,
    ) -> ManagerResult<(), S::Error> {
        record.bump_version();
        self.store
            .store_session(address, &record)
            .map_err(SessionManagerError::Store)
    }

    /// Rejects session-establishing messages signed by another identity than the one we know,
    /// either from a pre-key bundle or from an earlier session with this address.
    fn verify_identity(
        &self,
        id: &ID,
        identity_key: &PublicKey,
        record: &SessionRecord,
    ) -> ManagerResult<(), S::Error> {
        if let Some(known) = record.remote_identity_key() {
            if known != identity_key {
                warn!(
                    identity_key = %identity_key,
                    "session-establishing message from another identity than the session's"
                );
                return Err(SessionManagerError::UntrustedIdentity(*identity_key));
            }
        }

        let registry = self.registry()?;
        match KeyRegistry::identity_key(&*registry, id).unwrap_or_else(|err| match err {}) {
            Some(known) if &known != identity_key => {
                Err(SessionManagerError::UntrustedIdentity(*identity_key))
            }
            _ => Ok(()),
        }
    }

    /// Applies the rules of an ongoing session reset after a message got decrypted.
    ///
    /// Returns `true` if the reset completed and both parties use the same session again.
    fn handle_session_reset(
        &self,
        id: &ID,
        previous: Option<&RatchetState>,
        record: &mut SessionRecord,
    ) -> bool {
        // Nothing to reset if we didn't have a session before.
        let Some(previous) = previous else {
            return false;
        };

        let status = self.reset_handler.reset_status(id);
        if status == SessionResetStatus::None {
            return false;
        }

        let current_base_key = record.current_state().map(|state| state.base_key());
        let adopted = if current_base_key != Some(previous.base_key()) {
            match status {
                SessionResetStatus::RequestReceived => {
                    // The other party used an old session, wait for them to use the new one.
                    record.promote_matching_state(
                        previous.base_key(),
                        self.config.max_archived_states,
                    );
                    record.set_current_state(previous.clone());
                    false
                }
                _ => {
                    // We asked for the reset and the other party answered with another session.
                    record.remove_previous_states();
                    true
                }
            }
        } else if status == SessionResetStatus::RequestReceived {
            // The other party continued with the session we expected.
            record.remove_previous_states();
            true
        } else {
            false
        };

        if adopted {
            debug!(?id, "session adopted");
        }

        adopted
    }
}

#[derive(Debug, Error)]
pub enum SessionManagerError<E>
where
    E: Error + 'static,
{
    #[error("session store failed: {0}")]
    Store(#[source] E),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Builder(#[from] BuilderError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    KeyManager(#[from] KeyManagerError),

    #[error(transparent)]
    KeyRegistry(#[from] KeyRegistryError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no pre-key bundle available to establish session")]
    NoPreKeyBundle,

    #[error("identity key {0} differs from the known identity")]
    UntrustedIdentity(PublicKey),

    #[error("new session was rejected: {0}")]
    NewSessionRejected(#[source] Box<dyn Error + Send + Sync>),

    #[error("lock is poisoned")]
    LockPoisoned,
}
