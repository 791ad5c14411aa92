//! Session state, signing/sealing application, and the session handle.

mod encryptor_decryptor;
pub(crate) mod setup;
mod signer;

pub use encryptor_decryptor::{MessageDecryptor, MessageEncryptor};
pub use signer::MessageSigner;

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, OnceLock};

use smb2_msg::{Command, EchoRequest, LogoffRequest, Request, SessionFlags};

use crate::connection::{accept, Connection, ConnectionInfo};
use crate::crypto::{self, KeyToDerive};
use crate::tree::Tree;
use crate::Error;

/// Shared state of one session: identity, key material, installed crypto
/// and flags.
///
/// Held by the connection's session table (for receive-side verification
/// and decryption) and by the caller's [`Session`] handle; the two sides
/// share it by id lookup, never by ownership cycles.
#[derive(Debug)]
pub struct SessionInfo {
    session_id: u64,
    key_material: KeyToDerive,
    crypto: OnceLock<SessionCrypto>,
    flags: AtomicU16,
}

#[derive(Debug)]
struct SessionCrypto {
    signer: MessageSigner,
    application_key: KeyToDerive,
    encryptor: Option<MessageEncryptor>,
    decryptor: Option<MessageDecryptor>,
    preauth_snapshot: Option<Vec<u8>>,
}

impl SessionInfo {
    pub(crate) fn new(session_id: u64, key_material: KeyToDerive) -> SessionInfo {
        SessionInfo {
            session_id,
            key_material,
            crypto: OnceLock::new(),
            flags: AtomicU16::new(0),
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn flags(&self) -> SessionFlags {
        SessionFlags::from_bytes(self.flags.load(Ordering::Relaxed).to_le_bytes())
    }

    pub(crate) fn set_flags(&self, flags: SessionFlags) {
        self.flags
            .store(u16::from_le_bytes(flags.into_bytes()), Ordering::Relaxed);
    }

    /// Runs the key schedule and installs signer and sealing state. Called
    /// once, at session establishment.
    pub(crate) fn install_crypto(
        &self,
        info: &ConnectionInfo,
        preauth_snapshot: Option<Vec<u8>>,
    ) -> crate::Result<()> {
        let keys = crypto::derive_session_keys(
            info.dialect,
            &self.key_material,
            preauth_snapshot.as_deref(),
        )?;
        let signer = MessageSigner::new(crypto::make_signing_algo(info.dialect, &keys.signing)?);
        let (encryptor, decryptor) = match (keys.client_cipher, keys.server_cipher) {
            (Some(client_key), Some(server_key)) => {
                let cipher = info.cipher();
                (
                    Some(MessageEncryptor::new(crypto::make_encrypting_algo(
                        cipher,
                        &client_key,
                    )?)),
                    Some(MessageDecryptor::new(crypto::make_encrypting_algo(
                        cipher,
                        &server_key,
                    )?)),
                )
            }
            _ => (None, None),
        };
        self.crypto
            .set(SessionCrypto {
                signer,
                application_key: keys.application,
                encryptor,
                decryptor,
                preauth_snapshot,
            })
            .map_err(|_| Error::Internal("session keys already installed".to_string()))
    }

    fn crypto(&self) -> crate::Result<&SessionCrypto> {
        self.crypto
            .get()
            .ok_or_else(|| Error::InvalidResponse("session is not established".to_string()))
    }

    /// Key for application-layer signing (e.g. RPC over named pipes).
    pub fn application_key(&self) -> crate::Result<&KeyToDerive> {
        Ok(&self.crypto()?.application_key)
    }

    /// The preauth-integrity hash snapshot the session keys were bound to.
    pub fn preauth_snapshot(&self) -> Option<&[u8]> {
        self.crypto
            .get()
            .and_then(|c| c.preauth_snapshot.as_deref())
    }

    pub(crate) fn sign(&self, pkt: &mut [u8]) -> crate::Result<()> {
        self.crypto()?.signer.sign_message(pkt)
    }

    pub(crate) fn verify(&self, pkt: &mut [u8]) -> crate::Result<()> {
        self.crypto()?.signer.verify_signature(pkt)
    }

    pub(crate) fn encrypt(&self, pkt: Vec<u8>) -> crate::Result<Vec<u8>> {
        let crypto = self.crypto()?;
        let encryptor = crypto.encryptor.as_ref().ok_or_else(|| {
            Error::Internal("encryption is not available for this dialect".to_string())
        })?;
        encryptor.encrypt_message(pkt, self.session_id)
    }

    pub(crate) fn decrypt(&self, pkt: &[u8]) -> crate::Result<Vec<u8>> {
        let crypto = self.crypto()?;
        let decryptor = crypto.decryptor.as_ref().ok_or_else(|| {
            Error::InvalidResponse("encrypted message on a plain session".to_string())
        })?;
        decryptor.decrypt_message(pkt)
    }
}

/// A caller's handle to an established session.
pub struct Session {
    conn: Arc<Connection>,
    info: Arc<SessionInfo>,
}

impl Session {
    pub(crate) fn new(conn: Arc<Connection>, info: Arc<SessionInfo>) -> Session {
        Session { conn, info }
    }

    pub fn session_id(&self) -> u64 {
        self.info.session_id()
    }

    /// The shared session state, for use with
    /// [`Connection::send_with`][crate::Connection::send_with].
    pub fn session_info(&self) -> &Arc<SessionInfo> {
        &self.info
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// Sends a request on this session and returns the successful response
    /// body.
    pub async fn send_recv(
        &self,
        cmd: Command,
        req: &mut dyn Request,
    ) -> crate::Result<Vec<u8>> {
        let rr = self.conn.send_with(req, Some(&self.info), None).await?;
        let pkt = self.conn.recv(rr).await?;
        Ok(accept(cmd, &pkt)?.to_vec())
    }

    /// Probes connection liveness.
    pub async fn echo(&self) -> crate::Result<()> {
        let (charge, _) = self.conn.request_credit_charge(0).await;
        let mut req = EchoRequest::default();
        req.header.credit_charge = charge;
        self.send_recv(Command::Echo, &mut req).await?;
        Ok(())
    }

    /// Connects to a share, e.g. `\\server\files`.
    pub async fn tree_connect(&self, path: &str) -> crate::Result<Tree> {
        Tree::connect(self.conn.clone(), self.info.clone(), path).await
    }

    /// Logs off and releases the session. Trees connected through it become
    /// unusable.
    pub async fn logoff(&self) -> crate::Result<()> {
        let (charge, _) = self.conn.request_credit_charge(0).await;
        let mut req = LogoffRequest::default();
        req.header.credit_charge = charge;
        self.send_recv(Command::Logoff, &mut req).await?;
        self.conn.remove_session(self.info.session_id());
        log::info!("session {:#x} logged off", self.info.session_id());
        Ok(())
    }
}
