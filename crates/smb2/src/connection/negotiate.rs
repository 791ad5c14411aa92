//! Dialect negotiation.

use std::sync::Arc;

use rand::rngs::OsRng;
use rand::RngCore;

use smb2_msg::{
    CipherContextDataDecoder, Command, Dialect, EncryptionCapabilities, EncryptionCipher,
    GlobalCapabilities, HashAlgorithm, HashContextDataDecoder, NegotiateContextDecoder,
    NegotiateRequest, NegotiateResponseDecoder, NegotiateSecurityMode,
    PreauthIntegrityCapabilities, ENCRYPTION_CAPABILITIES, PREAUTH_INTEGRITY_CAPABILITIES,
    SMB2_WILDCARD_DIALECT,
};
use smb2_transport::{FrameRead, FrameWrite, TcpTransport};

use crate::connection::{Connection, ConnectionInfo, CreditAccount};
use crate::Error;

/// Capability mask offered in every NEGOTIATE request.
fn client_capabilities() -> GlobalCapabilities {
    GlobalCapabilities::new()
        .with_dfs(true)
        .with_leasing(true)
        .with_large_mtu(true)
        .with_encryption(true)
}

fn client_ciphers() -> Vec<EncryptionCipher> {
    vec![EncryptionCipher::Aes128Gcm, EncryptionCipher::Aes128Ccm]
}

fn intersect(a: GlobalCapabilities, b: GlobalCapabilities) -> GlobalCapabilities {
    let bits = u32::from_le_bytes(a.into_bytes()) & u32::from_le_bytes(b.into_bytes());
    GlobalCapabilities::from_bytes(bits.to_le_bytes())
}

/// Options for establishing a connection.
#[derive(Debug, Clone)]
pub struct Negotiator {
    /// Enforce signing even when the server would allow unsigned traffic.
    pub require_message_signing: bool,
    /// Client GUID; a zero GUID is replaced with a CSPRNG one.
    pub client_guid: [u8; 16],
    /// Pin negotiation to a single dialect instead of offering the full
    /// client list.
    pub specified_dialect: Option<Dialect>,
    /// Target credit window to climb toward.
    pub max_credit_balance: u16,
}

impl Default for Negotiator {
    fn default() -> Negotiator {
        Negotiator {
            require_message_signing: false,
            client_guid: [0; 16],
            specified_dialect: None,
            max_credit_balance: 128,
        }
    }
}

impl Negotiator {
    /// Connects over TCP and negotiates.
    pub async fn connect(
        &self,
        addr: impl tokio::net::ToSocketAddrs,
    ) -> crate::Result<Arc<Connection>> {
        let (reader, writer) = TcpTransport::connect(addr)
            .await
            .map_err(Error::Transport)?;
        self.negotiate(Box::new(reader), Box::new(writer)).await
    }

    /// Negotiates over the given transport halves and returns the
    /// established connection, its receiver task running. A failed
    /// handshake tears the connection down.
    pub async fn negotiate(
        &self,
        reader: Box<dyn FrameRead>,
        writer: Box<dyn FrameWrite>,
    ) -> crate::Result<Arc<Connection>> {
        let conn = Connection::new(writer, CreditAccount::new(self.max_credit_balance));
        conn.spawn_receiver(reader);
        match self.run(&conn).await {
            Ok(()) => Ok(conn),
            Err(err) => {
                conn.close().await;
                Err(err)
            }
        }
    }

    fn make_request(&self, specified: Option<Dialect>) -> crate::Result<NegotiateRequest> {
        let security_mode = if self.require_message_signing {
            NegotiateSecurityMode::new().with_signing_required(true)
        } else {
            NegotiateSecurityMode::new().with_signing_enabled(true)
        };
        let dialects = match specified {
            Some(dialect) => vec![dialect],
            None => Dialect::ALL.to_vec(),
        };

        let client_guid = self.resolve_client_guid()?;
        let mut req = NegotiateRequest::new(
            security_mode,
            client_capabilities(),
            client_guid,
            dialects,
        );
        if req.dialects.contains(&Dialect::Smb0311) {
            let mut salt = [0u8; 32];
            OsRng
                .try_fill_bytes(&mut salt)
                .map_err(|e| Error::Internal(format!("salt generation failed: {e}")))?;
            req.preauth_integrity = Some(PreauthIntegrityCapabilities {
                hash_algorithms: vec![HashAlgorithm::Sha512],
                salt: salt.to_vec(),
            });
            req.encryption = Some(EncryptionCapabilities {
                ciphers: client_ciphers(),
            });
        }
        req.header.credit_charge = 1;
        Ok(req)
    }

    fn resolve_client_guid(&self) -> crate::Result<[u8; 16]> {
        if self.client_guid != [0; 16] {
            return Ok(self.client_guid);
        }
        let mut guid = [0u8; 16];
        OsRng
            .try_fill_bytes(&mut guid)
            .map_err(|e| Error::Internal(format!("client guid generation failed: {e}")))?;
        Ok(guid)
    }

    async fn run(&self, conn: &Arc<Connection>) -> crate::Result<()> {
        let mut specified = self.specified_dialect;
        let mut retried = false;

        loop {
            let mut req = self.make_request(specified)?;
            let (charge, _) = conn.account().request(1).await;
            req.header.credit_charge = charge;
            let client_guid = req.client_guid;

            let body = conn.send_recv(Command::Negotiate, &mut req).await?;
            let r = NegotiateResponseDecoder::new(&body);
            if r.is_invalid() {
                return Err(Error::InvalidResponse(
                    "broken negotiate response format".to_string(),
                ));
            }

            // "SMB 2.???": the server wants a second, versioned negotiate
            if r.dialect_revision() == SMB2_WILDCARD_DIALECT {
                if retried || specified.is_some() {
                    return Err(Error::InvalidResponse(
                        "unexpected dialect returned".to_string(),
                    ));
                }
                retried = true;
                specified = Some(Dialect::Smb0210);
                log::debug!("server answered with the wildcard dialect, renegotiating as 2.1.0");
                continue;
            }

            if let Some(dialect) = specified {
                if dialect as u16 != r.dialect_revision() {
                    return Err(Error::InvalidResponse(
                        "unexpected dialect returned".to_string(),
                    ));
                }
            }
            let dialect = Dialect::try_from(r.dialect_revision()).map_err(|_| {
                Error::InvalidResponse("unsupported dialect returned".to_string())
            })?;

            let mut info = ConnectionInfo {
                dialect,
                require_signing: self.require_message_signing
                    || r.security_mode().signing_required(),
                capabilities: intersect(client_capabilities(), r.capabilities()),
                max_transact_size: r.max_transact_size(),
                max_read_size: r.max_read_size(),
                max_write_size: r.max_write_size(),
                server_guid: r.server_guid(),
                client_guid,
                preauth_hash_id: None,
                cipher_id: None,
            };

            let mut preauth_salt = None;
            let mut list = r.negotiate_context_list();
            for _ in 0..r.negotiate_context_count() {
                let ctx = NegotiateContextDecoder::new(list);
                if ctx.is_invalid() {
                    return Err(Error::InvalidResponse(
                        "broken negotiate context format".to_string(),
                    ));
                }
                match ctx.context_type() {
                    PREAUTH_INTEGRITY_CAPABILITIES => {
                        let d = HashContextDataDecoder::new(ctx.data());
                        if d.is_invalid() {
                            return Err(Error::InvalidResponse(
                                "broken hash context data format".to_string(),
                            ));
                        }
                        if d.hash_algorithm_count() != 1 {
                            return Err(Error::InvalidResponse(
                                "multiple hash algorithms".to_string(),
                            ));
                        }
                        let id = HashAlgorithm::try_from(d.hash_algorithm(0)).map_err(|_| {
                            Error::InvalidResponse("unknown hash algorithm".to_string())
                        })?;
                        info.preauth_hash_id = Some(id);
                        preauth_salt = Some(d.salt().to_vec());
                    }
                    ENCRYPTION_CAPABILITIES => {
                        let d = CipherContextDataDecoder::new(ctx.data());
                        if d.is_invalid() {
                            return Err(Error::InvalidResponse(
                                "broken cipher context data format".to_string(),
                            ));
                        }
                        if d.cipher_count() != 1 {
                            return Err(Error::InvalidResponse(
                                "multiple cipher algorithms".to_string(),
                            ));
                        }
                        let cipher =
                            EncryptionCipher::try_from(d.cipher(0)).map_err(|_| {
                                Error::InvalidResponse("unknown cipher algorithm".to_string())
                            })?;
                        info.cipher_id = Some(cipher);
                    }
                    // unknown context types are skipped
                    _ => {}
                }
                let off = ctx.next();
                list = if list.len() < off { &[] } else { &list[off..] };
            }

            if dialect == Dialect::Smb0311
                && (info.preauth_hash_id.is_none() || info.cipher_id.is_none())
            {
                return Err(Error::InvalidResponse(
                    "missing negotiate context".to_string(),
                ));
            }

            return conn.establish(info, preauth_salt).await;
        }
    }
}
