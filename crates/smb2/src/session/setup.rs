//! The session-setup driver.

use std::sync::Arc;

use smb2_msg::{
    status, Command, PacketCodec, SessionSetupRequest, SessionSetupResponseDecoder,
};

use crate::auth::{spnego, Authenticator};
use crate::connection::{accept_error, Connection, SendOptions};
use crate::crypto;
use crate::session::{Session, SessionInfo};
use crate::Error;

/// Drives the SPNEGO token exchange over SESSION_SETUP legs until the
/// server reports success.
///
/// Requests are never signed here; the final leg installs the session keys
/// and registers the session under the send lock, before its bytes reach
/// the wire, so even an immediately signed response can be verified.
pub(crate) async fn session_setup(
    conn: &Arc<Connection>,
    authenticator: &mut dyn Authenticator,
) -> crate::Result<Session> {
    let info = conn
        .info()
        .ok_or_else(|| Error::Internal("connection is not negotiated".to_string()))?;
    let security_mode: u8 = if info.require_signing { 0x02 } else { 0x01 };
    let capabilities: u32 = u32::from(info.capabilities.dfs());

    let mut server_token: Option<Vec<u8>> = None;
    let mut session: Option<Arc<SessionInfo>> = None;
    let mut session_id: u64 = 0;
    let mut first_leg = true;

    loop {
        let token = authenticator.next_token(server_token.as_deref())?;
        let blob = if first_leg {
            spnego::encode_neg_token_init(&[authenticator.oid()], &token)
        } else {
            spnego::encode_neg_token_resp(None, &token, None)
        };
        first_leg = false;

        let mut req = SessionSetupRequest::new(security_mode, blob);
        req.capabilities = capabilities;
        req.header.session_id = session_id;
        let (charge, _) = conn.request_credit_charge(0).await;
        req.header.credit_charge = charge;

        // once the mechanism is done this leg finalizes the session, so the
        // server's answer can be verified against the registered keys
        let finalize = authenticator.is_complete() && session_id != 0;
        if finalize && session.is_none() {
            let key = crypto::normalize_session_key(&authenticator.session_key()?);
            session = Some(Arc::new(SessionInfo::new(session_id, key)));
        }

        let rr = conn
            .send_inner(
                &mut req,
                SendOptions {
                    session: session.as_ref().filter(|_| finalize),
                    tree: None,
                    finalize_session: finalize,
                },
            )
            .await?;
        let pkt = match conn.recv(rr).await {
            Ok(pkt) => pkt,
            Err(err) => {
                remove_registered(conn, &session);
                return Err(err);
            }
        };

        let p = PacketCodec::new(&pkt);
        if p.command() != Command::SessionSetup as u16 {
            remove_registered(conn, &session);
            return Err(Error::InvalidResponse(format!(
                "expected command {}, got {:#x}",
                Command::SessionSetup,
                p.command()
            )));
        }
        match p.status() {
            status::MORE_PROCESSING_REQUIRED => {
                // continuation responses are part of the preauth hash
                conn.preauth_update(&pkt);
                session_id = p.session_id();
                if authenticator.is_complete() {
                    remove_registered(conn, &session);
                    return Err(Error::InvalidResponse(
                        "server demanded another authentication leg".to_string(),
                    ));
                }
                let r = SessionSetupResponseDecoder::new(p.data());
                if r.is_invalid() {
                    return Err(Error::InvalidResponse(
                        "broken session setup response format".to_string(),
                    ));
                }
                let resp = spnego::decode_neg_token_resp(r.security_buffer())?;
                server_token = resp.response_token;
            }
            status::SUCCESS => {
                let r = SessionSetupResponseDecoder::new(p.data());
                if r.is_invalid() {
                    remove_registered(conn, &session);
                    return Err(Error::InvalidResponse(
                        "broken session setup response format".to_string(),
                    ));
                }
                let session = match session {
                    Some(session) => session,
                    None => {
                        // single-leg exchange: the session id only arrived now
                        let key =
                            crypto::normalize_session_key(&authenticator.session_key()?);
                        let session = Arc::new(SessionInfo::new(p.session_id(), key));
                        conn.finalize_session(&session)?;
                        session
                    }
                };
                session.set_flags(r.session_flags());
                log::info!(
                    "session {:#x} established{}",
                    session.session_id(),
                    if session.flags().encrypt_data() {
                        ", encrypting all traffic"
                    } else {
                        ""
                    }
                );
                return Ok(Session::new(conn.clone(), session));
            }
            _ => {
                remove_registered(conn, &session);
                return Err(accept_error(p));
            }
        }
    }
}

/// Unregisters a session that was installed for a final leg the server then
/// rejected.
fn remove_registered(conn: &Connection, session: &Option<Arc<SessionInfo>>) {
    if let Some(session) = session {
        conn.remove_session(session.session_id());
    }
}
