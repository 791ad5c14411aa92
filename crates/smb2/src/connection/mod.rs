//! The connection core: concurrent request/response multiplexing over one
//! framed transport.
//!
//! Callers send through [`Connection::send_with`] and await their
//! [`PendingResponse`]; a single receiver task per connection decrypts,
//! verifies, credits, splits compound responses, and routes each reply to
//! the pending slot registered under its MessageId. Two locks keep the
//! paths independent: the send mutex serializes MessageId assignment with
//! the transport write, while the outstanding table has its own mutex so
//! the receiver never contends with senders on the wire-write critical
//! section.

mod connection_info;
pub mod credit;
mod negotiate;
pub mod preauth_hash;

pub use connection_info::ConnectionInfo;
pub use credit::CreditAccount;
pub use negotiate::Negotiator;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, Weak};

use tokio::sync::{broadcast, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use smb2_msg::{
    Command, ErrorContextResponseDecoder, ErrorResponseDecoder, PacketCodec, Request,
    TransformCodec, TransformHeader, status,
};
use smb2_transport::{FrameRead, FrameWrite, TransportError};

use crate::auth::Authenticator;
use crate::connection::preauth_hash::PreauthHashState;
use crate::error::ResponseError;
use crate::session::{self, Session, SessionInfo};
use crate::tree::Tree;
use crate::Error;

/// MessageId carried by unsolicited oplock/lease break notifications.
pub const BROADCAST_MESSAGE_ID: u64 = u64::MAX;

/// A caller's handle to one in-flight request.
///
/// Await it through [`Connection::recv`]. Cancel frames carry no slot, as
/// servers do not answer them.
#[derive(Debug)]
pub struct PendingResponse {
    message_id: u64,
    rx: Option<oneshot::Receiver<crate::Result<Vec<u8>>>>,
}

impl PendingResponse {
    /// The MessageId assigned to the request; a CANCEL frame targeting this
    /// request must borrow it.
    pub fn message_id(&self) -> u64 {
        self.message_id
    }
}

#[derive(Debug)]
struct PendingSlot {
    credit_request: u16,
    tx: oneshot::Sender<crate::Result<Vec<u8>>>,
}

#[derive(Debug)]
enum ConnectionState {
    Negotiating,
    Established,
    Draining(Error),
}

#[derive(Debug)]
struct Outstanding {
    state: ConnectionState,
    requests: HashMap<u64, PendingSlot>,
}

struct SendState {
    writer: Box<dyn FrameWrite>,
    sequence_window: u64,
}

pub(crate) struct SendOptions<'a> {
    pub(crate) session: Option<&'a Arc<SessionInfo>>,
    pub(crate) tree: Option<&'a Tree>,
    /// Derive keys and register `session` before the bytes hit the wire.
    pub(crate) finalize_session: bool,
}

impl<'a> Default for SendOptions<'a> {
    fn default() -> SendOptions<'a> {
        SendOptions {
            session: None,
            tree: None,
            finalize_session: false,
        }
    }
}

/// An established (or establishing) SMB2 connection.
pub struct Connection {
    /// Self-reference handed to the receiver task and session handles.
    me: Weak<Connection>,
    /// Send serialization: MessageId assignment is atomic with the wire
    /// write. Held only across the outbound critical section.
    send: AsyncMutex<SendState>,
    /// Pending-requests table, shared between senders and the receiver.
    outstanding: Mutex<Outstanding>,
    /// SessionId to session-state table.
    sessions: Mutex<HashMap<u64, Arc<SessionInfo>>>,
    account: CreditAccount,
    info: OnceLock<ConnectionInfo>,
    /// Rolling preauth-integrity hash; present on 3.1.1 connections.
    preauth: Mutex<Option<PreauthHashState>>,
    /// Unsolicited break notifications fan out here.
    notifications: broadcast::Sender<Vec<u8>>,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

impl Connection {
    pub(crate) fn new(writer: Box<dyn FrameWrite>, account: CreditAccount) -> Arc<Connection> {
        let (notifications, _) = broadcast::channel(32);
        Arc::new_cyclic(|me| Connection {
            me: me.clone(),
            send: AsyncMutex::new(SendState {
                writer,
                sequence_window: 0,
            }),
            outstanding: Mutex::new(Outstanding {
                state: ConnectionState::Negotiating,
                requests: HashMap::new(),
            }),
            sessions: Mutex::new(HashMap::new()),
            account,
            info: OnceLock::new(),
            preauth: Mutex::new(None),
            notifications,
            receiver: Mutex::new(None),
        })
    }

    fn shared(&self) -> Arc<Connection> {
        self.me.upgrade().expect("connection is alive while borrowed")
    }

    pub(crate) fn spawn_receiver(&self, reader: Box<dyn FrameRead>) {
        let handle = tokio::spawn(self.shared().run_receiver(reader));
        *self.receiver.lock().unwrap() = Some(handle);
    }

    /// The negotiated parameters, once the handshake settled them.
    pub fn info(&self) -> Option<&ConnectionInfo> {
        self.info.get()
    }

    pub(crate) fn account(&self) -> &CreditAccount {
        &self.account
    }

    /// Establishes a session by running the authenticator's token exchange
    /// through SESSION_SETUP.
    pub async fn authenticate(
        &self,
        authenticator: &mut dyn Authenticator,
    ) -> crate::Result<Session> {
        session::setup::session_setup(&self.shared(), authenticator).await
    }

    /// Subscribes to unsolicited break notifications
    /// (`MessageId == BROADCAST_MESSAGE_ID` frames).
    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Vec<u8>> {
        self.notifications.subscribe()
    }

    /// Computes and reserves the credit charge for a payload of
    /// `payload_size` bytes, suspending while the window is exhausted.
    ///
    /// Returns the charge and the payload size actually covered. On a
    /// partial grant the payload is capped at 64 KiB per granted credit and
    /// the caller re-chunks. Without the large-MTU capability the charge is
    /// always one credit.
    pub async fn request_credit_charge(&self, payload_size: usize) -> (u16, usize) {
        let wanted = if self
            .info
            .get()
            .map(|i| i.capabilities.large_mtu())
            .unwrap_or(false)
        {
            credit::credit_charge(payload_size)
        } else {
            1
        };
        let (granted, complete) = self.account.request(wanted).await;
        if complete {
            (granted, payload_size)
        } else {
            (granted, credit::CREDIT_UNIT * granted as usize)
        }
    }

    /// Sends a request outside any session.
    pub async fn send(&self, req: &mut dyn Request) -> crate::Result<PendingResponse> {
        self.send_inner(req, SendOptions::default()).await
    }

    /// Sends a request, stamping and protecting it with the given session
    /// and tree.
    ///
    /// The request's credit charge must have been reserved through
    /// [`Connection::request_credit_charge`] first.
    pub async fn send_with(
        &self,
        req: &mut dyn Request,
        session: Option<&Arc<SessionInfo>>,
        tree: Option<&Tree>,
    ) -> crate::Result<PendingResponse> {
        self.send_inner(
            req,
            SendOptions {
                session,
                tree,
                finalize_session: false,
            },
        )
        .await
    }

    pub(crate) async fn send_inner(
        &self,
        req: &mut dyn Request,
        opts: SendOptions<'_>,
    ) -> crate::Result<PendingResponse> {
        self.check_open()?;

        let mut send = self.send.lock().await;

        let is_cancel = req.header().command == Command::Cancel;
        let message_id;
        if is_cancel {
            // cancels borrow the target's MessageId and reserve nothing
            message_id = req.header().message_id;
        } else {
            let credit_charge = req.header().credit_charge;
            message_id = send.sequence_window;
            send.sequence_window += credit_charge as u64;
            if req.header().credit_request == 0 {
                req.header_mut().credit_request = credit_charge;
            }
            let extra = self.account.opening();
            let hdr = req.header_mut();
            hdr.credit_request = hdr.credit_request.saturating_add(extra);
            hdr.message_id = message_id;
        }

        if let Some(session) = opts.session {
            req.header_mut().session_id = session.session_id();
            if let Some(tree) = opts.tree {
                req.header_mut().tree_id = tree.tree_id();
            }
        }

        let mut pkt = vec![0u8; req.size()];
        req.encode(&mut pkt);

        // session-setup traffic feeds the rolling preauth hash in send order
        if req.header().command == Command::SessionSetup {
            self.preauth_update(&pkt);
        }

        // a finalizing leg derives keys and registers the session before the
        // bytes hit the wire, so a signed response cannot outrun the table
        if opts.finalize_session {
            if let Some(session) = opts.session {
                self.finalize_session(session)?;
            }
        }

        if let Some(session) = opts.session {
            // session-setup requests are sent unsigned
            if req.header().command != Command::SessionSetup {
                session.sign(&mut pkt)?;
                let encrypt = session.flags().encrypt_data()
                    || opts
                        .tree
                        .map(|t| t.share_flags().encrypt_data())
                        .unwrap_or(false);
                if encrypt {
                    pkt = session.encrypt(pkt)?;
                }
            }
        }

        let credit_request = req.header().credit_request;
        let rx = if is_cancel {
            None
        } else {
            let (tx, rx) = oneshot::channel();
            let mut outstanding = self.outstanding.lock().unwrap();
            if let ConnectionState::Draining(err) = &outstanding.state {
                return Err(err.clone());
            }
            outstanding.requests.insert(
                message_id,
                PendingSlot { credit_request, tx },
            );
            Some(rx)
        };

        if let Err(e) = send.writer.write(&pkt).await {
            if !is_cancel {
                self.outstanding.lock().unwrap().requests.remove(&message_id);
            }
            return Err(Error::Transport(e));
        }

        Ok(PendingResponse { message_id, rx })
    }

    /// Awaits the response bytes for an in-flight request.
    pub async fn recv(&self, rr: PendingResponse) -> crate::Result<Vec<u8>> {
        let Some(rx) = rr.rx else {
            return Err(Error::Internal(
                "cancel requests receive no response".to_string(),
            ));
        };
        match rx.await {
            Ok(result) => result,
            // the slot's sender vanished without a drain (hard teardown)
            Err(_) => Err(self.terminal_error()),
        }
    }

    /// Send + receive + [`accept`]: returns the response body of a
    /// successful reply to `cmd`.
    pub async fn send_recv(
        &self,
        cmd: Command,
        req: &mut dyn Request,
    ) -> crate::Result<Vec<u8>> {
        let rr = self.send(req).await?;
        let pkt = self.recv(rr).await?;
        Ok(accept(cmd, &pkt)?.to_vec())
    }

    /// Tears the connection down: drains every pending request, stops the
    /// receiver, and shuts the transport down.
    pub async fn close(&self) {
        self.drain(Error::Transport(TransportError::Closed));
        if let Some(handle) = self.receiver.lock().unwrap().take() {
            handle.abort();
        }
        let mut send = self.send.lock().await;
        let _ = send.writer.shutdown().await;
        log::info!("connection closed");
    }

    fn check_open(&self) -> crate::Result<()> {
        match &self.outstanding.lock().unwrap().state {
            ConnectionState::Draining(err) => Err(err.clone()),
            _ => Ok(()),
        }
    }

    fn terminal_error(&self) -> Error {
        match &self.outstanding.lock().unwrap().state {
            ConnectionState::Draining(err) => err.clone(),
            _ => Error::Transport(TransportError::Closed),
        }
    }

    fn require_signing(&self) -> bool {
        self.info.get().map(|i| i.require_signing).unwrap_or(false)
    }

    pub(crate) fn lookup_session(&self, session_id: u64) -> Option<Arc<SessionInfo>> {
        self.sessions.lock().unwrap().get(&session_id).cloned()
    }

    pub(crate) fn remove_session(&self, session_id: u64) {
        self.sessions.lock().unwrap().remove(&session_id);
    }

    /// Folds one session-setup message into the rolling preauth hash.
    pub(crate) fn preauth_update(&self, message: &[u8]) {
        let mut preauth = self.preauth.lock().unwrap();
        if let Some(state) = preauth.as_mut() {
            state.update(message);
        }
    }

    /// Derives the session keys from the current preauth snapshot and
    /// registers the session for receive-side verification and decryption.
    pub(crate) fn finalize_session(&self, session: &Arc<SessionInfo>) -> crate::Result<()> {
        let info = self
            .info
            .get()
            .ok_or_else(|| Error::Internal("connection is not negotiated".to_string()))?;
        let snapshot = self
            .preauth
            .lock()
            .unwrap()
            .as_ref()
            .map(|state| state.snapshot());
        session.install_crypto(info, snapshot)?;
        self.sessions
            .lock()
            .unwrap()
            .insert(session.session_id(), session.clone());
        Ok(())
    }

    /// Records the negotiated parameters and moves the connection to its
    /// established state. The sequence window restarts at one, as the
    /// negotiate exchange consumed MessageId zero.
    pub(crate) async fn establish(
        &self,
        info: ConnectionInfo,
        preauth_salt: Option<Vec<u8>>,
    ) -> crate::Result<()> {
        if let Some(salt) = preauth_salt {
            *self.preauth.lock().unwrap() = Some(PreauthHashState::new(&salt));
        }
        log::info!(
            "negotiated dialect {:?}, signing {}",
            info.dialect,
            if info.require_signing {
                "required"
            } else {
                "enabled"
            }
        );
        self.info
            .set(info)
            .map_err(|_| Error::Internal("connection already negotiated".to_string()))?;
        self.send.lock().await.sequence_window = 1;
        let mut outstanding = self.outstanding.lock().unwrap();
        if matches!(outstanding.state, ConnectionState::Negotiating) {
            outstanding.state = ConnectionState::Established;
        }
        Ok(())
    }

    async fn run_receiver(self: Arc<Connection>, mut reader: Box<dyn FrameRead>) {
        let err = loop {
            match self.receive_one(reader.as_mut()).await {
                Ok(()) => {}
                Err(e) => break e,
            }
        };
        log::debug!("receiver terminating: {err}");
        self.drain(err);
    }

    /// Reads, authenticates and routes one inbound frame.
    ///
    /// Any error returned here is terminal for the connection: the stream's
    /// integrity is no longer assured once a frame fails to parse or
    /// verify.
    async fn receive_one(&self, reader: &mut dyn FrameRead) -> crate::Result<()> {
        let size = reader.read_size().await.map_err(Error::Transport)?;
        let mut pkt = vec![0u8; size];
        reader.read(&mut pkt).await.map_err(Error::Transport)?;

        if PacketCodec::new(&pkt).is_invalid() {
            let session_id = {
                let t = TransformCodec::new(&pkt);
                if t.is_invalid() {
                    return Err(Error::InvalidResponse(
                        "broken packet header format".to_string(),
                    ));
                }
                if t.flags() != TransformHeader::FLAG_ENCRYPTED {
                    return Err(Error::InvalidResponse(
                        "encrypted flag is not on".to_string(),
                    ));
                }
                t.session_id()
            };
            let session = self.lookup_session(session_id).ok_or_else(|| {
                Error::InvalidResponse("unknown session id returned".to_string())
            })?;
            pkt = session.decrypt(&pkt)?;
            if PacketCodec::new(&pkt).is_invalid() {
                return Err(Error::InvalidResponse(
                    "broken packet header format".to_string(),
                ));
            }
        } else {
            let (message_id, signed, session_id) = {
                let p = PacketCodec::new(&pkt);
                (p.message_id(), p.flags().signed(), p.session_id())
            };
            // break notifications bypass the signing checks at this layer
            if message_id != BROADCAST_MESSAGE_ID {
                if signed {
                    let session = self.lookup_session(session_id).ok_or_else(|| {
                        Error::InvalidResponse("unknown session id returned".to_string())
                    })?;
                    session.verify(&mut pkt)?;
                } else if self.require_signing() && self.lookup_session(session_id).is_some() {
                    return Err(Error::InvalidResponse("signing required".to_string()));
                }
            }
        }

        // route, splitting compound responses one chained reply at a time
        let mut rest: &[u8] = &pkt;
        loop {
            let p = PacketCodec::new(rest);
            let message_id = p.message_id();
            if message_id == BROADCAST_MESSAGE_ID {
                let _ = self.notifications.send(rest.to_vec());
                return Ok(());
            }
            let slot = self.outstanding.lock().unwrap().requests.remove(&message_id);
            let slot = slot.ok_or_else(|| {
                Error::InvalidResponse("unknown message id returned".to_string())
            })?;
            self.account.grant(p.credit_response(), slot.credit_request);

            let next = p.next_command();
            if next == 0 {
                let _ = slot.tx.send(Ok(rest.to_vec()));
                return Ok(());
            }
            if next > rest.len() {
                return Err(Error::InvalidResponse(
                    "broken compound response format".to_string(),
                ));
            }
            let _ = slot.tx.send(Ok(rest[..next].to_vec()));
            rest = &rest[next..];
            if PacketCodec::new(rest).is_invalid() {
                return Err(Error::InvalidResponse(
                    "broken compound response format".to_string(),
                ));
            }
        }
    }

    /// Records the terminal error and fails every outstanding request with
    /// it. Subsequent sends are refused.
    fn drain(&self, err: Error) {
        let mut outstanding = self.outstanding.lock().unwrap();
        if !matches!(outstanding.state, ConnectionState::Draining(_)) {
            outstanding.state = ConnectionState::Draining(err);
        }
        let terminal = match &outstanding.state {
            ConnectionState::Draining(e) => e.clone(),
            _ => unreachable!(),
        };
        for (_, slot) in outstanding.requests.drain() {
            let _ = slot.tx.send(Err(terminal.clone()));
        }
    }
}

/// Validates a response packet against the expected command, returning the
/// body of a successful reply and a decoded error otherwise.
pub(crate) fn accept(cmd: Command, pkt: &[u8]) -> crate::Result<&[u8]> {
    let p = PacketCodec::new(pkt);
    if p.command() != cmd as u16 {
        return Err(Error::InvalidResponse(format!(
            "expected command {}, got {:#x}",
            cmd,
            p.command()
        )));
    }
    if p.status() != status::SUCCESS {
        return Err(accept_error(p));
    }
    Ok(p.data())
}

/// Builds the response error for a non-success packet, preserving both
/// error-data shapes: a zero context count yields the raw remaining data as
/// a single entry, a nonzero count one entry per context.
pub(crate) fn accept_error(p: PacketCodec<'_>) -> Error {
    let r = ErrorResponseDecoder::new(p.data());
    if r.is_invalid() {
        return Error::InvalidResponse("broken error response format".to_string());
    }

    let count = r.error_context_count();
    if count != 0 {
        let mut contexts = Vec::with_capacity(count as usize);
        let mut data = r.error_data();
        for _ in 0..count {
            let ctx = ErrorContextResponseDecoder::new(data);
            if ctx.is_invalid() {
                return Error::InvalidResponse(
                    "broken error context response format".to_string(),
                );
            }
            contexts.push(ctx.error_context_data().to_vec());
            data = ctx.next();
        }
        return Error::Response(ResponseError {
            nt_status: p.status(),
            context_count: count,
            contexts,
        });
    }
    Error::Response(ResponseError {
        nt_status: p.status(),
        context_count: 0,
        contexts: vec![r.error_data().to_vec()],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use smb2_msg::{CancelRequest, EchoRequest};
    use smb2_transport::FrameWriter;

    fn test_connection() -> (Arc<Connection>, tokio::io::DuplexStream) {
        let (client, server) = tokio::io::duplex(1 << 20);
        let (_discard, write) = tokio::io::split(client);
        let conn = Connection::new(Box::new(FrameWriter::new(write)), CreditAccount::new(128));
        (conn, server)
    }

    #[tokio::test]
    async fn message_ids_are_dense_and_ordered_per_sender() {
        let (conn, _server) = test_connection();
        let mut handles = Vec::new();
        for _ in 0..4 {
            let conn = conn.clone();
            handles.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                for _ in 0..5 {
                    let mut req = EchoRequest::default();
                    let rr = conn.send(&mut req).await.unwrap();
                    ids.push(rr.message_id());
                }
                ids
            }));
        }
        let mut all = Vec::new();
        for handle in handles {
            let ids = handle.await.unwrap();
            assert!(ids.windows(2).all(|w| w[0] < w[1]));
            all.extend(ids);
        }
        all.sort_unstable();
        assert_eq!(all, (0..20).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn cancel_borrows_the_target_id_and_gets_no_slot() {
        let (conn, _server) = test_connection();
        let mut req = EchoRequest::default();
        let rr = conn.send(&mut req).await.unwrap();
        let window_before = conn.send.lock().await.sequence_window;

        let mut cancel = CancelRequest::new(rr.message_id());
        let cancel_rr = conn.send(&mut cancel).await.unwrap();
        assert_eq!(cancel_rr.message_id(), rr.message_id());
        assert_eq!(conn.send.lock().await.sequence_window, window_before);

        // only the original request occupies a pending slot
        assert_eq!(conn.outstanding.lock().unwrap().requests.len(), 1);
        assert!(matches!(
            conn.recv(cancel_rr).await,
            Err(Error::Internal(_))
        ));
    }

    #[tokio::test]
    async fn draining_fails_pending_receivers_and_new_sends() {
        let (conn, _server) = test_connection();
        let mut req = EchoRequest::default();
        let rr = conn.send(&mut req).await.unwrap();

        conn.drain(Error::Transport(TransportError::Closed));

        assert!(matches!(conn.recv(rr).await, Err(Error::Transport(_))));
        let mut late = EchoRequest::default();
        assert!(matches!(
            conn.send(&mut late).await,
            Err(Error::Transport(_))
        ));
    }

    #[tokio::test]
    async fn credit_request_covers_charge_plus_opening() {
        let (conn, _server) = test_connection();
        // the opening counter asks for the rest of the target window
        let mut req = EchoRequest::default();
        conn.send(&mut req).await.unwrap();
        assert_eq!(req.header.credit_request, 1 + 127);

        let mut req2 = EchoRequest::default();
        conn.send(&mut req2).await.unwrap();
        assert_eq!(req2.header.credit_request, 1);
    }
}
