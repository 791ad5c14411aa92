//! In-memory server side for connection tests: a framed duplex transport
//! plus builders for the handful of response shapes the tests serve.

#![allow(dead_code)]

use smb2::auth::{spnego, Authenticator, NTLMSSP_OID};
use smb2::connection::preauth_hash::PreauthHashState;
use smb2::crypto::{derive_session_keys, normalize_session_key, DerivedKeys};
use smb2::msg::{status, Command, Dialect, Header, PacketCodec};
use smb2::transport::{FrameRead, FrameReader, FrameWrite, FrameWriter};
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

pub const SERVER_GUID: [u8; 16] = [0xAB; 16];

pub fn align8(n: usize) -> usize {
    (n + 7) & !7
}

/// The server end of an in-memory framed transport.
pub struct FakeServer {
    pub reader: FrameReader<ReadHalf<DuplexStream>>,
    pub writer: FrameWriter<WriteHalf<DuplexStream>>,
}

/// Builds a duplex transport; the boxed halves go to the client connection.
pub fn transport_pair() -> (Box<dyn FrameRead>, Box<dyn FrameWrite>, FakeServer) {
    let (client, server) = tokio::io::duplex(1 << 20);
    let (client_read, client_write) = tokio::io::split(client);
    let (server_read, server_write) = tokio::io::split(server);
    (
        Box::new(FrameReader::new(client_read)),
        Box::new(FrameWriter::new(client_write)),
        FakeServer {
            reader: FrameReader::new(server_read),
            writer: FrameWriter::new(server_write),
        },
    )
}

impl FakeServer {
    pub async fn read_frame(&mut self) -> Vec<u8> {
        let size = self.reader.read_size().await.unwrap();
        let mut buf = vec![0u8; size];
        self.reader.read(&mut buf).await.unwrap();
        buf
    }

    pub async fn write_frame(&mut self, buf: &[u8]) {
        self.writer.write(buf).await.unwrap();
    }
}

/// A response header mirroring one request.
pub fn response_header(
    cmd: Command,
    nt_status: u32,
    message_id: u64,
    credit_response: u16,
) -> Header {
    let mut hdr = Header::new(cmd);
    hdr.credit_charge = 0;
    hdr.status = nt_status;
    hdr.credit_request = credit_response;
    hdr.flags.set_server_to_redir(true);
    hdr.message_id = message_id;
    hdr
}

/// A response with the ubiquitous 4-byte `(StructureSize, Reserved)` body.
pub fn build_empty_response(cmd: Command, nt_status: u32, message_id: u64) -> Vec<u8> {
    let mut pkt = vec![0u8; 68];
    response_header(cmd, nt_status, message_id, 1).encode(&mut pkt);
    pkt[64..66].copy_from_slice(&4u16.to_le_bytes());
    pkt
}

pub fn hash_context_data(algorithms: &[u16], salt: &[u8]) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&(algorithms.len() as u16).to_le_bytes());
    data.extend_from_slice(&(salt.len() as u16).to_le_bytes());
    for alg in algorithms {
        data.extend_from_slice(&alg.to_le_bytes());
    }
    data.extend_from_slice(salt);
    data
}

pub fn cipher_context_data(ciphers: &[u16]) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&(ciphers.len() as u16).to_le_bytes());
    for cipher in ciphers {
        data.extend_from_slice(&cipher.to_le_bytes());
    }
    data
}

/// A NEGOTIATE response frame selecting `dialect`.
pub fn build_negotiate_response(
    dialect: u16,
    security_mode: u16,
    contexts: &[(u16, Vec<u8>)],
    message_id: u64,
) -> Vec<u8> {
    let mut pkt = vec![0u8; 64 + 64];
    response_header(Command::Negotiate, status::SUCCESS, message_id, 128).encode(&mut pkt);

    let body_at = 64;
    pkt[body_at..body_at + 2].copy_from_slice(&65u16.to_le_bytes());
    pkt[body_at + 2..body_at + 4].copy_from_slice(&security_mode.to_le_bytes());
    pkt[body_at + 4..body_at + 6].copy_from_slice(&dialect.to_le_bytes());
    pkt[body_at + 6..body_at + 8].copy_from_slice(&(contexts.len() as u16).to_le_bytes());
    pkt[body_at + 8..body_at + 24].copy_from_slice(&SERVER_GUID);
    pkt[body_at + 24..body_at + 28].copy_from_slice(&0x0000_0047u32.to_le_bytes());
    pkt[body_at + 28..body_at + 32].copy_from_slice(&0x0080_0000u32.to_le_bytes());
    pkt[body_at + 32..body_at + 36].copy_from_slice(&0x0080_0000u32.to_le_bytes());
    pkt[body_at + 36..body_at + 40].copy_from_slice(&0x0080_0000u32.to_le_bytes());

    if !contexts.is_empty() {
        // contexts start 8-aligned past the fixed body (abs offset 128)
        pkt[body_at + 60..body_at + 64].copy_from_slice(&128u32.to_le_bytes());
        for (ctx_type, data) in contexts {
            let at = align8(pkt.len());
            pkt.resize(at, 0);
            pkt.extend_from_slice(&ctx_type.to_le_bytes());
            pkt.extend_from_slice(&(data.len() as u16).to_le_bytes());
            pkt.extend_from_slice(&0u32.to_le_bytes());
            pkt.extend_from_slice(data);
        }
    }
    pkt
}

/// A SESSION_SETUP response frame.
pub fn build_session_setup_response(
    nt_status: u32,
    message_id: u64,
    session_id: u64,
    session_flags: u16,
    security_buffer: &[u8],
) -> Vec<u8> {
    let mut pkt = vec![0u8; 64 + 8];
    let mut hdr = response_header(Command::SessionSetup, nt_status, message_id, 16);
    hdr.session_id = session_id;
    hdr.encode(&mut pkt);

    pkt[64..66].copy_from_slice(&9u16.to_le_bytes());
    pkt[66..68].copy_from_slice(&session_flags.to_le_bytes());
    if !security_buffer.is_empty() {
        pkt[68..70].copy_from_slice(&72u16.to_le_bytes());
        pkt[70..72].copy_from_slice(&(security_buffer.len() as u16).to_le_bytes());
        pkt.extend_from_slice(security_buffer);
    }
    pkt
}

/// A TREE_CONNECT response frame.
pub fn build_tree_connect_response(
    message_id: u64,
    tree_id: u32,
    share_flags: u32,
) -> Vec<u8> {
    let mut pkt = vec![0u8; 64 + 16];
    let mut hdr = response_header(Command::TreeConnect, status::SUCCESS, message_id, 1);
    hdr.tree_id = tree_id;
    hdr.encode(&mut pkt);

    pkt[64..66].copy_from_slice(&16u16.to_le_bytes());
    pkt[66] = 0x01; // disk share
    pkt[68..72].copy_from_slice(&share_flags.to_le_bytes());
    pkt
}

/// Serves one NEGOTIATE leg, answering with `dialect` and no contexts.
pub async fn serve_negotiate(server: &mut FakeServer, dialect: u16) {
    let req = server.read_frame().await;
    let p = PacketCodec::new(&req);
    assert!(!p.is_invalid());
    assert_eq!(p.command(), Command::Negotiate as u16);
    let reply = build_negotiate_response(dialect, 0x0001, &[], p.message_id());
    server.write_frame(&reply).await;
}

/// Serves a 3.1.1 NEGOTIATE with preauth (SHA-512 + `salt`) and cipher
/// (`cipher`) contexts.
pub async fn serve_negotiate_311(server: &mut FakeServer, salt: &[u8], cipher: u16) {
    let req = server.read_frame().await;
    let p = PacketCodec::new(&req);
    assert!(!p.is_invalid());
    let contexts = vec![
        (0x0001u16, hash_context_data(&[0x0001], salt)),
        (0x0002u16, cipher_context_data(&[cipher])),
    ];
    let reply = build_negotiate_response(0x0311, 0x0001, &contexts, p.message_id());
    server.write_frame(&reply).await;
}

/// A two-leg token exchange that hands out a fixed session key.
pub struct StubAuthenticator {
    key: Vec<u8>,
    complete: bool,
}

impl StubAuthenticator {
    pub fn new(key: &[u8]) -> StubAuthenticator {
        StubAuthenticator {
            key: key.to_vec(),
            complete: false,
        }
    }
}

impl Authenticator for StubAuthenticator {
    fn oid(&self) -> &[u8] {
        NTLMSSP_OID
    }

    fn next_token(&mut self, server_token: Option<&[u8]>) -> smb2::Result<Vec<u8>> {
        match server_token {
            None => Ok(b"stub-negotiate".to_vec()),
            Some(token) => {
                assert_eq!(token, b"stub-challenge");
                self.complete = true;
                Ok(b"stub-authenticate".to_vec())
            }
        }
    }

    fn is_complete(&self) -> bool {
        self.complete
    }

    fn session_key(&self) -> smb2::Result<Vec<u8>> {
        Ok(self.key.clone())
    }
}

/// Serves the two session-setup legs of [`StubAuthenticator`] and returns
/// the session keys the client must have derived.
///
/// For 3.1.1 pass the negotiate salt to mirror the preauth hash; for
/// earlier dialects pass `None`.
pub async fn serve_session_setup(
    server: &mut FakeServer,
    dialect: Dialect,
    preauth_salt: Option<&[u8]>,
    session_key: &[u8],
    session_id: u64,
    session_flags: u16,
) -> DerivedKeys {
    let mut preauth = preauth_salt.map(PreauthHashState::new);

    // leg 1: NegTokenInit in, challenge out
    let req1 = server.read_frame().await;
    if let Some(state) = preauth.as_mut() {
        state.update(&req1);
    }
    let p1 = PacketCodec::new(&req1);
    assert_eq!(p1.command(), Command::SessionSetup as u16);
    assert!(!p1.flags().signed());

    let challenge = spnego::encode_neg_token_resp(Some(NTLMSSP_OID), b"stub-challenge", None);
    let resp1 = build_session_setup_response(
        status::MORE_PROCESSING_REQUIRED,
        p1.message_id(),
        session_id,
        0,
        &challenge,
    );
    if let Some(state) = preauth.as_mut() {
        state.update(&resp1);
    }
    server.write_frame(&resp1).await;

    // leg 2: authenticate in, success out; keys bind the hash to this point
    let req2 = server.read_frame().await;
    if let Some(state) = preauth.as_mut() {
        state.update(&req2);
    }
    let p2 = PacketCodec::new(&req2);
    assert_eq!(p2.session_id(), session_id);

    let keys = derive_session_keys(
        dialect,
        &normalize_session_key(session_key),
        preauth.as_ref().map(|state| state.value()),
    )
    .unwrap();

    let resp2 = build_session_setup_response(
        status::SUCCESS,
        p2.message_id(),
        session_id,
        session_flags,
        &[],
    );
    server.write_frame(&resp2).await;
    keys
}
