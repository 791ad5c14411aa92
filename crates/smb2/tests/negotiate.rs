//! Negotiation handshake scenarios against an in-memory server.

mod common;

use common::*;
use smb2::msg::{Dialect, EncryptionCipher, HashAlgorithm, PacketCodec};
use smb2::{Error, Negotiator};

#[test_log::test(tokio::test)]
async fn wildcard_dialect_triggers_one_versioned_retry() {
    let (reader, writer, mut server) = transport_pair();
    let client =
        tokio::spawn(async move { Negotiator::default().negotiate(reader, writer).await });

    // first request offers the full client list
    let req1 = server.read_frame().await;
    let p1 = PacketCodec::new(&req1);
    let dialect_count = u16::from_le_bytes(req1[66..68].try_into().unwrap());
    assert_eq!(dialect_count, 5);
    server
        .write_frame(&build_negotiate_response(0x02FF, 0x0001, &[], p1.message_id()))
        .await;

    // the retry pins 2.1.0
    let req2 = server.read_frame().await;
    let p2 = PacketCodec::new(&req2);
    assert!(p2.message_id() > p1.message_id());
    let dialect_count = u16::from_le_bytes(req2[66..68].try_into().unwrap());
    assert_eq!(dialect_count, 1);
    let offered = u16::from_le_bytes(req2[100..102].try_into().unwrap());
    assert_eq!(offered, 0x0210);
    server
        .write_frame(&build_negotiate_response(0x0210, 0x0001, &[], p2.message_id()))
        .await;

    let conn = client.await.unwrap().unwrap();
    assert_eq!(conn.info().unwrap().dialect, Dialect::Smb0210);
    conn.close().await;
}

#[test_log::test(tokio::test)]
async fn full_311_handshake_records_contexts() {
    let (reader, writer, mut server) = transport_pair();
    let client =
        tokio::spawn(async move { Negotiator::default().negotiate(reader, writer).await });

    serve_negotiate_311(&mut server, &[0x5A; 32], EncryptionCipher::Aes128Gcm as u16).await;

    let conn = client.await.unwrap().unwrap();
    let info = conn.info().unwrap();
    assert_eq!(info.dialect, Dialect::Smb0311);
    assert_eq!(info.preauth_hash_id, Some(HashAlgorithm::Sha512));
    assert_eq!(info.cipher_id, Some(EncryptionCipher::Aes128Gcm));
    assert_eq!(info.server_guid, SERVER_GUID);
    assert_eq!(info.max_read_size, 0x0080_0000);
    assert!(info.capabilities.large_mtu());
    assert!(!info.require_signing);
    conn.close().await;
}

#[test_log::test(tokio::test)]
async fn server_requiring_signing_is_recorded() {
    let (reader, writer, mut server) = transport_pair();
    let client =
        tokio::spawn(async move { Negotiator::default().negotiate(reader, writer).await });

    let req = server.read_frame().await;
    let p = PacketCodec::new(&req);
    server
        .write_frame(&build_negotiate_response(0x0210, 0x0002, &[], p.message_id()))
        .await;

    let conn = client.await.unwrap().unwrap();
    assert!(conn.info().unwrap().require_signing);
    conn.close().await;
}

#[test_log::test(tokio::test)]
async fn two_hash_algorithms_are_rejected() {
    let (reader, writer, mut server) = transport_pair();
    let client =
        tokio::spawn(async move { Negotiator::default().negotiate(reader, writer).await });

    let req = server.read_frame().await;
    let p = PacketCodec::new(&req);
    let contexts = vec![(
        0x0001u16,
        hash_context_data(&[0x0001, 0x0001], &[0x5A; 32]),
    )];
    server
        .write_frame(&build_negotiate_response(0x0311, 0x0001, &contexts, p.message_id()))
        .await;

    let err = client.await.unwrap().unwrap_err();
    match err {
        Error::InvalidResponse(msg) => assert_eq!(msg, "multiple hash algorithms"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test_log::test(tokio::test)]
async fn mismatched_pinned_dialect_is_rejected() {
    let (reader, writer, mut server) = transport_pair();
    let negotiator = Negotiator {
        specified_dialect: Some(Dialect::Smb0302),
        ..Negotiator::default()
    };
    let client = tokio::spawn(async move { negotiator.negotiate(reader, writer).await });

    let req = server.read_frame().await;
    let p = PacketCodec::new(&req);
    server
        .write_frame(&build_negotiate_response(0x0300, 0x0001, &[], p.message_id()))
        .await;

    let err = client.await.unwrap().unwrap_err();
    match err {
        Error::InvalidResponse(msg) => assert_eq!(msg, "unexpected dialect returned"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test_log::test(tokio::test)]
async fn missing_311_contexts_are_rejected() {
    let (reader, writer, mut server) = transport_pair();
    let client =
        tokio::spawn(async move { Negotiator::default().negotiate(reader, writer).await });

    serve_negotiate(&mut server, 0x0311).await;

    let err = client.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::InvalidResponse(_)));
}
