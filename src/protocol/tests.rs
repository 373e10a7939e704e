// test-only module included via protocol/mod.rs
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use crate::protocol::handshake::*;

/// Full gated session flow over an in-memory pipe: credential exchange, then
/// a normal request/reply with echoes in both directions.
#[tokio::test]
async fn test_gated_session_flow() {
    let (mut client, mut server) = tokio::io::duplex(1024);
    let token = HandshakeToken::random();
    let accounts = vec![("operator".to_string(), "secret".to_string())];

    let server_task = tokio::spawn(async move {
        // =================== Step 1: account exchange ===================
        let (cmd, user, payload) = receive_and_verify(&mut server, &token, None)
            .await
            .expect("account frame should verify");
        assert_eq!(cmd, command::ACCOUNT);
        let (reply, verdict) = check_account(&payload, &accounts);
        send_and_confirm(&mut server, command::ACCOUNT, user, &token, &reply)
            .await
            .expect("account reply should send");
        verdict.expect("credentials should match");

        // =================== Step 2: normal traffic ===================
        let (cmd, user, payload) = receive_and_verify(&mut server, &token, None)
            .await
            .expect("data frame should verify");
        assert_eq!(cmd, command::PING);
        send_and_confirm(&mut server, command::PING, user, &token, &payload)
            .await
            .expect("ping reply should send");
    });

    request_account(&mut client, "operator", "secret", 9, &token, None)
        .await
        .expect("gate should accept");

    send_and_confirm(&mut client, command::PING, 9, &token, b"probe")
        .await
        .expect("request should send");
    let (cmd, _user, payload) = receive_and_verify(&mut client, &token, None)
        .await
        .expect("reply should verify");
    assert_eq!(cmd, command::PING);
    assert_eq!(payload, b"probe");

    server_task.await.unwrap();
}

/// Rejected credentials close the gate with a descriptive failure.
#[tokio::test]
async fn test_gate_rejects_bad_password() {
    let (mut client, mut server) = tokio::io::duplex(1024);
    let token = HandshakeToken::random();
    let accounts = vec![("operator".to_string(), "secret".to_string())];

    let server_task = tokio::spawn(async move {
        let (_cmd, user, payload) = receive_and_verify(&mut server, &token, None)
            .await
            .expect("account frame should verify");
        let (reply, verdict) = check_account(&payload, &accounts);
        send_and_confirm(&mut server, command::ACCOUNT, user, &token, &reply)
            .await
            .expect("reject reply should send");
        assert!(verdict.is_err());
    });

    let err = request_account(&mut client, "operator", "wrong", 0, &token, None)
        .await
        .unwrap_err();
    assert!(matches!(err, crate::error::LinkError::AuthFailed(_)));

    server_task.await.unwrap();
}
