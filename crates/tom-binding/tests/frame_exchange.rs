//! Frame exchange over an in-memory duplex pipe, both directions.

use tom_binding::{CodecError, ConnectRequest, ConnectResponse};

#[tokio::test]
async fn request_response_exchange() {
    let (mut client, mut relay) = tokio::io::duplex(4096);

    let relay_task = tokio::spawn(async move {
        let req = tom_binding::read_request(&mut relay).await.unwrap();
        let resp = if req.host == "api.internal" && req.port == 8443 {
            ConnectResponse::accepted("ep_42", "tls")
        } else {
            ConnectResponse::rejected("ERR_NOT_BOUND", "unknown endpoint")
        };
        tom_binding::write_response(&mut relay, &resp).await.unwrap();
        relay
    });

    tom_binding::write_request(&mut client, &ConnectRequest::new("api.internal", 8443))
        .await
        .unwrap();
    let resp = tom_binding::read_response(&mut client).await.unwrap();
    let resp = resp.into_result().unwrap();
    assert_eq!(resp.endpoint_id, "ep_42");
    assert_eq!(resp.proto, "tls");

    relay_task.await.unwrap();
}

#[tokio::test]
async fn rejection_decodes_cleanly() {
    let (mut client, mut relay) = tokio::io::duplex(4096);

    tokio::spawn(async move {
        let _ = tom_binding::read_request(&mut relay).await;
        let resp = ConnectResponse::rejected("ERR_NOT_BOUND", "unknown endpoint");
        tom_binding::write_response(&mut relay, &resp).await.unwrap();
    });

    tom_binding::write_request(&mut client, &ConnectRequest::new("nope.internal", 80))
        .await
        .unwrap();
    let resp = tom_binding::read_response(&mut client).await.unwrap();
    let rejected = resp.into_result().unwrap_err();
    assert_eq!(rejected.code, "ERR_NOT_BOUND");
}

#[tokio::test]
async fn peer_hangup_mid_frame_is_io_error() {
    let (mut client, mut relay) = tokio::io::duplex(64);

    tokio::spawn(async move {
        use tokio::io::AsyncWriteExt;
        // length says 20, only 4 bytes then close
        relay.write_all(&[20, 0, 0x0a, 2, b'o', b'k']).await.unwrap();
        drop(relay);
    });

    match tom_binding::read_response(&mut client).await {
        Err(CodecError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof),
        other => panic!("expected Io error, got {other:?}"),
    }
}
