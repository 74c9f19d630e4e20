mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FakeServer, Listener, TIMEOUT, auth_key, duplex_connector, now_secs};
use tgwire_client::{
    Connection, ConnectionError, ConnectionState, InvocationError, MtpSender, SenderConfig, SenderHooks,
    TransportKind, Update,
};
use tgwire_crypto::AuthKey;
use tgwire_tl_types::Serializable;
use tgwire_tl_types::mtproto::{BadMsgNotification, BadServerSalt, Ping, Pong, RpcError};
use tokio::sync::mpsc;

async fn connected(hooks: SenderHooks) -> (MtpSender, Listener, FakeServer) {
    let (connector, listener) = duplex_connector();
    let sender = MtpSender::new(Some(auth_key()), SenderConfig { retries: Some(1), ..Default::default() }, hooks);
    let connection = Connection::new("149.154.167.51:443", 2, TransportKind::Abridged, connector);
    sender.connect(connection).await.unwrap();
    let server = listener.accept(auth_key()).await;
    (sender, listener, server)
}

fn pong_for(ping: &common::ClientMessage, ping_id: i64) -> Pong {
    Pong { msg_id: ping.msg_id, ping_id }
}

#[tokio::test]
async fn rpc_result_resolves_the_request() {
    let (sender, _listener, mut server) = connected(SenderHooks::default()).await;

    let call = tokio::spawn({
        let sender = sender.clone();
        async move { sender.invoke(&Ping { ping_id: 7 }).await }
    });

    let request = server.recv().await;
    assert_eq!(request.body, Ping { ping_id: 7 }.to_bytes());
    assert_eq!(request.seq_no % 2, 1, "requests are content-related");
    server.reply(&request, pong_for(&request, 7)).await;

    let pong = call.await.unwrap().unwrap();
    assert_eq!(pong.ping_id, 7);
    assert_eq!(pong.msg_id, request.msg_id);
}

#[tokio::test]
async fn back_to_back_requests_travel_in_one_container() {
    let (sender, _listener, mut server) = connected(SenderHooks::default()).await;

    let first = tokio::spawn({
        let sender = sender.clone();
        async move { sender.invoke(&Ping { ping_id: 1 }).await }
    });
    let second = tokio::spawn({
        let sender = sender.clone();
        async move { sender.invoke(&Ping { ping_id: 2 }).await }
    });

    let a = server.recv().await;
    let b = server.recv().await;
    let container = a.container_id.expect("first request outside a container");
    assert_eq!(b.container_id, Some(container));

    let mut ids = vec![container, a.msg_id, b.msg_id];
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 3);

    server.reply(&b, pong_for(&b, 2)).await;
    server.reply(&a, pong_for(&a, 1)).await;
    assert_eq!(first.await.unwrap().unwrap().ping_id, 1);
    assert_eq!(second.await.unwrap().unwrap().ping_id, 2);
}

#[tokio::test]
async fn bad_server_salt_resends_with_the_new_salt() {
    let (sender, _listener, mut server) = connected(SenderHooks::default()).await;

    let call = tokio::spawn({
        let sender = sender.clone();
        async move { sender.invoke(&Ping { ping_id: 3 }).await }
    });

    let original = server.recv().await;
    assert_eq!(original.salt, 0);
    let correction = BadServerSalt {
        bad_msg_id: original.msg_id,
        bad_msg_seqno: original.seq_no,
        error_code: 48,
        new_server_salt: 0x5a17,
    };
    server.send(&correction.to_bytes()).await;

    let resent = server.recv().await;
    assert_eq!(resent.body, original.body);
    assert_eq!(resent.salt, 0x5a17);
    assert_ne!(resent.msg_id, original.msg_id);

    server.reply(&resent, pong_for(&resent, 3)).await;
    assert_eq!(call.await.unwrap().unwrap().ping_id, 3);
}

#[tokio::test]
async fn bad_msg_16_corrects_the_clock_and_resends() {
    let (sender, _listener, mut server) = connected(SenderHooks::default()).await;

    let call = tokio::spawn({
        let sender = sender.clone();
        async move { sender.invoke(&Ping { ping_id: 4 }).await }
    });

    let original = server.recv().await;
    let notification = BadMsgNotification { bad_msg_id: original.msg_id, bad_msg_seqno: original.seq_no, error_code: 16 };
    // The server's clock runs 1000 s ahead of ours.
    let server_msg_id = ((now_secs() + 1000) << 32) | 1;
    server.send_as(server_msg_id, &notification.to_bytes()).await;

    let resent = server.recv().await;
    assert_eq!(resent.body, original.body);
    let skew = (resent.msg_id >> 32) - now_secs();
    assert!((995..=1005).contains(&skew), "msg_id clock is off by {skew}s");

    server.reply(&resent, pong_for(&resent, 4)).await;
    assert_eq!(call.await.unwrap().unwrap().ping_id, 4);
}

#[tokio::test]
async fn bad_msg_17_corrects_the_clock_and_resends() {
    let (sender, _listener, mut server) = connected(SenderHooks::default()).await;

    let call = tokio::spawn({
        let sender = sender.clone();
        async move { sender.invoke(&Ping { ping_id: 17 }).await }
    });

    let original = server.recv().await;
    let notification = BadMsgNotification { bad_msg_id: original.msg_id, bad_msg_seqno: original.seq_no, error_code: 17 };
    // This time our clock is the one ahead, by 500 s.
    let server_msg_id = ((now_secs() - 500) << 32) | 1;
    server.send_as(server_msg_id, &notification.to_bytes()).await;

    let resent = server.recv().await;
    assert_eq!(resent.body, original.body);
    let skew = (resent.msg_id >> 32) - now_secs();
    assert!((-505..=-495).contains(&skew), "msg_id clock is off by {skew}s");

    server.reply(&resent, pong_for(&resent, 17)).await;
    assert_eq!(call.await.unwrap().unwrap().ping_id, 17);
}

#[tokio::test]
async fn bad_msg_32_raises_the_sequence_and_resends() {
    let (sender, _listener, mut server) = connected(SenderHooks::default()).await;

    let call = tokio::spawn({
        let sender = sender.clone();
        async move { sender.invoke(&Ping { ping_id: 32 }).await }
    });

    let original = server.recv().await;
    let notification = BadMsgNotification { bad_msg_id: original.msg_id, bad_msg_seqno: original.seq_no, error_code: 32 };
    server.send(&notification.to_bytes()).await;

    let resent = server.recv().await;
    assert_eq!(resent.body, original.body);
    assert_ne!(resent.msg_id, original.msg_id);
    assert_eq!(resent.seq_no % 2, 1);
    assert!(resent.seq_no >= original.seq_no + 128, "seq_no {} after {}", resent.seq_no, original.seq_no);

    server.reply(&resent, pong_for(&resent, 32)).await;
    assert_eq!(call.await.unwrap().unwrap().ping_id, 32);
}

#[tokio::test]
async fn bad_msg_33_lowers_the_sequence_and_resends() {
    let (sender, _listener, mut server) = connected(SenderHooks::default()).await;

    let call = tokio::spawn({
        let sender = sender.clone();
        async move { sender.invoke(&Ping { ping_id: 33 }).await }
    });

    let original = server.recv().await;
    let notification = BadMsgNotification { bad_msg_id: original.msg_id, bad_msg_seqno: original.seq_no, error_code: 33 };
    server.send(&notification.to_bytes()).await;

    let resent = server.recv().await;
    assert_eq!(resent.body, original.body);
    assert_eq!(resent.seq_no & 1, 1, "still content-related");
    assert!(resent.seq_no < original.seq_no, "seq_no {} after {}", resent.seq_no, original.seq_no);

    server.reply(&resent, pong_for(&resent, 33)).await;
    assert_eq!(call.await.unwrap().unwrap().ping_id, 33);
}

#[tokio::test]
async fn bad_server_salt_resends_only_the_refused_request() {
    let (sender, _listener, mut server) = connected(SenderHooks::default()).await;

    let refused = tokio::spawn({
        let sender = sender.clone();
        async move { sender.invoke(&Ping { ping_id: 41 }).await }
    });
    let first = server.recv().await;
    let bystander = tokio::spawn({
        let sender = sender.clone();
        async move { sender.invoke(&Ping { ping_id: 42 }).await }
    });
    let second = server.recv().await;
    assert_eq!(second.body, Ping { ping_id: 42 }.to_bytes());

    let correction =
        BadServerSalt { bad_msg_id: first.msg_id, bad_msg_seqno: first.seq_no, error_code: 48, new_server_salt: 0x77 };
    server.send(&correction.to_bytes()).await;

    let resent = server.recv().await;
    assert_eq!(resent.body, first.body);
    assert_eq!(resent.salt, 0x77);
    server.reply(&resent, pong_for(&resent, 41)).await;
    server.reply(&second, pong_for(&second, 42)).await;
    assert_eq!(refused.await.unwrap().unwrap().ping_id, 41);
    assert_eq!(bystander.await.unwrap().unwrap().ping_id, 42);

    // Anything re-sent for the bystander would arrive before this.
    let last = tokio::spawn({
        let sender = sender.clone();
        async move { sender.invoke(&Ping { ping_id: 43 }).await }
    });
    let next = server.recv().await;
    assert_eq!(next.body, Ping { ping_id: 43 }.to_bytes());
    server.reply(&next, pong_for(&next, 43)).await;
    assert_eq!(last.await.unwrap().unwrap().ping_id, 43);
}

#[tokio::test]
async fn other_bad_msg_codes_reject_the_request() {
    let (sender, _listener, mut server) = connected(SenderHooks::default()).await;

    let call = tokio::spawn({
        let sender = sender.clone();
        async move { sender.invoke(&Ping { ping_id: 5 }).await }
    });

    let original = server.recv().await;
    let notification = BadMsgNotification { bad_msg_id: original.msg_id, bad_msg_seqno: original.seq_no, error_code: 64 };
    server.send(&notification.to_bytes()).await;

    match call.await.unwrap() {
        Err(InvocationError::BadMessage { code, request }) => {
            assert_eq!(code, 64);
            assert_eq!(request, "Ping");
        }
        other => panic!("expected BadMessage, got {other:?}"),
    }
}

#[tokio::test]
async fn rpc_errors_are_parsed() {
    let (sender, _listener, mut server) = connected(SenderHooks::default()).await;

    let call = tokio::spawn({
        let sender = sender.clone();
        async move { sender.invoke(&Ping { ping_id: 6 }).await }
    });

    let request = server.recv().await;
    server.reply(&request, RpcError { error_code: 420, error_message: "FLOOD_WAIT_31".into() }).await;

    match call.await.unwrap() {
        Err(InvocationError::Rpc(e)) => {
            assert_eq!(e.code, 420);
            assert_eq!(e.name, "FLOOD_WAIT");
            assert_eq!(e.value, Some(31));
            assert_eq!(e.caused_by.as_deref(), Some("Ping"));
        }
        other => panic!("expected an RPC error, got {other:?}"),
    }
}

#[tokio::test]
async fn disconnect_rejects_every_pending_request() {
    let (sender, _listener, mut server) = connected(SenderHooks::default()).await;

    let calls: Vec<_> = (0..3)
        .map(|i| {
            let sender = sender.clone();
            tokio::spawn(async move { sender.invoke(&Ping { ping_id: i }).await })
        })
        .collect();
    for _ in 0..3 {
        server.recv().await;
    }

    sender.disconnect().await;
    for call in calls {
        assert!(matches!(call.await.unwrap(), Err(InvocationError::Dropped)));
    }
    assert!(!sender.is_connected());
}

#[tokio::test]
async fn forgotten_key_breaks_the_main_sender() {
    let (updates_tx, mut updates) = mpsc::unbounded_channel();
    let (keys_tx, mut keys) = mpsc::unbounded_channel::<(Option<AuthKey>, i32)>();
    let hooks = SenderHooks {
        updates: Some(Arc::new(move |update| {
            let _ = updates_tx.send(update);
        })),
        auth_key: Some(Arc::new(move |key, dc_id| {
            let _ = keys_tx.send((key, dc_id));
        })),
        ..Default::default()
    };
    let (sender, _listener, mut server) = connected(hooks).await;
    assert_eq!(updates.recv().await, Some(Update::ConnectionState(ConnectionState::Connected)));

    let call = tokio::spawn({
        let sender = sender.clone();
        async move { sender.invoke(&Ping { ping_id: 8 }).await }
    });
    server.recv().await;
    server.send_status(404).await;

    let update = tokio::time::timeout(TIMEOUT, updates.recv()).await.unwrap();
    assert_eq!(update, Some(Update::ConnectionState(ConnectionState::Broken)));
    let (key, dc_id) = tokio::time::timeout(TIMEOUT, keys.recv()).await.unwrap().unwrap();
    assert_eq!((key, dc_id), (None, 2));
    assert_eq!(sender.auth_key_cell().get(), None);

    let result = tokio::time::timeout(TIMEOUT, call).await.unwrap().unwrap();
    assert!(
        matches!(result, Err(InvocationError::Connection(ConnectionError::AuthKeyLost))),
        "got {result:?}"
    );
    assert!(!sender.is_connected());
    assert!(matches!(sender.invoke(&Ping { ping_id: 80 }).await, Err(InvocationError::NotConnected)));
}

#[tokio::test]
async fn forgotten_key_stops_a_bare_sender() {
    let (sender, _listener, mut server) = connected(SenderHooks::default()).await;

    let call = tokio::spawn({
        let sender = sender.clone();
        async move { sender.invoke(&Ping { ping_id: 81 }).await }
    });
    server.recv().await;
    server.send_status(404).await;

    let result = tokio::time::timeout(TIMEOUT, call).await.expect("request left hanging").unwrap();
    assert!(matches!(result, Err(InvocationError::Connection(ConnectionError::AuthKeyLost))));
    assert!(!sender.is_connected());
}

#[tokio::test]
async fn updates_reach_the_update_hook() {
    let (updates_tx, mut updates) = mpsc::unbounded_channel();
    let hooks = SenderHooks {
        updates: Some(Arc::new(move |update| {
            let _ = updates_tx.send(update);
        })),
        ..Default::default()
    };
    let (sender, _listener, mut server) = connected(hooks).await;
    assert_eq!(updates.recv().await, Some(Update::ConnectionState(ConnectionState::Connected)));

    // The server needs our session ID before it can talk first.
    let call = tokio::spawn({
        let sender = sender.clone();
        async move { sender.invoke(&Ping { ping_id: 9 }).await }
    });
    let request = server.recv().await;

    let updates_too_long = 0xe317af7eu32.to_le_bytes();
    server.send(&updates_too_long).await;
    let update = tokio::time::timeout(TIMEOUT, updates.recv()).await.unwrap();
    assert_eq!(update, Some(Update::Raw(updates_too_long.to_vec())));

    server.reply(&request, pong_for(&request, 9)).await;
    call.await.unwrap().unwrap();
}

#[tokio::test]
async fn lost_connection_reconnects_and_resends() {
    let (sender, listener, mut server) = connected(SenderHooks::default()).await;

    let call = tokio::spawn({
        let sender = sender.clone();
        async move { sender.invoke(&Ping { ping_id: 10 }).await }
    });
    let original = server.recv().await;
    server.hang_up();

    let mut server = listener.accept(auth_key()).await;
    let resent = server.recv().await;
    assert_eq!(resent.body, original.body);
    server.reply(&resent, pong_for(&resent, 10)).await;

    let pong = tokio::time::timeout(Duration::from_secs(10), call).await.unwrap().unwrap().unwrap();
    assert_eq!(pong.ping_id, 10);
}

#[tokio::test]
async fn concurrent_reconnects_leave_one_live_connection() {
    let (sender, listener, mut original) = connected(SenderHooks::default()).await;

    let (connector, reconnects) = duplex_connector();
    let first = Connection::new("149.154.167.51:443", 2, TransportKind::Abridged, connector.clone());
    let second = Connection::new("149.154.167.51:443", 2, TransportKind::Abridged, connector);
    let (a, b) = tokio::join!(sender.reconnect_to(first), sender.reconnect_to(second));
    a.unwrap();
    b.unwrap();
    drop(listener);

    original.closed().await;
    let mut replaced = reconnects.accept(auth_key()).await;
    let mut live = reconnects.accept(auth_key()).await;
    replaced.closed().await;
    assert!(sender.is_connected());

    let call = tokio::spawn({
        let sender = sender.clone();
        async move { sender.invoke(&Ping { ping_id: 50 }).await }
    });
    let request = live.recv().await;
    live.reply(&request, pong_for(&request, 50)).await;
    assert_eq!(call.await.unwrap().unwrap().ping_id, 50);

    sender.disconnect().await;
    live.closed().await;
}

#[tokio::test]
async fn failed_reconnect_stops_the_sender() {
    let (sender, _listener, mut server) = connected(SenderHooks::default()).await;

    let call = tokio::spawn({
        let sender = sender.clone();
        async move { sender.invoke(&Ping { ping_id: 60 }).await }
    });
    server.recv().await;

    let (connector, unreachable) = duplex_connector();
    drop(unreachable);
    let dead_end = Connection::new("149.154.175.53:443", 1, TransportKind::Abridged, connector);
    let result = sender.reconnect_to(dead_end).await;
    assert!(matches!(result, Err(ConnectionError::Io(_))), "got {result:?}");

    assert!(!sender.is_connected());
    let result = tokio::time::timeout(TIMEOUT, call).await.expect("request left hanging").unwrap();
    assert!(matches!(result, Err(InvocationError::Dropped)));
    assert!(matches!(sender.invoke(&Ping { ping_id: 61 }).await, Err(InvocationError::NotConnected)));
    server.closed().await;
}
