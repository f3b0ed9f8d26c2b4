//! End-to-end exchange: event broadcast delivery and request/answer
//! pairing routed back through the listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;
use wireline::prelude::*;
use wireline::{tcp, ChannelOptions};

fn test_addr() -> SocketAddr {
    let port = portpicker::pick_unused_port().expect("no free port");
    format!("127.0.0.1:{port}").parse().unwrap()
}

async fn next_message(
    events: &flume::Receiver<ChannelEvent>,
    timeout: Duration,
) -> Arc<Message> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let event = compio::time::timeout(remaining, events.recv_async())
            .await
            .expect("timed out waiting for a message")
            .expect("event channel closed");
        if let ChannelEvent::Message(message) = event {
            return message;
        }
    }
}

#[compio::test]
async fn event_delivery_and_answer_routing() {
    wireline::dev_tracing::init_tracing();
    let ping = Uuid::new_v4();
    let registry = {
        let mut registry = CommandRegistry::with_builtins();
        registry.register(ping, "Ping");
        Arc::new(registry)
    };
    let addr = test_addr();

    let mut listener = tcp::Listener::bind(addr, ChannelOptions::default(), Arc::clone(&registry))
        .await
        .unwrap();
    let server_events = listener.events();

    let (client, client_events) =
        tcp::connect(addr, ChannelOptions::default(), Arc::clone(&registry))
            .await
            .unwrap();
    assert!(client.wait_connection(Duration::from_secs(5)).await);

    // Fire-and-forget event reaches the owner exactly once
    let mut event = Message::event(ping);
    event.set_tag(7);
    assert!(client.send(Arc::new(event)));

    let received = next_message(&server_events, Duration::from_secs(5)).await;
    assert_eq!(received.kind(), MessageKind::Event);
    assert_eq!(received.command(), ping);
    assert_eq!(received.tag(), 7);
    assert_eq!(received.transport(), TransportKind::Stream);
    assert!(received.descriptor() != -1);

    // No duplicate delivery
    assert!(
        compio::time::timeout(Duration::from_millis(200), server_events.recv_async())
            .await
            .is_err()
    );

    // Request/answer pairing: the answer routes back over the same
    // connection via the descriptor the request arrived with
    let request = Message::new(ping);
    let request_id = request.id();
    assert!(client.send(Arc::new(request)));

    let server_copy = next_message(&server_events, Duration::from_secs(5)).await;
    assert_eq!(server_copy.id(), request_id);
    listener.send(Arc::new(server_copy.answer()), &[]);

    let answer = next_message(&client_events, Duration::from_secs(5)).await;
    assert_eq!(answer.kind(), MessageKind::Answer);
    assert_eq!(answer.id(), request_id);
    assert_eq!(answer.command(), ping);
    assert_eq!(answer.exec_status(), ExecStatus::Success);

    assert!(client.disconnect(Duration::from_secs(5)).await);
    listener.close().await;
}

#[compio::test]
async fn event_broadcast_honors_exclusions() {
    wireline::dev_tracing::init_tracing();
    let ping = Uuid::new_v4();
    let registry = {
        let mut registry = CommandRegistry::with_builtins();
        registry.register(ping, "Ping");
        Arc::new(registry)
    };
    let addr = test_addr();

    let mut listener = tcp::Listener::bind(addr, ChannelOptions::default(), Arc::clone(&registry))
        .await
        .unwrap();

    let (first, first_events) =
        tcp::connect(addr, ChannelOptions::default(), Arc::clone(&registry))
            .await
            .unwrap();
    let (second, second_events) =
        tcp::connect(addr, ChannelOptions::default(), Arc::clone(&registry))
            .await
            .unwrap();
    assert!(first.wait_connection(Duration::from_secs(5)).await);
    assert!(second.wait_connection(Duration::from_secs(5)).await);

    // Exclude the channel that corresponds to `first`. From the server's
    // point of view that is whichever accepted channel `first` hit; find
    // it by elimination after a probe.
    let mut probe = Message::event(ping);
    probe.set_tag(1);
    assert!(first.send(Arc::new(probe)));
    let server_events = listener.events();
    let probe_copy = loop {
        let event = compio::time::timeout(Duration::from_secs(5), server_events.recv_async())
            .await
            .expect("no probe")
            .unwrap();
        if let ChannelEvent::Message(message) = event {
            break message;
        }
    };
    let first_descriptor = probe_copy.descriptor();

    listener.send(Arc::new(Message::event(ping)), &[first_descriptor]);

    // Only the second client hears the broadcast
    let received = next_message(&second_events, Duration::from_secs(5)).await;
    assert_eq!(received.command(), ping);
    let deadline = Instant::now() + Duration::from_millis(300);
    while Instant::now() < deadline {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if let Ok(Ok(ChannelEvent::Message(_))) =
            compio::time::timeout(remaining, first_events.recv_async()).await
        {
            panic!("excluded channel received the broadcast");
        }
    }

    assert!(first.disconnect(Duration::from_secs(5)).await);
    assert!(second.disconnect(Duration::from_secs(5)).await);
    listener.close().await;
}
