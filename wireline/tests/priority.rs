//! Outbound scheduling: weighted priority order and cancellation, as
//! observed by the receiving peer.

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

fn tagged(command: Uuid, priority: Priority, tag: u64) -> Arc<Message> {
    let mut message = Message::event(command);
    message.set_priority(priority);
    message.set_tag(tag);
    Arc::new(message)
}

#[compio::test]
async fn weighted_priority_order_on_the_wire() {
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

    let (client, _client_events) =
        tcp::connect(addr, ChannelOptions::default(), Arc::clone(&registry))
            .await
            .unwrap();
    assert!(client.wait_connection(Duration::from_secs(5)).await);

    // Enqueue H1,H2, N1..N10, L1,L2 without yielding to the worker, so
    // the whole batch is scheduled in one go.
    client.send(tagged(ping, Priority::High, 1));
    client.send(tagged(ping, Priority::High, 2));
    for tag in 11..=20 {
        client.send(tagged(ping, Priority::Normal, tag));
    }
    client.send(tagged(ping, Priority::Low, 91));
    client.send(tagged(ping, Priority::Low, 92));

    let mut tags = Vec::new();
    for _ in 0..14 {
        tags.push(next_message(&server_events, Duration::from_secs(5)).await.tag());
    }
    assert_eq!(
        tags,
        vec![1, 2, 11, 12, 13, 14, 15, 91, 16, 17, 18, 19, 20, 92]
    );

    assert!(client.disconnect(Duration::from_secs(5)).await);
    listener.close().await;
}

#[compio::test]
async fn remove_cancels_queued_messages() {
    wireline::dev_tracing::init_tracing();
    let keep = Uuid::new_v4();
    let cancel = Uuid::new_v4();
    let registry = {
        let mut registry = CommandRegistry::with_builtins();
        registry.register(keep, "Keep");
        registry.register(cancel, "Cancel");
        Arc::new(registry)
    };
    let addr = test_addr();

    let mut listener = tcp::Listener::bind(addr, ChannelOptions::default(), Arc::clone(&registry))
        .await
        .unwrap();
    let server_events = listener.events();

    let (client, _client_events) =
        tcp::connect(addr, ChannelOptions::default(), Arc::clone(&registry))
            .await
            .unwrap();
    assert!(client.wait_connection(Duration::from_secs(5)).await);

    client.send(tagged(keep, Priority::Normal, 1));
    client.send(tagged(cancel, Priority::Normal, 2));
    client.send(tagged(keep, Priority::Normal, 3));
    client.remove(cancel);

    let first = next_message(&server_events, Duration::from_secs(5)).await;
    let second = next_message(&server_events, Duration::from_secs(5)).await;
    assert_eq!(first.tag(), 1);
    assert_eq!(second.tag(), 3);
    assert_eq!(first.command(), keep);
    assert_eq!(second.command(), keep);

    // The cancelled message never shows up
    let deadline = Instant::now() + Duration::from_millis(300);
    while Instant::now() < deadline {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if let Ok(Ok(ChannelEvent::Message(stray))) =
            compio::time::timeout(remaining, server_events.recv_async()).await
        {
            panic!("cancelled message arrived: tag {}", stray.tag());
        }
    }

    assert!(client.disconnect(Duration::from_secs(5)).await);
    listener.close().await;
}
