//! Listener bookkeeping: live snapshots and periodic reaping of
//! channels whose worker exited.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use wireline::prelude::*;
use wireline::{tcp, ChannelOptions};

fn test_addr() -> SocketAddr {
    let port = portpicker::pick_unused_port().expect("no free port");
    format!("127.0.0.1:{port}").parse().unwrap()
}

async fn eventually(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
    let started = Instant::now();
    loop {
        if cond() {
            return true;
        }
        if started.elapsed() >= timeout {
            return false;
        }
        compio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[compio::test]
async fn reaper_prunes_finished_channels() {
    wireline::dev_tracing::init_tracing();
    let registry = Arc::new(CommandRegistry::with_builtins());
    let options = ChannelOptions::default().with_reap_interval(Duration::from_millis(300));
    let addr = test_addr();

    let mut listener = tcp::Listener::bind(addr, options.clone(), Arc::clone(&registry))
        .await
        .unwrap();

    let mut clients = Vec::new();
    for _ in 0..3 {
        let (client, events) = tcp::connect(addr, options.clone(), Arc::clone(&registry))
            .await
            .unwrap();
        assert!(client.wait_connection(Duration::from_secs(5)).await);
        clients.push((client, events));
    }

    assert!(
        eventually(|| listener.sockets().len() == 3, Duration::from_secs(5)).await,
        "not all channels registered"
    );

    // Stop one client; its server-side worker exits on EOF
    assert!(clients[0].0.disconnect(Duration::from_secs(5)).await);

    // The running snapshot shrinks as soon as the worker is gone
    assert!(
        eventually(|| listener.sockets().len() == 2, Duration::from_secs(5)).await,
        "dead channel still reported as live"
    );

    // The raw registry entry disappears after one reap interval
    assert!(
        eventually(
            || listener.channel_set().len() == 2,
            Duration::from_secs(5)
        )
        .await,
        "reaper never pruned the dead channel"
    );

    for (client, _) in &clients[1..] {
        assert!(client.disconnect(Duration::from_secs(5)).await);
    }
    listener.close().await;
}
