//! Cross-crate router/facade scenarios driven over real loopback QUIC/UDP
//! sockets (§8 scenarios 3-6). Scenario 3 (plain two-router message
//! exchange) is already covered as a unit test inside `ochra-router`; this
//! file covers route propagation, namespace isolation, and reply timeout.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use ochra_crypto::identity::PrivateKey;
use ochra_facade::{Facade, MessageType};
use ochra_router::{Router, RouterConfig};
use ochra_types::network::NodeInfo;

fn config(port_start: u16, namespace: [u8; 4]) -> RouterConfig {
    RouterConfig {
        bind_host: "127.0.0.1".parse().expect("ip"),
        port_range: (port_start, port_start + 30),
        handshake_timeout: Duration::from_secs(2),
        home_namespace: namespace,
    }
}

async fn bind(port_start: u16, namespace: [u8; 4]) -> Arc<Router> {
    Router::bind(PrivateKey::generate(), config(port_start, namespace))
        .await
        .expect("router binds")
}

/// Scenario 4: route propagation. R3 knows only R1's address; once R1 and
/// R2 have mutually discovered each other, R3 can reach R2 by sending to
/// it directly, the router falling back to an iterative lookup through R1.
#[tokio::test]
async fn test_route_propagation_through_intermediate_peer() {
    let namespace = [1u8; 4];
    let r1 = bind(19500, namespace).await;
    let r2 = bind(19530, namespace).await;
    let r3 = bind(19560, namespace).await;

    let r2_id = r2.self_id(namespace);

    // R1 and R2 mutually discover.
    r1.discover(namespace, r2.local_addr()).await.expect("r1 discovers r2");
    r2.discover(namespace, r1.local_addr()).await.expect("r2 discovers r1");
    tokio::time::sleep(Duration::from_millis(200)).await;

    // R3 knows only R1's address.
    r3.discover(namespace, r1.local_addr()).await.expect("r3 discovers r1");
    tokio::time::sleep(Duration::from_millis(200)).await;

    r3.send(r2_id, b"route me through R1".to_vec()).await;

    let message = tokio::time::timeout(Duration::from_secs(5), r2.recv())
        .await
        .expect("message arrives within the retry window")
        .expect("channel open");
    assert_eq!(message.payload, b"route me through R1");
    assert_eq!(message.src, r3.self_id(namespace));
}

/// Scenario 5: namespace isolation. R1-R3 join namespace A, R4-R5 join
/// namespace B. A send within A reaches its target and never leaks into B.
#[tokio::test]
async fn test_namespace_isolation() {
    let ns_a = [2u8; 4];
    let ns_b = [3u8; 4];

    let r1 = bind(19600, ns_a).await;
    let r2 = bind(19630, ns_a).await;
    let r3 = bind(19660, ns_a).await;
    let r4 = bind(19690, ns_b).await;
    let r5 = bind(19720, ns_b).await;

    r3.discover(ns_a, r1.local_addr()).await.expect("r3 discovers r1");
    tokio::time::sleep(Duration::from_millis(150)).await;

    let r1_id = r1.self_id(ns_a);
    r3.send(r1_id, b"namespace A only".to_vec()).await;

    let message = tokio::time::timeout(Duration::from_secs(5), r1.recv())
        .await
        .expect("message arrives")
        .expect("channel open");
    assert_eq!(message.payload, b"namespace A only");
    assert_eq!(message.src.namespace, ns_a);

    for router in [&r2, &r4, &r5] {
        let result = tokio::time::timeout(Duration::from_millis(300), router.recv()).await;
        assert!(result.is_err(), "router outside the send's namespace received a message");
    }
}

/// Scenario 6: reply timeout. R1 registers a type and sends a request to
/// R2, which never registers a handler for it. The callback resolves to
/// `None` within 1.0-1.5 seconds.
#[tokio::test]
async fn test_reply_timeout_resolves_to_none() {
    #[derive(Clone, Debug, Serialize, Deserialize)]
    struct Probe {
        nonce: u64,
    }
    impl MessageType for Probe {
        const TAG: &'static str = "scenario6-probe";
    }

    let namespace = [4u8; 4];
    let r1 = bind(19750, namespace).await;
    let r2 = bind(19780, namespace).await;

    let r2_id = r2.self_id(namespace);
    r1.dht(namespace)
        .await
        .add(NodeInfo::new(r2_id, r2.local_addr()))
        .await;

    let facade1 = Facade::new(Arc::clone(&r1));
    let facade2 = Facade::new(Arc::clone(&r2));
    facade1.register_type::<Probe>().await;
    facade2.register_type::<Probe>().await;
    // facade2 never calls on_message, so no reply is ever produced.

    let started = tokio::time::Instant::now();
    let reply = facade1
        .request(r2_id, &Probe { nonce: 7 })
        .await
        .expect("request completes");
    let elapsed = started.elapsed();

    assert!(reply.is_none());
    assert!(elapsed >= Duration::from_millis(950));
    assert!(elapsed <= Duration::from_millis(1600));

    facade1.close();
    facade2.close();
}
