use super::{ConnectionManager, ConnectionState, REPLY_TOPIC_PREFIX, ResponseRouter};
use crate::config::FabricConfig;
use crate::fabric::{Fabric, LoopbackFabric, LoopbackHub, ServiceRegistration};
use crate::message::Message;
use crate::utils::DxlError;
use std::sync::Arc;
use std::time::Duration;

fn config() -> FabricConfig {
    FabricConfig::for_broker("localhost", 8883)
}

fn manager_on(hub: &LoopbackHub) -> (Arc<LoopbackFabric>, ConnectionManager) {
    let fabric = Arc::new(hub.session());
    let manager = ConnectionManager::new(fabric.clone());
    (fabric, manager)
}

#[test]
fn test_router_discards_unmatched_reply() {
    let router = ResponseRouter::new();
    let request = Message::request("/svc", "ping", "/reply");
    let stray = Message::response_to(&request, "pong").unwrap();

    assert!(!router.route(stray));
    assert!(!router.route(Message::event("/t1", "x")));
}

#[tokio::test]
async fn test_router_matches_on_request_id() {
    let router = Arc::new(ResponseRouter::new());
    let first = Message::request("/svc", "a", "/reply");
    let second = Message::request("/svc", "b", "/reply");
    let pending_first = router.register(first.id()).unwrap();
    let pending_second = router.register(second.id()).unwrap();
    assert_eq!(router.pending_count(), 2);

    assert!(router.route(Message::response_to(&second, "for b").unwrap()));

    let answer = pending_second.wait(Duration::from_secs(1)).await.unwrap();
    assert_eq!(answer.request_id(), Some(second.id()));
    assert_eq!(answer.payload_str(), Some("for b"));

    let err = pending_first
        .wait(Duration::from_millis(20))
        .await
        .unwrap_err();
    assert!(matches!(err, DxlError::Timeout { .. }));
    assert_eq!(router.pending_count(), 0);
}

#[tokio::test]
async fn test_router_refuses_duplicate_id() {
    let router = Arc::new(ResponseRouter::new());
    let _pending = router.register("{dup}").unwrap();
    assert!(matches!(
        router.register("{dup}"),
        Err(DxlError::Transport(_))
    ));
}

#[tokio::test]
async fn test_router_clear_fails_waiters() {
    let router = Arc::new(ResponseRouter::new());
    let pending = router.register("{gone}").unwrap();

    router.clear();

    let err = pending.wait(Duration::from_secs(1)).await.unwrap_err();
    assert!(matches!(err, DxlError::Connection(_)));
}

#[tokio::test]
async fn test_connect_and_disconnect() {
    let hub = LoopbackHub::new();
    let (fabric, manager) = manager_on(&hub);
    assert_eq!(manager.state(), ConnectionState::Disconnected);

    let handle = manager
        .connect(&config().with_client_id("{client}"))
        .await
        .unwrap();

    assert!(manager.is_connected());
    assert!(fabric.is_connected());
    assert_eq!(handle.client_id, "{client}");
    assert_eq!(handle.reply_topic, format!("{REPLY_TOPIC_PREFIX}{{client}}"));
    assert_eq!(hub.subscriber_count(&handle.reply_topic), 1);

    manager.disconnect().await;

    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(!fabric.is_connected());
    assert!(manager.handle().await.is_none());
}

#[tokio::test]
async fn test_connect_is_idempotent() {
    let hub = LoopbackHub::new();
    let (_fabric, manager) = manager_on(&hub);

    let first = manager.connect(&config()).await.unwrap();
    let second = manager.connect(&config()).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(hub.connected_sessions(), 1);
}

#[tokio::test]
async fn test_disconnect_twice_is_harmless() {
    let hub = LoopbackHub::new();
    let (_fabric, manager) = manager_on(&hub);
    manager.disconnect().await;

    manager.connect(&config()).await.unwrap();
    manager.disconnect().await;
    manager.disconnect().await;

    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert_eq!(hub.connected_sessions(), 0);
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let hub = LoopbackHub::new();
    let (_fabric, manager) = manager_on(&hub);

    let err = manager.connect(&FabricConfig::default()).await.unwrap_err();

    assert!(matches!(err, DxlError::Connection(_)));
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_unreachable_fabric() {
    let hub = LoopbackHub::new();
    let (fabric, manager) = manager_on(&hub);
    fabric.set_unreachable(true);

    let err = manager.connect(&config()).await.unwrap_err();

    assert!(matches!(err, DxlError::Connection(_)));
    assert!(!manager.is_connected());
}

#[tokio::test]
async fn test_connect_times_out() {
    let hub = LoopbackHub::new();
    let (fabric, manager) = manager_on(&hub);
    fabric.set_connect_delay(Some(Duration::from_secs(5)));
    let config = config().with_connect_timeout(Duration::from_secs(1));

    let err = manager.connect(&config).await.unwrap_err();

    assert!(matches!(err, DxlError::Connection(_)));
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_send_requires_connection() {
    let hub = LoopbackHub::new();
    let (_fabric, manager) = manager_on(&hub);

    let err = manager.send(Message::event("/t1", "x")).await.unwrap_err();
    assert_eq!(err, DxlError::NotConnected);

    let err = manager.subscribe("/t1").await.unwrap_err();
    assert!(matches!(err, DxlError::Subscription { .. }));
}

#[tokio::test]
async fn test_send_failure_is_transport_error() {
    let hub = LoopbackHub::new();
    let (fabric, manager) = manager_on(&hub);
    manager.connect(&config()).await.unwrap();
    fabric.set_fail_publish(true);

    let err = manager.send(Message::event("/t1", "x")).await.unwrap_err();

    assert!(matches!(err, DxlError::Transport(_)));
}

#[tokio::test]
async fn test_subscriptions_are_shared_per_topic() {
    let hub = LoopbackHub::new();
    let (_fabric, manager) = manager_on(&hub);
    manager.connect(&config()).await.unwrap();

    let _first = manager.subscribe("/t1").await.unwrap();
    let _second = manager.subscribe("/t1").await.unwrap();
    assert_eq!(manager.subscribed_topics().await, vec!["/t1".to_string()]);

    manager.unsubscribe("/t1").await;
    assert_eq!(hub.subscriber_count("/t1"), 1);

    manager.unsubscribe("/t1").await;
    assert_eq!(hub.subscriber_count("/t1"), 0);
    assert!(manager.subscribed_topics().await.is_empty());
}

#[tokio::test]
async fn test_disconnect_releases_subscriptions() {
    let hub = LoopbackHub::new();
    let (_fabric, manager) = manager_on(&hub);
    manager.connect(&config()).await.unwrap();
    let mut sub = manager.subscribe("/t1").await.unwrap();

    manager.disconnect().await;

    assert!(sub.next_message().await.is_none());
    assert_eq!(hub.subscriber_count("/t1"), 0);
}

#[tokio::test]
async fn test_severed_session_reads_disconnected() {
    let hub = LoopbackHub::new();
    let (fabric, manager) = manager_on(&hub);
    manager.connect(&config()).await.unwrap();
    let pending = manager.router().register("{in-flight}").unwrap();

    fabric.sever("link down");

    assert!(!manager.is_connected());
    let err = pending.wait(Duration::from_secs(1)).await.unwrap_err();
    assert!(matches!(err, DxlError::Connection(_)));

    // a fresh connect replaces the lost session
    let handle = manager.connect(&config()).await.unwrap();
    assert_eq!(handle.generation, 2);
    assert!(manager.is_connected());
}

#[tokio::test]
async fn test_service_registration() {
    let hub = LoopbackHub::new();
    let (_fabric, manager) = manager_on(&hub);
    let registration = ServiceRegistration {
        service_type: "S1".into(),
        instance_id: "{instance}".into(),
        topics: vec!["/svc".into()],
    };

    let err = manager.register_service(&registration).await.unwrap_err();
    assert!(matches!(err, DxlError::Subscription { .. }));

    manager.connect(&config()).await.unwrap();
    manager.register_service(&registration).await.unwrap();
    assert_eq!(hub.services(), vec![registration.clone()]);

    manager.unregister_service(&registration).await;
    assert!(hub.services().is_empty());
}

#[tokio::test]
async fn test_reply_topic_cannot_be_taken_over() {
    let hub = LoopbackHub::new();
    let (_fabric, manager) = manager_on(&hub);
    let handle = manager.connect(&config()).await.unwrap();

    let err = manager.subscribe(&handle.reply_topic).await.unwrap_err();
    assert!(matches!(err, DxlError::Subscription { ref topic, .. } if *topic == handle.reply_topic));

    manager.unsubscribe(&handle.reply_topic).await;

    assert_eq!(hub.subscriber_count(&handle.reply_topic), 1);
    let pending = manager.router().register("{still-routed}").unwrap();
    let request = Message::from_parts(
        "/svc",
        crate::message::PROTOCOL_VERSION,
        "{still-routed}",
        "ping",
        crate::message::MessageBody::Request {
            reply_topic: handle.reply_topic.clone(),
            service_id: None,
        },
    );
    manager
        .send(Message::response_to(&request, "pong").unwrap())
        .await
        .unwrap();
    let answer = pending.wait(Duration::from_secs(1)).await.unwrap();
    assert_eq!(answer.payload_str(), Some("pong"));
}
