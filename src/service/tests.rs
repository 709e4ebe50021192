use super::{INTERNAL_ERROR_CODE, RequestHandler, ServiceFault, ServiceProvider};
use crate::config::FabricConfig;
use crate::connection::ConnectionManager;
use crate::dispatch::{DispatchState, ExitReason};
use crate::fabric::{Fabric, LoopbackFabric, LoopbackHub, Subscription};
use crate::message::{Message, MessageType};
use crate::utils::DxlError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn config() -> FabricConfig {
    FabricConfig::for_broker("localhost", 8883)
}

async fn wait_for_state(provider: &ServiceProvider, state: DispatchState) {
    for _ in 0..200 {
        if provider.state() == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("provider never reached {state}");
}

fn upper(request: &Message) -> Result<Vec<u8>, ServiceFault> {
    Ok(request.payload().to_ascii_uppercase())
}

fn refuse(_request: &Message) -> Result<Vec<u8>, ServiceFault> {
    Err(ServiceFault::new("E7", "refused"))
}

fn explode(_request: &Message) -> Result<Vec<u8>, ServiceFault> {
    panic!("handler blew up")
}

/// A raw session acting as requester, with its reply topic subscribed.
async fn client(hub: &LoopbackHub) -> (LoopbackFabric, Subscription) {
    let session = hub.session();
    session.connect(&config()).await.unwrap();
    let replies = session.subscribe("/replies").await.unwrap();
    (session, replies)
}

fn spawn_provider(
    provider: &Arc<ServiceProvider>,
    handlers: HashMap<String, Arc<dyn RequestHandler>>,
) -> tokio::task::JoinHandle<Result<ExitReason, DxlError>> {
    let provider = provider.clone();
    tokio::spawn(async move {
        provider
            .start_with_topics(&config(), "S1", handlers)
            .await
    })
}

#[test]
fn test_service_fault_rendering() {
    assert_eq!(ServiceFault::new("E1", "bad").to_string(), "E1: bad");
    assert_eq!(ServiceFault::internal("x").code, INTERNAL_ERROR_CODE);
}

#[tokio::test]
async fn test_answers_each_topic_with_its_handler() {
    let hub = LoopbackHub::new();
    let provider = Arc::new(ServiceProvider::new(Arc::new(ConnectionManager::new(
        Arc::new(hub.session()),
    ))));
    let handlers: HashMap<String, Arc<dyn RequestHandler>> = HashMap::from([
        ("/svc/upper".to_string(), Arc::new(upper) as Arc<dyn RequestHandler>),
        ("/svc/refuse".to_string(), Arc::new(refuse) as Arc<dyn RequestHandler>),
    ]);
    let running = spawn_provider(&provider, handlers);
    wait_for_state(&provider, DispatchState::Running).await;

    let registered = hub.services();
    assert_eq!(registered.len(), 1);
    assert_eq!(registered[0].service_type, "S1");
    assert_eq!(registered[0].topics, vec!["/svc/refuse", "/svc/upper"]);

    let (session, mut replies) = client(&hub).await;
    let first = Message::request("/svc/upper", "abc", "/replies");
    let second = Message::request("/svc/refuse", "abc", "/replies");
    session.publish(first.clone()).await.unwrap();
    session.publish(second.clone()).await.unwrap();

    let response = replies.next_message().await.unwrap().unwrap();
    assert_eq!(response.kind(), MessageType::Response);
    assert_eq!(response.request_id(), Some(first.id()));
    assert_eq!(response.service_id(), Some("S1"));
    assert_eq!(response.payload(), b"ABC");

    let error = replies.next_message().await.unwrap().unwrap();
    assert_eq!(error.kind(), MessageType::Error);
    assert_eq!(error.request_id(), Some(second.id()));
    assert_eq!(error.error_code(), Some("E7"));
    assert_eq!(error.error_text(), Some("refused"));
    assert_eq!(provider.handled_requests(), 2);

    provider.stop();
    let reason = running.await.unwrap().unwrap();
    assert_eq!(
        reason.to_string(),
        "Shutting down service provider on topic(s) '/svc/refuse, /svc/upper'"
    );
    assert!(hub.services().is_empty());
    assert_eq!(hub.subscriber_count("/svc/upper"), 0);
}

#[tokio::test]
async fn test_panicking_handler_gets_internal_error() {
    let hub = LoopbackHub::new();
    let provider = Arc::new(ServiceProvider::new(Arc::new(ConnectionManager::new(
        Arc::new(hub.session()),
    ))));
    let handlers: HashMap<String, Arc<dyn RequestHandler>> =
        HashMap::from([("/svc".to_string(), Arc::new(explode) as Arc<dyn RequestHandler>)]);
    let running = spawn_provider(&provider, handlers);
    wait_for_state(&provider, DispatchState::Running).await;

    let (session, mut replies) = client(&hub).await;
    let request = Message::request("/svc", "x", "/replies");
    session.publish(request.clone()).await.unwrap();

    let error = replies.next_message().await.unwrap().unwrap();
    assert_eq!(error.request_id(), Some(request.id()));
    assert_eq!(error.error_code(), Some(INTERNAL_ERROR_CODE));

    // still serving after the panic
    let again = Message::request("/svc", "y", "/replies");
    session.publish(again.clone()).await.unwrap();
    let error = replies.next_message().await.unwrap().unwrap();
    assert_eq!(error.request_id(), Some(again.id()));

    provider.stop();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_events_on_service_topic_are_ignored() {
    let hub = LoopbackHub::new();
    let provider = Arc::new(ServiceProvider::new(Arc::new(ConnectionManager::new(
        Arc::new(hub.session()),
    ))));
    let handlers: HashMap<String, Arc<dyn RequestHandler>> =
        HashMap::from([("/svc".to_string(), Arc::new(upper) as Arc<dyn RequestHandler>)]);
    let running = spawn_provider(&provider, handlers);
    wait_for_state(&provider, DispatchState::Running).await;

    let (session, mut replies) = client(&hub).await;
    session.publish(Message::event("/svc", "noise")).await.unwrap();
    let request = Message::request("/svc", "q", "/replies");
    session.publish(request.clone()).await.unwrap();

    let response = replies.next_message().await.unwrap().unwrap();
    assert_eq!(response.request_id(), Some(request.id()));
    assert_eq!(provider.handled_requests(), 1);

    provider.stop();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_start_without_topics_is_rejected() {
    let hub = LoopbackHub::new();
    let provider = ServiceProvider::new(Arc::new(ConnectionManager::new(Arc::new(hub.session()))));

    let err = provider
        .start_with_topics(&config(), "S1", HashMap::new())
        .await
        .unwrap_err();

    assert!(matches!(err, DxlError::Subscription { .. }));
    assert_eq!(provider.state(), DispatchState::Idle);
}

#[tokio::test]
async fn test_stop_returns_promptly() {
    let hub = LoopbackHub::new();
    let provider = Arc::new(ServiceProvider::new(Arc::new(ConnectionManager::new(
        Arc::new(hub.session()),
    ))));
    let running = {
        let provider = provider.clone();
        tokio::spawn(async move { provider.start(&config(), "/svc", "S1", upper).await })
    };
    wait_for_state(&provider, DispatchState::Running).await;

    provider.stop();

    let reason = tokio::time::timeout(Duration::from_secs(2), running)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(!reason.is_error());
    assert_eq!(provider.state(), DispatchState::Idle);
}

#[tokio::test]
async fn test_cancelled_start_unregisters_service() {
    let hub = LoopbackHub::new();
    let conn = Arc::new(ConnectionManager::new(Arc::new(hub.session())));
    let provider = ServiceProvider::new(conn);

    let cancelled = tokio::time::timeout(
        Duration::from_millis(100),
        provider.start(&config(), "/svc", "S1", upper),
    )
    .await;
    assert!(cancelled.is_err());
    assert_eq!(provider.state(), DispatchState::Idle);

    for _ in 0..200 {
        if hub.services().is_empty() && hub.subscriber_count("/svc") == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(hub.services().is_empty());
    assert_eq!(hub.subscriber_count("/svc"), 0);
}
