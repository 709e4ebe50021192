//! End-to-end scenarios over the loopback fabric, with every pattern sharing
//! one connection manager per client.

use crate::{
    CallbackError, ConnectionManager, DispatchState, DxlError, ExitReason, FabricConfig,
    INTERNAL_ERROR_CODE, Listener, LoopbackHub, Message, MessageType, Publisher, Requester,
    ServiceFault, ServiceProvider,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn config() -> FabricConfig {
    FabricConfig::for_broker("localhost", 8883)
}

fn client(hub: &LoopbackHub) -> Arc<ConnectionManager> {
    Arc::new(ConnectionManager::new(Arc::new(hub.session())))
}

async fn eventually<F: Fn() -> bool>(check: F) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn scenario_publish_reaches_listener() {
    crate::utils::logging::init("debug");
    let hub = LoopbackHub::new();
    let listener_conn = client(&hub);
    let listener = Arc::new(Listener::new(listener_conn.clone()));
    let received = Arc::new(Mutex::new(Vec::<Message>::new()));

    let running = {
        let listener = listener.clone();
        let received = received.clone();
        tokio::spawn(async move {
            listener
                .start(&config(), "/t1", move |m: &Message| -> Result<(), CallbackError> {
                    received.lock().unwrap().push(m.clone());
                    Ok(())
                })
                .await
        })
    };
    eventually(|| listener.state() == DispatchState::Running).await;

    let publisher = Publisher::new(client(&hub));
    publisher.connect(&config()).await.unwrap();
    publisher.publish("/t1", r#"{"k":"v"}"#).await.unwrap();
    publisher.publish("/t2", "elsewhere").await.unwrap();

    eventually(|| !received.lock().unwrap().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    listener.stop();
    let reason = running.await.unwrap().unwrap();

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].kind(), MessageType::Event);
    assert_eq!(received[0].topic(), "/t1");
    assert_eq!(received[0].payload_str(), Some(r#"{"k":"v"}"#));
    assert_eq!(
        reason.to_string(),
        "Shutting down event listener on topic '/t1'"
    );
}

#[tokio::test]
async fn scenario_ping_pong_through_service_provider() {
    let hub = LoopbackHub::new();
    let provider = Arc::new(ServiceProvider::new(client(&hub)));
    let running = {
        let provider = provider.clone();
        tokio::spawn(async move {
            provider
                .start(&config(), "/svc", "S1", |req: &Message| -> Result<Vec<u8>, ServiceFault> {
                    assert_eq!(req.payload_str(), Some("ping"));
                    Ok(b"pong".to_vec())
                })
                .await
        })
    };
    eventually(|| provider.state() == DispatchState::Running).await;

    let requester = Requester::new(client(&hub));
    requester.connect(&config()).await.unwrap();
    let response = requester
        .send_request("/svc", "ping", Duration::from_secs(2))
        .await
        .unwrap();

    assert_eq!(response.kind(), MessageType::Response);
    assert_eq!(response.payload_str(), Some("pong"));
    assert_eq!(response.service_id(), Some("S1"));
    assert!(response.request_id().is_some());
    assert_ne!(response.request_id(), Some(response.id()));

    provider.stop();
    let reason = running.await.unwrap().unwrap();
    assert!(!reason.is_error());
}

#[tokio::test]
async fn scenario_failing_handler_surfaces_remote_error() {
    let hub = LoopbackHub::new();
    let provider = Arc::new(ServiceProvider::new(client(&hub)));
    let running = {
        let provider = provider.clone();
        tokio::spawn(async move {
            provider
                .start(&config(), "/svc", "S1", |_req: &Message| -> Result<Vec<u8>, ServiceFault> {
                    panic!("database unavailable")
                })
                .await
        })
    };
    eventually(|| provider.state() == DispatchState::Running).await;

    let requester = Requester::new(client(&hub));
    requester.connect(&config()).await.unwrap();
    let started = tokio::time::Instant::now();
    let err = requester
        .send_request("/svc", "ping", Duration::from_secs(30))
        .await
        .unwrap_err();

    assert!(matches!(err, DxlError::RemoteService { ref code, .. } if code == INTERNAL_ERROR_CODE));
    assert!(started.elapsed() < Duration::from_secs(5));

    provider.stop();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn scenario_shared_connection_for_every_pattern() {
    let hub = LoopbackHub::new();
    let conn = client(&hub);
    let provider = Arc::new(ServiceProvider::new(conn.clone()));
    let listener = Arc::new(Listener::new(conn.clone()));
    let events = Arc::new(Mutex::new(0usize));

    let serving = {
        let provider = provider.clone();
        tokio::spawn(async move {
            provider
                .start(&config(), "/svc/echo", "echo", |req: &Message| -> Result<Vec<u8>, ServiceFault> {
                    Ok(req.payload().to_vec())
                })
                .await
        })
    };
    let listening = {
        let listener = listener.clone();
        let events = events.clone();
        tokio::spawn(async move {
            listener
                .start(&config(), "/audit", move |_m: &Message| -> Result<(), CallbackError> {
                    *events.lock().unwrap() += 1;
                    Ok(())
                })
                .await
        })
    };
    eventually(|| {
        provider.state() == DispatchState::Running && listener.state() == DispatchState::Running
    })
    .await;

    let publisher = Publisher::new(conn.clone());
    let requester = Requester::new(conn.clone());
    let answer = requester.request("/svc/echo", "hello").await.unwrap();
    publisher.publish("/audit", "echoed").await.unwrap();

    assert_eq!(answer.payload_str(), Some("hello"));
    eventually(|| *events.lock().unwrap() == 1).await;
    assert_eq!(hub.connected_sessions(), 1);

    provider.stop();
    listener.stop();
    serving.await.unwrap().unwrap();
    listening.await.unwrap().unwrap();
    assert!(conn.is_connected());

    conn.disconnect().await;
    conn.disconnect().await;
    assert!(!publisher.is_connected());
    assert_eq!(
        publisher.publish("/audit", "late").await.unwrap_err(),
        DxlError::NotConnected
    );
}

#[tokio::test]
async fn scenario_broker_loss_ends_listener_and_fails_requests() {
    let hub = LoopbackHub::new();
    let conn = client(&hub);
    let listener = Arc::new(Listener::new(conn.clone()));
    let running = {
        let listener = listener.clone();
        tokio::spawn(async move {
            listener
                .start(&config(), "/t1", |_m: &Message| -> Result<(), CallbackError> { Ok(()) })
                .await
        })
    };
    eventually(|| listener.state() == DispatchState::Running).await;

    // nobody serves /svc, so this request waits until the session drops
    let pending = {
        let requester = Requester::new(conn.clone());
        tokio::spawn(async move {
            requester
                .send_request("/svc", "ping", Duration::from_secs(30))
                .await
        })
    };
    eventually(|| conn.router().pending_count() == 1).await;

    hub.sever_all("broker restart");

    let reason = running.await.unwrap().unwrap();
    assert!(matches!(reason, ExitReason::Failed { .. }));
    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, DxlError::Connection(_)));
    assert!(!conn.is_connected());

    // reconnecting opens a fresh session
    let handle = conn.connect(&config()).await.unwrap();
    assert_eq!(handle.generation, 2);
}
