//! WebSocket hub client against a loopback JSON-RPC server
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p tandem-rtc --test hub_client_test -- --nocapture
//! ```

mod harness;

use harness::{init_logging, peer, TestHub};
use std::sync::Arc;
use std::time::Duration;
use tandem_rtc::signaling::{
    error_codes, ChannelEvent, ChannelStatus, HubEvent, HubRequest, JoinRoomResponse,
    SignalingChannel,
};
use tandem_rtc::{Error, HubConnector, ReconnectionPolicy, SignalingConnector};
use tokio::sync::broadcast;

fn connector(max_retries: u32) -> HubConnector {
    HubConnector::new(
        ReconnectionPolicy::immediate(max_retries),
        Duration::from_secs(2),
        Duration::from_secs(2),
    )
}

async fn next_event(events: &mut broadcast::Receiver<ChannelEvent>) -> ChannelEvent {
    tokio::time::timeout(Duration::from_secs(3), events.recv())
        .await
        .expect("event in time")
        .expect("open event stream")
}

#[tokio::test]
async fn test_connect_presents_bearer_token() {
    init_logging();
    let hub = TestHub::start().await;

    let channel = connector(0).connect(&hub.url, "s3cret").await.unwrap();

    assert_eq!(channel.status(), ChannelStatus::Connected);
    assert_eq!(hub.auth_headers(), vec!["Bearer s3cret".to_string()]);
    channel.disconnect().await;
}

#[tokio::test]
async fn test_empty_token_fails_before_dialing() {
    init_logging();
    let hub = TestHub::start().await;

    let result = connector(0).connect(&hub.url, "  ").await;

    assert!(matches!(result, Err(Error::Connection(_))));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(hub.connection_count(), 0);
}

#[tokio::test]
async fn test_unreachable_hub_is_a_connection_error() {
    init_logging();
    let hub = TestHub::start().await;
    let url = hub.url.clone();
    drop(hub);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let result = connector(0).connect(&url, "token").await;
    assert!(matches!(result, Err(Error::Connection(_))));
}

#[tokio::test]
async fn test_invoke_returns_result() {
    init_logging();
    let hub = TestHub::start().await;
    let channel = connector(0).connect(&hub.url, "token").await.unwrap();

    let value = tokio_test::assert_ok!(
        channel
            .invoke(HubRequest::JoinRoom {
                room_id: "room-1".to_string(),
                display_name: "Me".to_string(),
            })
            .await
    );
    let joined: JoinRoomResponse = serde_json::from_value(value).unwrap();

    assert_eq!(joined.peer_id, peer("me"));
    assert!(joined.participants.is_empty());
    channel.disconnect().await;
}

#[tokio::test]
async fn test_invoke_surfaces_hub_errors() {
    init_logging();
    let hub = TestHub::start().await;
    let channel = connector(0).connect(&hub.url, "token").await.unwrap();

    let err = channel
        .invoke(HubRequest::EndRoom {
            room_id: "room-1".to_string(),
        })
        .await
        .unwrap_err();

    match err {
        Error::Signaling { code, message } => {
            assert_eq!(code, error_codes::NOT_AUTHORIZED);
            assert_eq!(message, "Not authorized");
        }
        other => panic!("unexpected error {:?}", other),
    }
    channel.disconnect().await;
}

#[tokio::test]
async fn test_notifications_reach_subscribers() {
    init_logging();
    let hub = TestHub::start().await;
    let channel = connector(0).connect(&hub.url, "token").await.unwrap();
    let mut events = channel.subscribe();

    channel
        .invoke(HubRequest::RaiseHand {
            room_id: "room-1".to_string(),
            raised: true,
        })
        .await
        .unwrap();

    assert_eq!(
        next_event(&mut events).await,
        ChannelEvent::Hub(HubEvent::HandChanged {
            peer_id: peer("me"),
            raised: true
        })
    );
    channel.disconnect().await;
}

#[tokio::test]
async fn test_concurrent_invokes_are_matched_by_id() {
    init_logging();
    let hub = TestHub::start().await;
    let channel: Arc<dyn SignalingChannel> = connector(0).connect(&hub.url, "token").await.unwrap();

    let join = channel.invoke(HubRequest::JoinRoom {
        room_id: "room-1".to_string(),
        display_name: "Me".to_string(),
    });
    let end = channel.invoke(HubRequest::EndRoom {
        room_id: "room-1".to_string(),
    });
    let (joined, ended) = tokio::join!(join, end);

    assert!(joined.unwrap().get("peer_id").is_some());
    assert!(matches!(ended, Err(Error::Signaling { .. })));
    channel.disconnect().await;
}

#[tokio::test]
async fn test_reconnects_after_socket_drop() {
    init_logging();
    let hub = TestHub::start().await;
    let channel = connector(3).connect(&hub.url, "token").await.unwrap();
    let mut events = channel.subscribe();

    // The loopback hub hangs up on room.leave
    let left = channel
        .invoke(HubRequest::LeaveRoom {
            room_id: "room-1".to_string(),
        })
        .await;
    assert!(left.is_err());

    assert_eq!(
        next_event(&mut events).await,
        ChannelEvent::Reconnecting { attempt: 1 }
    );
    assert_eq!(next_event(&mut events).await, ChannelEvent::Reconnected);
    assert_eq!(channel.status(), ChannelStatus::Connected);
    assert_eq!(hub.connection_count(), 2);
    assert_eq!(
        hub.auth_headers(),
        vec!["Bearer token".to_string(), "Bearer token".to_string()]
    );

    let value = channel
        .invoke(HubRequest::JoinRoom {
            room_id: "room-1".to_string(),
            display_name: "Me".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(value["role"], "host");
    channel.disconnect().await;
}

#[tokio::test]
async fn test_gives_up_when_hub_stays_down() {
    init_logging();
    let hub = TestHub::start().await;
    let channel = connector(2).connect(&hub.url, "token").await.unwrap();
    let mut events = channel.subscribe();

    hub.stop_accepting();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let _ = channel
        .invoke(HubRequest::LeaveRoom {
            room_id: "room-1".to_string(),
        })
        .await;

    assert_eq!(
        next_event(&mut events).await,
        ChannelEvent::Reconnecting { attempt: 1 }
    );
    assert_eq!(
        next_event(&mut events).await,
        ChannelEvent::Reconnecting { attempt: 2 }
    );
    assert!(matches!(
        next_event(&mut events).await,
        ChannelEvent::Closed { .. }
    ));
    assert_eq!(channel.status(), ChannelStatus::Disconnected);

    let err = channel
        .invoke(HubRequest::JoinRoom {
            room_id: "room-1".to_string(),
            display_name: "Me".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotConnected(_)));
}

#[tokio::test]
async fn test_disconnect_is_quiet() {
    init_logging();
    let hub = TestHub::start().await;
    let channel = connector(3).connect(&hub.url, "token").await.unwrap();
    let mut events = channel.subscribe();

    channel.disconnect().await;

    assert_eq!(channel.status(), ChannelStatus::Disconnected);
    let invoked = channel
        .invoke(HubRequest::LeaveRoom {
            room_id: "room-1".to_string(),
        })
        .await;
    assert!(matches!(invoked, Err(Error::NotConnected(_))));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(matches!(
        events.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));
    assert_eq!(hub.connection_count(), 1);
}
