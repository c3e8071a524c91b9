//! Multi-party room flows against the in-memory fakes
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p tandem-rtc --test room_mesh_test -- --nocapture
//! ```

mod harness;

use harness::{eventually, join_reply, peer, RoomFixture};
use std::collections::BTreeSet;
use tandem_rtc::signaling::{error_codes, HubEvent, HubRequest, ParticipantRole};
use tandem_rtc::testing::FakeOp;
use tandem_rtc::{
    ConnectionState, Error, IceCandidate, MediaStream, MediaTrack, RoomNotice, RoomStatus,
    SignalingHealth, TrackKind,
};

const TRIO: &[(&str, &str)] = &[("p1", "Priya"), ("p2", "Paulo")];

fn offer_targets(requests: &[HubRequest]) -> BTreeSet<String> {
    requests
        .iter()
        .filter_map(|r| match r {
            HubRequest::SendOffer { to, .. } => Some(to.to_string()),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Joining
// ============================================================================

#[tokio::test]
async fn test_join_lists_roster_without_streams() {
    let (fx, channel) = RoomFixture::joined("host", "host", TRIO).await;

    let state = fx.session.state();
    assert_eq!(state.status, RoomStatus::Connected);
    assert_eq!(state.room_id.as_deref(), Some("room-1"));
    assert_eq!(state.self_id, Some(peer("host")));
    assert!(state.is_host);
    assert!(state.local_stream.is_some());
    assert!(state.mic_enabled && state.camera_enabled);
    assert_eq!(state.signaling, SignalingHealth::Online);

    assert_eq!(state.participants.len(), 2);
    let priya = &state.participants[&peer("p1")];
    assert_eq!(priya.display_name, "Priya");
    assert_eq!(priya.role, ParticipantRole::Participant);
    assert!(priya.remote_stream.is_none());
    assert!(priya.connection.is_none());

    assert_eq!(fx.connector.tokens(), vec!["room-token".to_string()]);
    assert_eq!(channel.requests_for("room.join").len(), 1);
    assert_eq!(fx.factory.created_count(), 0);
}

#[tokio::test]
async fn test_join_rejected_by_hub_cleans_up() {
    let fx = RoomFixture::new();
    let channel = fx.queue_channel(join_reply("me", "participant", &[]));
    channel.reject("room.join", error_codes::ROOM_FULL, "Room is full");

    let err = fx
        .session
        .connect_to_room("room-1", "Me")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Signaling { code, .. } if code == error_codes::ROOM_FULL));

    let state = fx.session.state();
    assert_eq!(state.status, RoomStatus::Disconnected);
    assert!(state.local_stream.is_none());
    assert_eq!(channel.disconnect_count(), 1);
    assert_eq!(fx.devices.live_track_count(), 0);
}

#[tokio::test]
async fn test_rejoin_leaves_previous_room() {
    let (fx, first) = RoomFixture::joined("host", "host", TRIO).await;
    fx.session.start_call().await.unwrap();
    assert_eq!(fx.factory.open_count(), 2);

    let second = fx.queue_channel(join_reply("me", "participant", &[("q1", "Quinn")]));
    fx.session.connect_to_room("room-2", "Me").await.unwrap();

    assert_eq!(first.requests_for("room.leave").len(), 1);
    assert_eq!(first.disconnect_count(), 1);
    assert_eq!(fx.factory.open_count(), 0);

    let state = fx.session.state();
    assert_eq!(state.room_id.as_deref(), Some("room-2"));
    assert!(!state.is_host);
    assert_eq!(
        state.participants.keys().cloned().collect::<Vec<_>>(),
        vec![peer("q1")]
    );
    assert_eq!(second.requests_for("room.join").len(), 1);
    // Only the current room's stream is live
    assert_eq!(fx.devices.live_track_count(), 2);
}

// ============================================================================
// Mesh negotiation
// ============================================================================

#[tokio::test]
async fn test_start_call_offers_to_every_other_participant() {
    let (fx, channel) = RoomFixture::joined("host", "host", TRIO).await;

    let offered = fx.session.start_call().await.unwrap();
    assert_eq!(offered, 2);

    let offers = channel.wait_for("signal.offer", 2).await;
    assert_eq!(offers.len(), 2);
    assert_eq!(
        offer_targets(&offers),
        ["p1", "p2"].iter().map(|s| s.to_string()).collect()
    );
    assert_eq!(fx.factory.created_count(), 2);
    assert_eq!(fx.session.state().status, RoomStatus::Active);

    // A second round does not renegotiate existing connections
    assert_eq!(fx.session.start_call().await.unwrap(), 0);
    assert_eq!(fx.factory.created_count(), 2);
}

#[tokio::test]
async fn test_candidates_wait_for_the_answer() {
    let (fx, channel) = RoomFixture::joined("host", "host", TRIO).await;
    fx.session.start_call().await.unwrap();

    let first = IceCandidate::new("candidate:1 1 udp 1 10.0.0.2 5000 typ host");
    let second = IceCandidate::new("candidate:2 1 udp 1 10.0.0.2 5001 typ host");
    channel.push(HubEvent::IceCandidateReceived {
        from: peer("p2"),
        candidate: first.clone(),
    });
    channel.push(HubEvent::IceCandidateReceived {
        from: peer("p2"),
        candidate: second.clone(),
    });
    channel.push(HubEvent::AnswerReceived {
        from: peer("p2"),
        sdp: "answer-from-p2".to_string(),
    });

    let connection = fx.factory.connection(&peer("p2")).unwrap();
    eventually("queued candidates to flush", || {
        connection.applied_candidates().len() == 2
    })
    .await;
    assert_eq!(connection.applied_candidates(), vec![first, second]);

    let ops = connection.ops();
    let remote_at = ops
        .iter()
        .position(|op| matches!(op, FakeOp::SetRemote(_)))
        .unwrap();
    let first_candidate_at = ops
        .iter()
        .position(|op| matches!(op, FakeOp::AddCandidate(_)))
        .unwrap();
    assert!(remote_at < first_candidate_at);
}

#[tokio::test]
async fn test_user_left_discards_queued_candidates() {
    let (fx, channel) = RoomFixture::joined("host", "host", TRIO).await;
    fx.session.start_call().await.unwrap();
    let mut notices = fx.session.notices();

    channel.push(HubEvent::IceCandidateReceived {
        from: peer("p1"),
        candidate: IceCandidate::new("candidate:9 1 udp 1 10.0.0.3 5000 typ host"),
    });
    channel.push(HubEvent::UserLeft { peer_id: peer("p1") });

    assert_eq!(
        notices.recv().await.unwrap(),
        RoomNotice::ParticipantLeft { peer_id: peer("p1") }
    );
    let connection = fx.factory.connection(&peer("p1")).unwrap();
    assert!(connection.is_closed());
    assert!(connection.applied_candidates().is_empty());

    let state = fx.session.state();
    assert!(!state.participants.contains_key(&peer("p1")));
    assert!(state.participants.contains_key(&peer("p2")));
}

#[tokio::test]
async fn test_user_left_never_shows_a_closed_connection() {
    let (fx, channel) = RoomFixture::joined("host", "host", TRIO).await;
    fx.session.start_call().await.unwrap();
    channel.push(HubEvent::AnswerReceived {
        from: peer("p1"),
        sdp: "answer-from-p1".to_string(),
    });
    let connection = fx.factory.connection(&peer("p1")).unwrap();
    let remote = MediaStream::new(vec![MediaTrack::new(TrackKind::Video, "p1 cam", None)]);
    connection.emit_remote_stream(remote);
    eventually("remote stream", || {
        fx.session.state().participants[&peer("p1")]
            .remote_stream
            .is_some()
    })
    .await;

    let mut snapshots = fx.session.subscribe();
    snapshots.borrow_and_update();
    channel.push(HubEvent::UserLeft { peer_id: peer("p1") });

    loop {
        snapshots.changed().await.unwrap();
        let state = snapshots.borrow_and_update().clone();
        match state.participants.get(&peer("p1")) {
            Some(_) => assert!(!connection.is_closed(), "participant rendered after close"),
            None => break,
        }
    }
    eventually("connection close", || connection.is_closed()).await;
}

#[tokio::test]
async fn test_offer_from_new_joiner_is_answered() {
    let (fx, channel) = RoomFixture::joined("host", "host", TRIO).await;
    let mut notices = fx.session.notices();

    channel.push(HubEvent::UserJoined {
        peer_id: peer("p3"),
        display_name: "Pat".to_string(),
        role: ParticipantRole::Participant,
    });
    assert_eq!(
        notices.recv().await.unwrap(),
        RoomNotice::ParticipantJoined {
            peer_id: peer("p3"),
            display_name: "Pat".to_string()
        }
    );

    channel.push(HubEvent::OfferReceived {
        from: peer("p3"),
        sdp: "offer-from-p3".to_string(),
    });
    let answers = channel.wait_for("signal.answer", 1).await;
    assert_eq!(
        answers,
        vec![HubRequest::SendAnswer {
            to: peer("p3"),
            sdp: "answer:p3".to_string()
        }]
    );
    let state = fx.session.state();
    assert_eq!(state.status, RoomStatus::Active);
    assert_eq!(state.participants[&peer("p3")].display_name, "Pat");
}

#[tokio::test]
async fn test_offer_from_unknown_peer_adds_placeholder() {
    let (fx, channel) = RoomFixture::joined("host", "host", TRIO).await;

    channel.push(HubEvent::OfferReceived {
        from: peer("ghost"),
        sdp: "offer-from-ghost".to_string(),
    });
    channel.wait_for("signal.answer", 1).await;

    let state = fx.session.state();
    assert_eq!(state.participants.len(), 3);
    assert_eq!(state.participants[&peer("ghost")].display_name, "ghost");
}

#[tokio::test]
async fn test_glare_smaller_id_keeps_its_offer() {
    let (fx, channel) = RoomFixture::joined("host", "host", TRIO).await;
    fx.session.start_call().await.unwrap();

    channel.push(HubEvent::OfferReceived {
        from: peer("p1"),
        sdp: "offer-from-p1".to_string(),
    });
    channel.push(HubEvent::HandChanged {
        peer_id: peer("p2"),
        raised: true,
    });
    eventually("later event", || {
        fx.session.state().participants[&peer("p2")].is_hand_raised
    })
    .await;

    assert!(channel.requests_for("signal.answer").is_empty());
    assert_eq!(fx.factory.created_count(), 2);
    let connection = fx.factory.connection(&peer("p1")).unwrap();
    assert!(!connection.is_closed());
    assert!(connection.remote_descriptions().is_empty());
}

#[tokio::test]
async fn test_glare_larger_id_answers_instead() {
    let (fx, channel) = RoomFixture::joined("zed", "host", TRIO).await;
    fx.session.start_call().await.unwrap();
    let ours = fx.factory.connection(&peer("p1")).unwrap();

    channel.push(HubEvent::OfferReceived {
        from: peer("p1"),
        sdp: "offer-from-p1".to_string(),
    });
    let answers = channel.wait_for("signal.answer", 1).await;
    assert_eq!(answers.len(), 1);

    assert!(ours.is_closed());
    assert_eq!(fx.factory.created_count(), 3);
    let theirs = fx.factory.connection(&peer("p1")).unwrap();
    assert!(!theirs.is_closed());
    assert_eq!(theirs.remote_descriptions().len(), 1);
}

#[tokio::test]
async fn test_rejected_answer_drops_participant() {
    let fx = RoomFixture::new();
    fx.factory.fail_remote_description_for(&peer("p1"));
    let channel = fx.queue_channel(join_reply("host", "host", TRIO));
    fx.session.connect_to_room("room-1", "Host").await.unwrap();
    fx.session.start_call().await.unwrap();
    let mut notices = fx.session.notices();

    channel.push(HubEvent::AnswerReceived {
        from: peer("p1"),
        sdp: "garbled".to_string(),
    });

    assert!(matches!(
        notices.recv().await.unwrap(),
        RoomNotice::PeerFailed { peer_id, .. } if peer_id == peer("p1")
    ));
    let state = fx.session.state();
    assert!(!state.participants.contains_key(&peer("p1")));
    assert!(state.participants.contains_key(&peer("p2")));
    assert_eq!(fx.factory.open_count(), 1);
}

#[tokio::test]
async fn test_failed_connection_is_marked_and_closed() {
    let (fx, channel) = RoomFixture::joined("host", "host", TRIO).await;
    fx.session.start_call().await.unwrap();
    channel.push(HubEvent::AnswerReceived {
        from: peer("p1"),
        sdp: "answer-from-p1".to_string(),
    });

    let connection = fx.factory.connection(&peer("p1")).unwrap();
    connection.emit_state(ConnectionState::Connected);
    eventually("connected", || {
        fx.session.state().participants[&peer("p1")].connection == Some(ConnectionState::Connected)
    })
    .await;

    connection.emit_state(ConnectionState::Failed);
    eventually("failed", || {
        fx.session.state().participants[&peer("p1")].connection == Some(ConnectionState::Failed)
    })
    .await;
    eventually("closed", || connection.is_closed()).await;
    assert!(fx.session.state().participants[&peer("p1")]
        .remote_stream
        .is_none());
}

#[tokio::test]
async fn test_local_candidates_are_sent_to_their_peer() {
    let (fx, channel) = RoomFixture::joined("host", "host", TRIO).await;
    fx.session.start_call().await.unwrap();

    fx.factory
        .connection(&peer("p2"))
        .unwrap()
        .emit_local_candidate(IceCandidate::new("candidate:3 1 udp 1 10.0.0.1 6000 typ host"));

    let sent = channel.wait_for("signal.ice_candidate", 1).await;
    assert!(matches!(
        &sent[0],
        HubRequest::SendIceCandidate { to, .. } if to == &peer("p2")
    ));
}

// ============================================================================
// Room controls
// ============================================================================

#[tokio::test]
async fn test_media_and_hand_toggles_are_published() {
    let (fx, channel) = RoomFixture::joined("host", "host", TRIO).await;

    assert_eq!(fx.session.toggle_mic().await, Some(false));
    let published = channel.wait_for("room.media_state", 1).await;
    assert_eq!(
        published,
        vec![HubRequest::MediaState {
            room_id: "room-1".to_string(),
            is_muted: true,
            is_camera_off: false,
        }]
    );
    assert!(!fx.session.state().mic_enabled);

    assert_eq!(fx.session.toggle_hand().await, Some(true));
    let raised = channel.wait_for("room.raise_hand", 1).await;
    assert_eq!(
        raised,
        vec![HubRequest::RaiseHand {
            room_id: "room-1".to_string(),
            raised: true
        }]
    );
    assert!(fx.session.state().hand_raised);
}

#[tokio::test]
async fn test_participant_flags_follow_hub() {
    let (fx, channel) = RoomFixture::joined("host", "host", TRIO).await;

    channel.push(HubEvent::ParticipantMediaChanged {
        peer_id: peer("p2"),
        is_muted: true,
        is_camera_off: true,
    });
    channel.push(HubEvent::RoleAssigned {
        peer_id: peer("p2"),
        role: ParticipantRole::Host,
    });
    eventually("p2 promoted", || {
        fx.session.state().participants[&peer("p2")].role == ParticipantRole::Host
    })
    .await;

    let p2 = fx.session.state().participants[&peer("p2")].clone();
    assert!(p2.is_muted);
    assert!(p2.is_camera_off);
}

#[tokio::test]
async fn test_role_assignment_promotes_self() {
    let (fx, channel) = RoomFixture::joined("me", "participant", TRIO).await;
    assert!(!fx.session.state().is_host);
    let mut notices = fx.session.notices();

    channel.push(HubEvent::RoleAssigned {
        peer_id: peer("me"),
        role: ParticipantRole::Host,
    });
    assert_eq!(
        notices.recv().await.unwrap(),
        RoomNotice::RoleChanged { is_host: true }
    );
    assert!(fx.session.state().is_host);
}

#[tokio::test]
async fn test_only_host_can_end_room() {
    let (fx, channel) = RoomFixture::joined("me", "participant", TRIO).await;

    let err = fx.session.end_room().await.unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));
    assert!(channel.requests_for("room.end").is_empty());
    assert!(fx.session.state().status.is_joined());
}

#[tokio::test]
async fn test_host_ends_room() {
    let (fx, channel) = RoomFixture::joined("host", "host", TRIO).await;
    fx.session.start_call().await.unwrap();

    fx.session.end_room().await.unwrap();

    assert_eq!(channel.requests_for("room.end").len(), 1);
    let state = fx.session.state();
    assert_eq!(state.status, RoomStatus::Ended);
    assert!(state.participants.is_empty());
    assert_eq!(fx.factory.open_count(), 0);
    assert_eq!(fx.devices.live_track_count(), 0);
}

#[tokio::test]
async fn test_view_toggles_do_not_touch_the_hub() {
    let (fx, channel) = RoomFixture::joined("host", "host", TRIO).await;
    let before = channel.requests().len();

    fx.session.toggle_view_mode();
    fx.session.toggle_chat();
    fx.session.toggle_participants();

    let state = fx.session.state();
    assert!(state.show_chat && state.show_participants);
    assert_eq!(channel.requests().len(), before);
}

// ============================================================================
// Leaving and ending
// ============================================================================

#[tokio::test]
async fn test_disconnect_releases_everything() {
    let (fx, channel) = RoomFixture::joined("host", "host", TRIO).await;
    fx.session.start_call().await.unwrap();
    assert!(fx.devices.live_track_count() > 0);

    fx.session.disconnect_from_room().await;

    let state = fx.session.state();
    assert_eq!(state.status, RoomStatus::Left);
    assert!(state.local_stream.is_none());
    assert!(state.participants.is_empty());
    assert_eq!(fx.devices.live_track_count(), 0);
    assert_eq!(fx.factory.open_count(), 0);
    assert_eq!(
        channel.requests_for("room.leave"),
        vec![HubRequest::LeaveRoom {
            room_id: "room-1".to_string()
        }]
    );
    assert_eq!(channel.disconnect_count(), 1);

    // Idempotent
    fx.session.disconnect_from_room().await;
    assert_eq!(channel.disconnect_count(), 1);
}

#[tokio::test]
async fn test_dropping_session_leaves_room() {
    let (fx, channel) = RoomFixture::joined("host", "host", TRIO).await;
    fx.session.start_call().await.unwrap();
    assert_eq!(fx.factory.open_count(), 2);

    let RoomFixture {
        session,
        factory,
        devices,
        ..
    } = fx;
    drop(session);

    // Tracks stop before the drop returns
    assert_eq!(devices.live_track_count(), 0);

    eventually("connections to close", || factory.open_count() == 0).await;
    eventually("channel to close", || channel.disconnect_count() == 1).await;
    assert_eq!(channel.requests_for("room.leave").len(), 1);
}

#[tokio::test]
async fn test_room_ended_by_hub() {
    let (fx, channel) = RoomFixture::joined("me", "participant", TRIO).await;
    fx.session.start_call().await.unwrap();
    let mut notices = fx.session.notices();

    channel.push(HubEvent::RoomEnded {
        reason: Some("Host closed the room".to_string()),
    });
    assert_eq!(
        notices.recv().await.unwrap(),
        RoomNotice::RoomEnded {
            reason: Some("Host closed the room".to_string())
        }
    );

    let state = fx.session.state();
    assert_eq!(state.status, RoomStatus::Ended);
    assert_eq!(state.end_reason.as_deref(), Some("Host closed the room"));
    assert_eq!(fx.factory.open_count(), 0);
    assert_eq!(fx.devices.live_track_count(), 0);
    assert!(channel.requests_for("room.leave").is_empty());
}

#[tokio::test]
async fn test_signaling_blip_keeps_mesh() {
    let (fx, channel) = RoomFixture::joined("host", "host", TRIO).await;
    fx.session.start_call().await.unwrap();

    channel.drop_connection();
    eventually("degraded signaling", || {
        fx.session.state().signaling == SignalingHealth::Reconnecting
    })
    .await;
    assert_eq!(fx.factory.open_count(), 2);
    assert!(matches!(
        fx.session.start_call().await,
        Err(Error::NotConnected(_))
    ));

    channel.restore();
    eventually("restored signaling", || {
        fx.session.state().signaling == SignalingHealth::Online
    })
    .await;
    assert_eq!(fx.session.state().status, RoomStatus::Active);
    assert_eq!(fx.factory.open_count(), 2);
}

#[tokio::test]
async fn test_signaling_loss_ends_room() {
    let (fx, channel) = RoomFixture::joined("host", "host", TRIO).await;
    fx.session.start_call().await.unwrap();

    channel.close("retries exhausted");
    eventually("room end", || fx.session.state().status == RoomStatus::Ended).await;

    let state = fx.session.state();
    assert!(state.end_reason.unwrap().contains("retries exhausted"));
    assert_eq!(fx.factory.open_count(), 0);
    assert_eq!(fx.devices.live_track_count(), 0);
}
