//! Signaling dispatcher driven frame-by-frame over the loopback engine
//!
//! Run with: cargo test -p parley-api --test signaling_flow

use axum::response::IntoResponse;
use parley_api::signaling::ServerMessage;
use parley_api::{PeerHub, SignalingDispatcher};
use parley_sfu::{ConnectionId, LoopbackEngine, SessionCoordinator, SfuConfig};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

struct Peer {
    id: ConnectionId,
    rx: UnboundedReceiver<ServerMessage>,
}

impl Peer {
    fn next(&mut self) -> Value {
        serde_json::to_value(self.rx.try_recv().expect("expected a queued message")).unwrap()
    }

    fn is_idle(&mut self) -> bool {
        self.rx.try_recv().is_err()
    }
}

fn dispatcher() -> SignalingDispatcher {
    let config = SfuConfig::default();
    let engine = Arc::new(LoopbackEngine::new(&config));
    SignalingDispatcher::new(Arc::new(SessionCoordinator::new(engine, config)), PeerHub::new())
}

fn join(dispatcher: &SignalingDispatcher, name: &str) -> Peer {
    let id = ConnectionId::from(name);
    let rx = dispatcher.connect(&id).unwrap();
    Peer { id, rx }
}

async fn request(dispatcher: &SignalingDispatcher, peer: &mut Peer, frame: Value) -> Value {
    dispatcher.handle_text(&peer.id, &frame.to_string()).await;
    peer.next()
}

fn opus_parameters() -> Value {
    json!({
        "codecs": [{ "mimeType": "audio/opus", "payloadType": 100, "clockRate": 48000, "channels": 2 }],
        "encodings": [{ "ssrc": 1234 }]
    })
}

async fn publish_audio(dispatcher: &SignalingDispatcher, peer: &mut Peer) -> String {
    let transport = request(dispatcher, peer, json!({ "id": 1, "event": "createTransport", "data": { "type": "send" } })).await;
    let transport_id = transport["data"]["id"].as_str().unwrap().to_string();

    let produced = request(
        dispatcher,
        peer,
        json!({
            "id": 2,
            "event": "produce",
            "data": { "kind": "audio", "rtpParameters": opus_parameters(), "transportId": transport_id, "source": "mic" }
        }),
    )
    .await;
    assert_eq!(produced["ok"], true);
    produced["data"]["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_publish_subscribe_and_leave() {
    let dispatcher = dispatcher();
    let mut alice = join(&dispatcher, "alice");
    let mut bob = join(&dispatcher, "bob");

    let capabilities = request(&dispatcher, &mut alice, json!({ "id": 1, "event": "getRouterRtpCapabilities" })).await;
    assert_eq!(capabilities["ok"], true);
    assert_eq!(capabilities["data"]["codecs"][0]["mimeType"], "audio/opus");

    let transport = request(&dispatcher, &mut alice, json!({ "id": 2, "event": "createTransport", "data": { "type": "send" } })).await;
    let transport_id = transport["data"]["id"].as_str().unwrap().to_string();
    assert!(transport["data"]["iceParameters"].is_object());
    assert!(transport["data"]["dtlsParameters"].is_object());

    let connected = request(
        &dispatcher,
        &mut alice,
        json!({
            "id": 3,
            "event": "connectTransport",
            "data": { "transportId": transport_id, "dtlsParameters": { "role": "client", "fingerprints": [] } }
        }),
    )
    .await;
    assert_eq!(connected, json!({ "id": 3, "ok": true, "data": null }));

    let produced = request(
        &dispatcher,
        &mut alice,
        json!({ "id": 4, "event": "produce", "data": { "kind": "audio", "rtpParameters": opus_parameters(), "source": "mic" } }),
    )
    .await;
    let producer_id = produced["data"]["id"].as_str().unwrap().to_string();

    let announced = bob.next();
    assert_eq!(announced["event"], "newProducer");
    assert_eq!(announced["data"]["producerId"], producer_id.as_str());
    assert_eq!(announced["data"]["source"], "mic");
    assert_eq!(announced["data"]["socketId"], "alice");
    assert!(alice.is_idle());

    let listed = request(&dispatcher, &mut bob, json!({ "id": 10, "event": "getProducers", "data": {} })).await;
    assert_eq!(listed["data"].as_array().unwrap().len(), 1);
    assert_eq!(listed["data"][0]["producerId"], producer_id.as_str());

    request(&dispatcher, &mut bob, json!({ "id": 11, "event": "createTransport", "data": { "type": "recv" } })).await;
    let consumed = request(
        &dispatcher,
        &mut bob,
        json!({
            "id": 12,
            "event": "consume",
            "data": {
                "producerId": producer_id,
                "rtpCapabilities": { "codecs": [{ "kind": "audio", "mimeType": "audio/opus", "clockRate": 48000 }] }
            }
        }),
    )
    .await;
    assert_eq!(consumed["ok"], true);
    assert_eq!(consumed["data"]["producerId"], producer_id.as_str());
    assert_eq!(consumed["data"]["kind"], "audio");
    assert_eq!(consumed["data"]["paused"], true);
    let consumer_id = consumed["data"]["id"].as_str().unwrap().to_string();

    let resumed = request(
        &dispatcher,
        &mut bob,
        json!({ "id": 13, "event": "resumeConsumer", "data": { "consumerId": consumer_id } }),
    )
    .await;
    assert_eq!(resumed["ok"], true);

    let report = dispatcher.disconnect(&alice.id).await;
    assert_eq!(report.producers_closed, 1);
    assert_eq!(report.consumers_closed, 1);

    let closed = bob.next();
    assert_eq!(closed, json!({ "event": "producerClosed", "data": { "producerId": producer_id } }));

    let listed = request(&dispatcher, &mut bob, json!({ "id": 14, "event": "getProducers" })).await;
    assert_eq!(listed["data"], json!([]));
}

#[tokio::test]
async fn test_incompatible_consume_is_soft_failure() {
    let dispatcher = dispatcher();
    let mut alice = join(&dispatcher, "alice");
    let mut bob = join(&dispatcher, "bob");
    let producer_id = publish_audio(&dispatcher, &mut alice).await;
    bob.next();

    request(&dispatcher, &mut bob, json!({ "id": 1, "event": "createTransport", "data": { "type": "recv" } })).await;
    let consumed = request(
        &dispatcher,
        &mut bob,
        json!({
            "id": 2,
            "event": "consume",
            "data": {
                "producerId": producer_id,
                "rtpCapabilities": { "codecs": [{ "kind": "video", "mimeType": "video/VP8" }] }
            }
        }),
    )
    .await;

    assert_eq!(consumed, json!({ "id": 2, "ok": true, "data": { "error": "Cannot consume" } }));
    assert_eq!(dispatcher.coordinator().stats().consumers, 0);
}

#[tokio::test]
async fn test_error_responses_carry_codes() {
    let dispatcher = dispatcher();
    let mut alice = join(&dispatcher, "alice");

    let missing = request(
        &dispatcher,
        &mut alice,
        json!({ "id": 1, "event": "connectTransport", "data": { "transportId": "nope", "dtlsParameters": {} } }),
    )
    .await;
    assert_eq!(missing["ok"], false);
    assert_eq!(missing["error"]["code"], "TRANSPORT_NOT_FOUND");

    let unknown_producer = request(
        &dispatcher,
        &mut alice,
        json!({ "id": 2, "event": "consume", "data": { "producerId": "ghost", "rtpCapabilities": {} } }),
    )
    .await;
    assert_eq!(unknown_producer["error"]["code"], "PRODUCER_NOT_FOUND");

    let malformed = request(&dispatcher, &mut alice, json!({ "id": 3, "event": "produce", "data": { "kind": "smell" } })).await;
    assert_eq!(malformed["error"]["code"], "BAD_REQUEST");

    let unknown = request(&dispatcher, &mut alice, json!({ "id": 4, "event": "teleport" })).await;
    assert_eq!(unknown["error"]["code"], "UNKNOWN_EVENT");

    // Without an id nothing is sent back
    dispatcher.handle_text(&alice.id, r#"{"event":"teleport"}"#).await;
    dispatcher.handle_text(&alice.id, "not json at all").await;
    assert!(alice.is_idle());
}

#[tokio::test]
async fn test_chat_reaction_and_focus_relays() {
    let dispatcher = dispatcher();
    let mut alice = join(&dispatcher, "alice");
    let mut bob = join(&dispatcher, "bob");

    dispatcher
        .handle_text(&alice.id, &json!({ "event": "sendMessage", "data": { "content": "hi" } }).to_string())
        .await;
    for peer in [&mut alice, &mut bob] {
        let message = peer.next();
        assert_eq!(message["event"], "newMessage");
        assert_eq!(message["data"]["content"], "hi");
        assert_eq!(message["data"]["name"], "Unknown User");
        assert_eq!(message["data"]["senderSocketId"], "alice");
    }

    let reaction = json!({ "emoji": "🔥", "senderName": "Bob" });
    dispatcher
        .handle_text(&bob.id, &json!({ "event": "sendReaction", "data": reaction }).to_string())
        .await;
    for peer in [&mut alice, &mut bob] {
        assert_eq!(peer.next(), json!({ "event": "newReaction", "data": reaction }));
    }

    dispatcher
        .handle_text(
            &bob.id,
            &json!({ "event": "focusModeChange", "data": { "playerId": "p-7", "isInFocusMode": true } }).to_string(),
        )
        .await;
    for peer in [&mut alice, &mut bob] {
        assert_eq!(
            peer.next(),
            json!({
                "event": "playerFocusModeChanged",
                "data": { "playerId": "p-7", "isInFocusMode": true, "socketId": "bob" }
            })
        );
    }

    request(&dispatcher, &mut alice, json!({ "id": 1, "event": "setPeerInfo", "data": { "name": "Alice" } })).await;
    let peers = request(&dispatcher, &mut alice, json!({ "id": 2, "event": "getPeers" })).await;
    let peers = peers["data"].as_array().unwrap();
    assert_eq!(peers.len(), 2);
    assert_eq!(peers[0]["name"], "Alice");
    assert_eq!(peers[0]["isInFocusMode"], false);
    assert_eq!(peers[1]["socketId"], "bob");
    assert_eq!(peers[1]["isInFocusMode"], true);
}

#[tokio::test]
async fn test_peer_producer_closed_is_relayed_to_others() {
    let dispatcher = dispatcher();
    let mut alice = join(&dispatcher, "alice");
    let mut bob = join(&dispatcher, "bob");

    let data = json!({ "producerId": "p-screen", "source": "screen" });
    dispatcher
        .handle_text(&alice.id, &json!({ "event": "producerClosed", "data": data }).to_string())
        .await;

    assert_eq!(bob.next(), json!({ "event": "producerClosed", "data": data }));
    assert!(alice.is_idle());
}

#[tokio::test]
async fn test_disconnect_all_and_duplicate_connect() {
    let dispatcher = dispatcher();
    let alice = join(&dispatcher, "alice");
    let _bob = join(&dispatcher, "bob");

    assert!(dispatcher.connect(&alice.id).is_err());

    dispatcher.disconnect_all().await;
    assert_eq!(dispatcher.coordinator().stats().connections, 0);
    assert!(dispatcher.hub().is_empty());
}

#[tokio::test]
async fn test_health_check() {
    let response = parley_api::http::health_check().await.into_response();
    assert_eq!(response.status(), axum::http::StatusCode::OK);
}
