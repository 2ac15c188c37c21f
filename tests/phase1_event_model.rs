mod common;

use std::sync::Arc;

use serde_json::json;
use tda_analytics::{kinds, ManualConnectivity, Session};

use common::{ManualClock, NoFrames, RecordingBulk};

#[tokio::test]
async fn test_timestamp_is_taken_at_track_time_not_send_time() {
    common::init_tracing();
    let bulk = RecordingBulk::new();
    let clock = ManualClock::new(10_000);
    let connectivity = Arc::new(ManualConnectivity::new(false));
    let session = Session::builder(common::test_config())
        .bulk(bulk.clone())
        .clock(clock.clone())
        .connectivity(connectivity.clone())
        .frame_clock(Arc::new(NoFrames))
        .push_connector(common::unreachable_push())
        .start()
        .unwrap();

    // 1. Tracked while offline at t=10s
    session.track("checkpoint", Some(json!({ "id": 3 })));

    // 2. Delivered a minute later
    clock.advance(60_000);
    connectivity.set_online(true);
    common::settle().await;
    session.wait_idle().await;

    let event = bulk.delivered().pop().expect("Event delivered after reconnect");
    assert_eq!(event.timestamp, 10_000);
    assert_eq!(event.game_id, "game-42");
    assert_eq!(event.session_id, session.session_id());
    assert_eq!(event.data, json!({ "id": 3 }));
}

#[tokio::test]
async fn test_every_event_carries_the_same_identity() {
    let bulk = RecordingBulk::new();
    let session = Session::builder(common::test_config())
        .bulk(bulk.clone())
        .frame_clock(Arc::new(NoFrames))
        .push_connector(common::unreachable_push())
        .start()
        .unwrap();

    session.track("a", None);
    session.log_error("E", "d");
    session.track_task_start("t");
    session.stop();
    session.wait_idle().await;

    let events = bulk.delivered();
    assert_eq!(events.len(), 4);
    assert!(events
        .iter()
        .all(|e| e.game_id == "game-42" && e.session_id == session.session_id()));
    assert!(events.iter().any(|e| e.kind == kinds::SESSION_END));
    assert!(events.iter().filter(|e| e.kind == "a").all(|e| e.data == json!({})));
}

#[tokio::test]
async fn test_separate_sessions_get_distinct_ids() {
    let a = Session::builder(common::test_config())
        .bulk(RecordingBulk::new())
        .frame_clock(Arc::new(NoFrames))
        .push_connector(common::unreachable_push())
        .start()
        .unwrap();
    let b = Session::builder(common::test_config())
        .bulk(RecordingBulk::new())
        .frame_clock(Arc::new(NoFrames))
        .push_connector(common::unreachable_push())
        .start()
        .unwrap();

    assert_ne!(a.session_id(), b.session_id());
}
