//! Session protocol scenarios exercised directly against application state.

mod common;

use common::{TestApp, hex_ref};
use corkboard_core::{BlobRecord, BlobRef, Bucket, Key, now_ms};
use corkboard_server::Disposition;
use corkboard_server::protocol::{AckBody, Outbound};
use corkboard_server::session::Session;
use tokio::sync::mpsc::UnboundedReceiver;

/// Send one frame and return the ack body it produced, skipping any
/// `changed` events queued ahead of it by other sessions' writes.
async fn request(
    session: &mut Session,
    rx: &mut UnboundedReceiver<Outbound>,
    frame: &str,
) -> AckBody {
    let disposition = session.handle_frame(frame).await;
    assert_eq!(disposition, Disposition::Continue, "frame: {frame}");
    loop {
        match rx.try_recv().expect("expected an ack") {
            Outbound::Ack { body, .. } => return body,
            Outbound::Event { .. } => {}
        }
    }
}

fn assert_set_ok(body: &AckBody, want_version: u64) {
    match body {
        AckBody::Set {
            success: true,
            version,
            data: None,
        } => assert_eq!(*version, want_version),
        other => panic!("expected successful set, got {other:?}"),
    }
}

#[tokio::test]
async fn cold_create_writes_sharded_record() {
    let app = TestApp::new().await;
    let (mut session, mut rx) = app.session("b1");
    let r = hex_ref("aa");

    let body = request(
        &mut session,
        &mut rx,
        &format!(r#"{{"id":1,"action":"ref","ref":"{r}"}}"#),
    )
    .await;
    assert_eq!(body, AckBody::Ref { success: true });

    let before = now_ms();
    let body = request(
        &mut session,
        &mut rx,
        r#"{"id":2,"action":"set","data":"AAAA"}"#,
    )
    .await;
    assert_set_ok(&body, 1);

    let path = app
        .state
        .store
        .root()
        .join("b1")
        .join("aa")
        .join(format!("{r}.json"));
    assert!(path.is_file(), "missing record at {}", path.display());

    let record: BlobRecord =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(record.data, "AAAA");
    assert_eq!(record.version, 1);
    assert!(record.created >= before && record.created <= now_ms());
    assert!(record.updated.is_none());
}

#[tokio::test]
async fn stale_writer_gets_current_record_back() {
    let app = TestApp::new().await;
    let r = hex_ref("bb");

    let (mut a, mut rx_a) = app.session("b1");
    let (mut b, mut rx_b) = app.session("b1");
    let ref_frame = format!(r#"{{"id":1,"action":"ref","ref":"{r}"}}"#);
    request(&mut a, &mut rx_a, &ref_frame).await;
    request(&mut b, &mut rx_b, &ref_frame).await;

    // A seeds version 1; both clients now believe version is 1.
    let body = request(&mut a, &mut rx_a, r#"{"id":2,"action":"set","data":"djE="}"#).await;
    assert_set_ok(&body, 1);

    // A wins the race to version 2.
    let body = request(
        &mut a,
        &mut rx_a,
        r#"{"id":3,"action":"set","data":"WA==","version":1}"#,
    )
    .await;
    assert_set_ok(&body, 2);

    // B still holds version 1: its write is refused and it learns the
    // current record.
    let body = request(
        &mut b,
        &mut rx_b,
        r#"{"id":4,"action":"set","data":"WQ==","version":1}"#,
    )
    .await;
    assert_eq!(
        body,
        AckBody::Set {
            success: false,
            version: 2,
            data: Some("WA==".to_string()),
        }
    );

    // Stored state is unchanged by the refused write.
    let key = Key::new(Bucket::parse("b1").unwrap(), BlobRef::parse(&r).unwrap());
    let stored = app.state.store.read(&key).await.unwrap().unwrap();
    assert_eq!(stored.data, "WA==");
    assert_eq!(stored.version, 2);

    // And no changed event reached A for it.
    assert!(rx_a.try_recv().is_err());
}

#[tokio::test]
async fn set_without_request_version_conflicts_with_existing_blob() {
    let app = TestApp::new().await;
    let r = hex_ref("cc");
    let (mut session, mut rx) = app.session("b1");
    request(
        &mut session,
        &mut rx,
        &format!(r#"{{"id":1,"action":"ref","ref":"{r}"}}"#),
    )
    .await;

    request(&mut session, &mut rx, r#"{"id":2,"action":"set","data":"djE="}"#).await;

    // Omitting the version is only valid for the initial write.
    let body = request(&mut session, &mut rx, r#"{"id":3,"action":"set","data":"djI="}"#).await;
    assert_eq!(
        body,
        AckBody::Set {
            success: false,
            version: 1,
            data: Some("djE=".to_string()),
        }
    );
}

#[tokio::test]
async fn changed_fans_out_to_peers_only() {
    let app = TestApp::new().await;
    let r = hex_ref("dd");

    let (mut a, mut rx_a) = app.session("b1");
    let (mut b, mut rx_b) = app.session("b1");
    let (mut c, mut rx_c) = app.session("b1");
    let ref_frame = format!(r#"{{"id":1,"action":"ref","ref":"{r}"}}"#);
    request(&mut a, &mut rx_a, &ref_frame).await;
    request(&mut b, &mut rx_b, &ref_frame).await;
    request(&mut c, &mut rx_c, &ref_frame).await;

    let body = request(&mut a, &mut rx_a, r#"{"id":2,"action":"set","data":"QUFBQQ=="}"#).await;
    assert_set_ok(&body, 1);

    assert_eq!(rx_b.try_recv().unwrap(), Outbound::changed());
    assert!(rx_b.try_recv().is_err(), "B got more than one event");
    assert_eq!(rx_c.try_recv().unwrap(), Outbound::changed());
    assert!(rx_c.try_recv().is_err(), "C got more than one event");
    assert!(rx_a.try_recv().is_err(), "writer received its own event");
}

#[tokio::test]
async fn fanout_is_scoped_to_the_bucket() {
    let app = TestApp::new().await;
    let r = hex_ref("ee");

    let (mut a, mut rx_a) = app.session("b1");
    let (mut other, mut rx_other) = app.session("b2");
    let ref_frame = format!(r#"{{"id":1,"action":"ref","ref":"{r}"}}"#);
    request(&mut a, &mut rx_a, &ref_frame).await;
    request(&mut other, &mut rx_other, &ref_frame).await;

    request(&mut a, &mut rx_a, r#"{"id":2,"action":"set","data":"QUFBQQ=="}"#).await;

    // Same reference, different bucket: no event crosses tenants.
    assert!(rx_other.try_recv().is_err());
}

#[tokio::test]
async fn known_version_shortcut() {
    let app = TestApp::new().await;
    let r = hex_ref("ab");

    let (mut a, mut rx_a) = app.session("b1");
    let (mut b, mut rx_b) = app.session("b1");
    let ref_frame = format!(r#"{{"id":1,"action":"ref","ref":"{r}"}}"#);
    request(&mut a, &mut rx_a, &ref_frame).await;
    request(&mut b, &mut rx_b, &ref_frame).await;

    request(&mut a, &mut rx_a, r#"{"id":2,"action":"set","data":"djE="}"#).await;

    // A already holds version 1: payload is skipped.
    let body = request(&mut a, &mut rx_a, r#"{"id":3,"action":"get","known":1}"#).await;
    assert_eq!(
        body,
        AckBody::Get {
            data: None,
            version: Some(1),
        }
    );

    // B updates to version 2.
    request(
        &mut b,
        &mut rx_b,
        r#"{"id":4,"action":"set","data":"djI=","version":1}"#,
    )
    .await;

    // A's hint is stale now, so the payload comes through.
    let body = request(&mut a, &mut rx_a, r#"{"id":5,"action":"get","known":1}"#).await;
    assert_eq!(
        body,
        AckBody::Get {
            data: Some("djI=".to_string()),
            version: Some(2),
        }
    );
}

#[tokio::test]
async fn get_on_absent_blob_returns_the_absent_marker() {
    let app = TestApp::new().await;
    let (mut session, mut rx) = app.session("b1");
    request(
        &mut session,
        &mut rx,
        &format!(r#"{{"id":1,"action":"ref","ref":"{}"}}"#, hex_ref("ba")),
    )
    .await;

    let body = request(&mut session, &mut rx, r#"{"id":2,"action":"get"}"#).await;
    assert_eq!(
        body,
        AckBody::Get {
            data: None,
            version: None,
        }
    );
}

#[tokio::test]
async fn get_and_set_require_a_reference() {
    let app = TestApp::new().await;
    let (mut session, mut rx) = app.session("b1");

    for frame in [
        r#"{"id":1,"action":"get"}"#,
        r#"{"id":2,"action":"set","data":"QUFBQQ=="}"#,
    ] {
        let body = request(&mut session, &mut rx, frame).await;
        assert_eq!(
            body,
            AckBody::Error {
                error: "Reference is not provided".to_string(),
            }
        );
    }
}

#[tokio::test]
async fn validation_failures_are_acked_not_fatal() {
    let app = TestApp::new().await;
    let (mut session, mut rx) = app.session("b1");
    request(
        &mut session,
        &mut rx,
        &format!(r#"{{"id":1,"action":"ref","ref":"{}"}}"#, hex_ref("be")),
    )
    .await;

    // Oversized payload.
    let oversized = "A".repeat(corkboard_core::MAX_DATA_TEXT_LEN + 4);
    let body = request(
        &mut session,
        &mut rx,
        &format!(r#"{{"id":2,"action":"set","data":"{oversized}"}}"#),
    )
    .await;
    assert!(matches!(body, AckBody::Error { .. }));

    // Not base64.
    let body = request(
        &mut session,
        &mut rx,
        r#"{"id":3,"action":"set","data":"!!! not base64 !!!"}"#,
    )
    .await;
    assert!(matches!(body, AckBody::Error { .. }));

    // Zero version.
    let body = request(
        &mut session,
        &mut rx,
        r#"{"id":4,"action":"set","data":"QUFBQQ==","version":0}"#,
    )
    .await;
    assert!(matches!(body, AckBody::Error { .. }));

    // The session survived all of it.
    let body = request(&mut session, &mut rx, r#"{"id":5,"action":"set","data":"QUFBQQ=="}"#).await;
    assert_set_ok(&body, 1);
}

#[tokio::test]
async fn payload_at_the_wire_bound_is_accepted() {
    let app = TestApp::new().await;
    let (mut session, mut rx) = app.session("b1");
    request(
        &mut session,
        &mut rx,
        &format!(r#"{{"id":1,"action":"ref","ref":"{}"}}"#, hex_ref("bf")),
    )
    .await;

    let exact = "A".repeat(corkboard_core::MAX_DATA_TEXT_LEN);
    let body = request(
        &mut session,
        &mut rx,
        &format!(r#"{{"id":2,"action":"set","data":"{exact}"}}"#),
    )
    .await;
    assert_set_ok(&body, 1);
}

#[tokio::test]
async fn failed_ref_leaves_prior_subscription_intact() {
    let app = TestApp::new().await;
    let r = hex_ref("cd");
    let (mut session, mut rx) = app.session("b1");
    request(
        &mut session,
        &mut rx,
        &format!(r#"{{"id":1,"action":"ref","ref":"{r}"}}"#),
    )
    .await;

    // 63 hex chars: validation error, no transition.
    let short = &r[..63];
    let body = request(
        &mut session,
        &mut rx,
        &format!(r#"{{"id":2,"action":"ref","ref":"{short}"}}"#),
    )
    .await;
    assert!(matches!(body, AckBody::Error { .. }));

    let key = Key::new(Bucket::parse("b1").unwrap(), BlobRef::parse(&r).unwrap());
    assert_eq!(app.state.subscriptions.subscriber_count(&key), 1);

    // Writes still land on the original reference.
    let body = request(&mut session, &mut rx, r#"{"id":3,"action":"set","data":"QQ=="}"#).await;
    assert_set_ok(&body, 1);
}

#[tokio::test]
async fn mixed_case_ref_is_normalized_onto_one_key() {
    let app = TestApp::new().await;
    let lower = hex_ref("fa");
    let upper = lower.to_ascii_uppercase();

    let (mut a, mut rx_a) = app.session("b1");
    let (mut b, mut rx_b) = app.session("b1");
    request(
        &mut a,
        &mut rx_a,
        &format!(r#"{{"id":1,"action":"ref","ref":"{upper}"}}"#),
    )
    .await;
    request(
        &mut b,
        &mut rx_b,
        &format!(r#"{{"id":1,"action":"ref","ref":"{lower}"}}"#),
    )
    .await;

    request(&mut a, &mut rx_a, r#"{"id":2,"action":"set","data":"QQ=="}"#).await;
    assert_eq!(rx_b.try_recv().unwrap(), Outbound::changed());
}

#[tokio::test]
async fn ref_none_detaches() {
    let app = TestApp::new().await;
    let r = hex_ref("da");
    let (mut session, mut rx) = app.session("b1");
    request(
        &mut session,
        &mut rx,
        &format!(r#"{{"id":1,"action":"ref","ref":"{r}"}}"#),
    )
    .await;

    let body = request(&mut session, &mut rx, r#"{"id":2,"action":"ref","ref":"none"}"#).await;
    assert_eq!(body, AckBody::Ref { success: true });

    let key = Key::new(Bucket::parse("b1").unwrap(), BlobRef::parse(&r).unwrap());
    assert_eq!(app.state.subscriptions.subscriber_count(&key), 0);

    let body = request(&mut session, &mut rx, r#"{"id":3,"action":"get"}"#).await;
    assert_eq!(
        body,
        AckBody::Error {
            error: "Reference is not provided".to_string(),
        }
    );
}

#[tokio::test]
async fn switching_refs_moves_the_subscription() {
    let app = TestApp::new().await;
    let first = hex_ref("a1");
    let second = hex_ref("a2");
    let (mut session, mut rx) = app.session("b1");

    request(
        &mut session,
        &mut rx,
        &format!(r#"{{"id":1,"action":"ref","ref":"{first}"}}"#),
    )
    .await;
    request(
        &mut session,
        &mut rx,
        &format!(r#"{{"id":2,"action":"ref","ref":"{second}"}}"#),
    )
    .await;

    let bucket = Bucket::parse("b1").unwrap();
    let first_key = Key::new(bucket.clone(), BlobRef::parse(&first).unwrap());
    let second_key = Key::new(bucket, BlobRef::parse(&second).unwrap());
    assert_eq!(app.state.subscriptions.subscriber_count(&first_key), 0);
    assert_eq!(app.state.subscriptions.subscriber_count(&second_key), 1);
}

#[tokio::test]
async fn missing_ack_id_closes_the_connection() {
    let app = TestApp::new().await;
    let (mut session, mut rx) = app.session("b1");

    let disposition = session.handle_frame(r#"{"action":"now"}"#).await;
    assert!(matches!(disposition, Disposition::Close(_)));
    assert!(rx.try_recv().is_err(), "no ack may be sent");
}

#[tokio::test]
async fn now_reports_wall_clock_ms() {
    let app = TestApp::new().await;
    let (mut session, mut rx) = app.session("b1");

    let before = now_ms();
    let body = request(&mut session, &mut rx, r#"{"id":1,"action":"now"}"#).await;
    match body {
        AckBody::Now { timestamp } => {
            assert!(timestamp >= before && timestamp <= now_ms());
        }
        other => panic!("expected now ack, got {other:?}"),
    }
}

#[tokio::test]
async fn disconnect_unsubscribes_and_closes() {
    let app = TestApp::new().await;
    let r = hex_ref("ce");

    let (mut a, mut rx_a) = app.session("b1");
    let (mut b, mut rx_b) = app.session("b1");
    let ref_frame = format!(r#"{{"id":1,"action":"ref","ref":"{r}"}}"#);
    request(&mut a, &mut rx_a, &ref_frame).await;
    request(&mut b, &mut rx_b, &ref_frame).await;

    let disposition = b
        .handle_frame(r#"{"action":"disconnect","reason":"done"}"#)
        .await;
    match disposition {
        Disposition::Close(reason) => assert_eq!(reason, "done"),
        other => panic!("expected close, got {other:?}"),
    }
    b.disconnect("done");

    // B is gone from the registry; A's write reaches nobody.
    request(&mut a, &mut rx_a, r#"{"id":2,"action":"set","data":"QQ=="}"#).await;
    assert!(rx_b.try_recv().is_err());
}

#[tokio::test]
async fn version_numbers_are_gapless() {
    let app = TestApp::new().await;
    let r = hex_ref("ad");
    let (mut session, mut rx) = app.session("b1");
    request(
        &mut session,
        &mut rx,
        &format!(r#"{{"id":1,"action":"ref","ref":"{r}"}}"#),
    )
    .await;

    let body = request(&mut session, &mut rx, r#"{"id":2,"action":"set","data":"QQ=="}"#).await;
    assert_set_ok(&body, 1);

    let key = Key::new(Bucket::parse("b1").unwrap(), BlobRef::parse(&r).unwrap());
    let created = app.state.store.read(&key).await.unwrap().unwrap().created;

    for expect in 2..=5u64 {
        let frame = format!(
            r#"{{"id":{expect},"action":"set","data":"QQ==","version":{}}}"#,
            expect - 1
        );
        let body = request(&mut session, &mut rx, &frame).await;
        assert_set_ok(&body, expect);
    }

    // `created` survived every update.
    let stored = app.state.store.read(&key).await.unwrap().unwrap();
    assert_eq!(stored.version, 5);
    assert_eq!(stored.created, created);
    assert!(stored.updated.is_some());
}
