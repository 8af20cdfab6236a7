use blink_core::PacketKind;

use crate::*;

/// A radio that keeps refusing the burst frame costs the item, not the engine.
#[tokio::test(start_paused = true)]
async fn test_bounded_retry_reports_failure() {
    let air = Air::new();
    let mut ana = air.device("ana", Gender::Female).await;
    let mut ben = air.device("ben", Gender::Male).await;

    ana.radio.fail_next(3);
    ana.engine.send_chat(ben.hash, "lost").await.unwrap();

    let failed = ana
        .wait_for(secs(3), |e| matches!(e, Event::SendFailed { .. }))
        .await;
    assert_eq!(
        failed,
        Some(Event::SendFailed {
            kind: PacketKind::Chat,
            target: ben.hash
        })
    );

    let events = ben.collect(secs(5)).await;
    assert!(chats_in(&events).is_empty());
    assert!(ana.radio.on_air().is_some(), "presence resumed");

    // the engine carries on
    ana.engine.send_chat(ben.hash, "found").await.unwrap();
    let events = ben.collect(secs(5)).await;
    assert_eq!(chats_in(&events), vec![(ana.hash, "found".to_string())]);
    ana.assert_no_overlap();
}

/// Fewer refusals than the attempt limit still deliver.
#[tokio::test(start_paused = true)]
async fn test_transient_refusal_is_retried() {
    let air = Air::new();
    let mut ana = air.device("ana", Gender::Female).await;
    let mut ben = air.device("ben", Gender::Male).await;

    ana.radio.fail_next(2);
    ana.engine.send_chat(ben.hash, "eventually").await.unwrap();

    let events = ben.collect(secs(5)).await;
    assert_eq!(chats_in(&events), vec![(ana.hash, "eventually".to_string())]);

    let failures = ana.collect(secs(1)).await;
    assert!(!failures
        .iter()
        .any(|e| matches!(e, Event::SendFailed { .. })));
}

/// Going invisible mid-burst lets the burst finish but skips the resume.
#[tokio::test(start_paused = true)]
async fn test_visibility_cancels_resume() {
    let air = Air::new();
    let ana = air.device("ana", Gender::Female).await;
    let mut ben = air.device("ben", Gender::Male).await;

    ana.engine.send_chat(ben.hash, "bye").await.unwrap();
    ana.engine.set_visibility(false).unwrap();

    ben.wait_for(secs(2), |e| matches!(e, Event::ChatReceived { .. }))
        .await
        .expect("burst still delivered");

    time::sleep(secs(3)).await;
    assert!(ana.radio.on_air().is_none());

    // the health check does not undo an explicit hide
    time::sleep(secs(12)).await;
    assert!(ana.radio.on_air().is_none());

    ana.engine.set_visibility(true).unwrap();
    time::sleep(Duration::from_millis(10)).await;
    assert!(ana.radio.on_air().is_some());
    ana.assert_no_overlap();
}

/// Both sides bursting at once never double-book either slot.
#[tokio::test(start_paused = true)]
async fn test_busy_queues_keep_slot_exclusive() {
    let air = Air::new();
    let mut ana = air.device("ana", Gender::Female).await;
    let mut ben = air.device("ben", Gender::Male).await;

    for i in 0..4 {
        ana.engine.send_chat(ben.hash, format!("a{i}")).await.unwrap();
        ben.engine.send_chat(ana.hash, format!("b{i}")).await.unwrap();
    }
    ana.engine.send_match_request(ben.hash).await.unwrap();
    ana.engine.set_visibility(false).unwrap();
    ana.engine.set_visibility(true).unwrap();

    let (ana_events, ben_events) = tokio::join!(ana.collect(secs(40)), ben.collect(secs(40)));

    let to_ana: Vec<String> = chats_in(&ana_events).into_iter().map(|(_, t)| t).collect();
    let to_ben: Vec<String> = chats_in(&ben_events).into_iter().map(|(_, t)| t).collect();
    assert_eq!(to_ana, vec!["b0", "b1", "b2", "b3"]);
    assert_eq!(to_ben, vec!["a0", "a1", "a2", "a3"]);
    assert!(ben_events
        .iter()
        .any(|e| matches!(e, Event::MatchRequested { .. })));

    ana.assert_no_overlap();
    ben.assert_no_overlap();
}
