use blink_services::store::MatchState;
use blink_services::MatchStore;

use crate::*;

/// Request, accept, and both sides end up matched with each other's gender.
#[tokio::test(start_paused = true)]
async fn test_match_handshake() {
    let air = Air::new();
    let mut ana = air.device("ana", Gender::Female).await;
    let mut ben = air.device("ben", Gender::Male).await;

    ana.engine.send_match_request(ben.hash).await.unwrap();

    let request = ben
        .wait_for(secs(3), |e| matches!(e, Event::MatchRequested { .. }))
        .await;
    assert_eq!(
        request,
        Some(Event::MatchRequested {
            from: ana.hash,
            gender: Gender::Female
        })
    );
    assert_eq!(
        ben.matches.state(&ana.hash),
        Some(MatchState::Pending(Gender::Female))
    );

    ben.engine.respond_to_match(ana.hash, true).await.unwrap();
    assert_eq!(
        ben.matches.state(&ana.hash),
        Some(MatchState::Matched(Gender::Female))
    );

    let accepted = ana
        .wait_for(secs(3), |e| matches!(e, Event::MatchAccepted { .. }))
        .await;
    assert_eq!(
        accepted,
        Some(Event::MatchAccepted {
            from: ben.hash,
            gender: Gender::Male
        })
    );
    assert_eq!(
        ana.matches.state(&ben.hash),
        Some(MatchState::Matched(Gender::Male))
    );

    // the rest of ana's 15 s request burst is absorbed by the cooldown
    let later = ben.collect(secs(20)).await;
    assert!(!later
        .iter()
        .any(|e| matches!(e, Event::MatchRequested { .. })));

    ana.assert_no_overlap();
    ben.assert_no_overlap();
}

#[tokio::test(start_paused = true)]
async fn test_match_reject() {
    let air = Air::new();
    let mut ana = air.device("ana", Gender::Female).await;
    let mut ben = air.device("ben", Gender::Male).await;

    ana.engine.send_match_request(ben.hash).await.unwrap();
    ben.wait_for(secs(3), |e| matches!(e, Event::MatchRequested { .. }))
        .await
        .expect("request delivered");

    ben.engine.respond_to_match(ana.hash, false).await.unwrap();
    assert_eq!(ben.matches.state(&ana.hash), None);

    let rejected = ana
        .wait_for(secs(3), |e| matches!(e, Event::MatchRejected { .. }))
        .await;
    assert_eq!(rejected, Some(Event::MatchRejected { from: ben.hash }));
}

/// A second request to the same peer inside a minute is refused locally.
#[tokio::test(start_paused = true)]
async fn test_outbound_request_cooldown() {
    let air = Air::new();
    let ana = air.device("ana", Gender::Female).await;
    let ben = air.device("ben", Gender::Male).await;

    ana.engine.send_match_request(ben.hash).await.unwrap();
    let again = ana.engine.send_match_request(ben.hash).await;
    assert!(matches!(
        again,
        Err(blinkd::EngineError::CooldownActive { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_unmatch() {
    let air = Air::new();
    let ana = air.device("ana", Gender::Female).await;
    let mut ben = air.device("ben", Gender::Male).await;
    ana.matches.finalize_match(ben.hash, Gender::Male);
    ben.matches.finalize_match(ana.hash, Gender::Female);

    ana.engine.send_unmatch(ben.hash).await.unwrap();
    assert_eq!(ana.matches.state(&ben.hash), None);

    let event = ben
        .wait_for(secs(3), |e| matches!(e, Event::Unmatched { .. }))
        .await;
    assert_eq!(event, Some(Event::Unmatched { from: ana.hash }));
    assert_eq!(ben.matches.state(&ana.hash), None);
}

/// After ben blocks ana, nothing ana sends reaches ben.
#[tokio::test(start_paused = true)]
async fn test_block_silences_peer() {
    let air = Air::new();
    let mut ana = air.device("ana", Gender::Female).await;
    let mut ben = air.device("ben", Gender::Male).await;
    ana.matches.finalize_match(ben.hash, Gender::Male);
    ben.matches.finalize_match(ana.hash, Gender::Female);

    ben.engine.send_block(ana.hash).await.unwrap();
    assert!(ben.matches.is_blocked(&ana.hash));

    let event = ana
        .wait_for(secs(3), |e| matches!(e, Event::Blocked { .. }))
        .await;
    assert_eq!(event, Some(Event::Blocked { from: ben.hash }));
    assert_eq!(ana.matches.state(&ben.hash), None);

    ana.engine.send_chat(ben.hash, "still there?").await.unwrap();
    let events = ben.collect(secs(6)).await;
    assert!(chats_in(&events).is_empty());
    assert_eq!(ben.chats.count(&ana.hash), 0);
}
