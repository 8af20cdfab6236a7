use blink_services::MatchStore;

use crate::*;

/// "hello" from A to B arrives exactly once despite ~20 observations of the
/// chat frame.
#[tokio::test(start_paused = true)]
async fn test_chat_delivered_exactly_once() {
    let air = Air::new();
    let ana = air.device("ana", Gender::Female).await;
    let mut ben = air.device("ben", Gender::Male).await;

    ana.engine.send_chat(ben.hash, "hello").await.unwrap();

    let events = ben.collect(secs(10)).await;
    assert_eq!(chats_in(&events), vec![(ana.hash, "hello".to_string())]);

    let history = ben.chats.history(&ana.hash);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].text, "hello");
    assert_eq!(ana.chats.history(&ben.hash).len(), 1);

    ana.assert_no_overlap();
    ben.assert_no_overlap();
}

/// A chat spanning several frames is reassembled intact.
#[tokio::test(start_paused = true)]
async fn test_multi_chunk_chat() {
    let air = Air::new();
    let ana = air.device("ana", Gender::Female).await;
    let mut ben = air.device("ben", Gender::Male).await;

    let text = "meet me by the fountain at seven, bring the map";
    assert!(text.len() > 33);
    ana.engine.send_chat(ben.hash, text).await.unwrap();

    let events = ben.collect(secs(15)).await;
    assert_eq!(chats_in(&events), vec![(ana.hash, text.to_string())]);
}

/// The longest chat the engine accepts still reassembles at the receiver;
/// one byte more is refused up front.
#[tokio::test(start_paused = true)]
async fn test_longest_chat_is_delivered() {
    let air = Air::new();
    let ana = air.device("ana", Gender::Female).await;
    let mut ben = air.device("ben", Gender::Male).await;

    let max = ProtocolConfig::default().max_chat_len();
    let too_long = ana.engine.send_chat(ben.hash, "y".repeat(max + 1)).await;
    assert!(matches!(
        too_long,
        Err(blinkd::EngineError::MessageTooLong { len, .. }) if len == max + 1
    ));

    let text = "x".repeat(max);
    ana.engine.send_chat(ben.hash, text.clone()).await.unwrap();

    let events = ben.collect(secs(60)).await;
    assert_eq!(chats_in(&events), vec![(ana.hash, text)]);
    ana.assert_no_overlap();
}

/// Queued chats go out in order.
#[tokio::test(start_paused = true)]
async fn test_chats_arrive_in_send_order() {
    let air = Air::new();
    let ana = air.device("ana", Gender::Female).await;
    let mut ben = air.device("ben", Gender::Male).await;

    for text in ["one", "two", "three"] {
        ana.engine.send_chat(ben.hash, text).await.unwrap();
    }

    let events = ben.collect(secs(15)).await;
    let texts: Vec<String> = chats_in(&events).into_iter().map(|(_, t)| t).collect();
    assert_eq!(texts, vec!["one", "two", "three"]);
    ana.assert_no_overlap();
}

/// A third device hears the chat frames but never surfaces them.
#[tokio::test(start_paused = true)]
async fn test_third_party_ignores_addressed_frames() {
    let air = Air::new();
    let ana = air.device("ana", Gender::Female).await;
    let ben = air.device("ben", Gender::Male).await;
    let mut cat = air.device("cat", Gender::Female).await;

    ana.engine.send_chat(ben.hash, "just for ben").await.unwrap();
    ana.engine.send_match_request(ben.hash).await.unwrap();

    let cat_events = cat.collect(secs(20)).await;
    assert!(chats_in(&cat_events).is_empty());
    assert!(!cat_events
        .iter()
        .any(|e| matches!(e, Event::MatchRequested { .. })));
    assert_eq!(cat.chats.count(&ana.hash), 0);
    assert!(cat.engine.peers().get(&ana.hash).is_some());

    assert_eq!(ben.chats.count(&ana.hash), 1);
    assert_eq!(ben.matches.pending_gender(&ana.hash), Some(Gender::Female));
}
