use crate::*;

/// Two visible devices learn about each other from presence alone.
#[tokio::test(start_paused = true)]
async fn test_devices_discover_each_other() {
    let air = Air::new();
    let mut ana = air.device("ana", Gender::Female).await;
    let mut ben = air.device("ben", Gender::Male).await;

    let seen = ana
        .wait_for(secs(2), |e| matches!(e, Event::PresenceUpdated { .. }))
        .await
        .expect("ana should see ben");
    match seen {
        Event::PresenceUpdated {
            peer,
            display_name,
            gender,
            signal_strength,
        } => {
            assert_eq!(peer, ben.hash);
            assert_eq!(display_name, "ben");
            assert_eq!(gender, Gender::Male);
            assert!(signal_strength.is_some());
        }
        other => panic!("unexpected event {other:?}"),
    }

    ben.wait_for(secs(2), |e| matches!(e, Event::PresenceUpdated { peer, .. } if *peer == ana.hash))
        .await
        .expect("ben should see ana");

    let record = ben.engine.peers().get(&ana.hash).expect("ana in ben's registry");
    assert_eq!(record.display_name, "ana");
    assert_eq!(ben.engine.peers().len(), 1);

    ana.assert_no_overlap();
    ben.assert_no_overlap();
}

/// Presence is reported once per dedup window, not once per observation.
#[tokio::test(start_paused = true)]
async fn test_presence_event_once_per_window() {
    let air = Air::new();
    let mut ana = air.device("ana", Gender::Female).await;
    let _ben = air.device("ben", Gender::Male).await;

    let events = ana.collect(secs(30)).await;
    let presence = events
        .iter()
        .filter(|e| matches!(e, Event::PresenceUpdated { .. }))
        .count();
    assert_eq!(presence, 1);
}

/// An invisible device hears others but is never heard.
#[tokio::test(start_paused = true)]
async fn test_invisible_device_is_not_discovered() {
    let air = Air::new();
    let hidden = ProtocolConfig {
        visible: false,
        ..ProtocolConfig::default()
    };
    let mut ghost = air.device_with("ghost", Gender::Unspecified, hidden).await;
    let mut ana = air.device("ana", Gender::Female).await;

    ghost
        .wait_for(secs(2), |e| matches!(e, Event::PresenceUpdated { peer, .. } if *peer == ana.hash))
        .await
        .expect("ghost still listens");

    let events = ana.collect(secs(12)).await;
    assert!(events.is_empty(), "ana heard something: {events:?}");
    assert!(ana.engine.peers().is_empty());
    assert!(ghost.radio.on_air().is_none());
}

/// A renamed device is re-advertised under its new name.
#[tokio::test(start_paused = true)]
async fn test_rename_reaches_neighbours() {
    let air = Air::new();
    let ana = air.device("ana", Gender::Female).await;
    let mut ben = air.device("ben", Gender::Male).await;

    let renamed = Identity::new(PeerHash::derive(b"ana-2"), "ana two", Gender::Female);
    ana.engine.set_identity(&renamed).await.unwrap();

    let seen = ben
        .wait_for(secs(2), |e| {
            matches!(e, Event::PresenceUpdated { peer, .. } if *peer == renamed.hash)
        })
        .await;
    assert!(matches!(
        seen,
        Some(Event::PresenceUpdated { display_name, .. }) if display_name == "ana two"
    ));
}

/// A new name under the same hash replaces the old one right away, not
/// after the duplicate window.
#[tokio::test(start_paused = true)]
async fn test_rename_keeping_hash_reaches_neighbours() {
    let air = Air::new();
    let ana = air.device("ana", Gender::Female).await;
    let mut ben = air.device("ben", Gender::Male).await;

    ben.wait_for(secs(2), |e| matches!(e, Event::PresenceUpdated { peer, .. } if *peer == ana.hash))
        .await
        .expect("ben sees ana");

    let renamed = Identity::new(ana.hash, "ana two", Gender::Female);
    ana.engine.set_identity(&renamed).await.unwrap();

    let seen = ben
        .wait_for(secs(2), |e| {
            matches!(e, Event::PresenceUpdated { peer, .. } if *peer == ana.hash)
        })
        .await;
    assert!(matches!(
        seen,
        Some(Event::PresenceUpdated { display_name, .. }) if display_name == "ana two"
    ));
    assert_eq!(
        ben.engine.peers().get(&ana.hash).unwrap().display_name,
        "ana two"
    );
}
