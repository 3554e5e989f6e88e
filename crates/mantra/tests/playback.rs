//! Playback-driven behavior: initial buffer, growth and eviction, and
//! affirmation timing.

mod common;

use common::{track, track_with_affirmations, CountingStore, GatedMusic, Harness};
use mantra::{SessionError, SessionEvent, StartOptions};
use std::sync::Arc;
use std::time::Duration;

fn play_affirmation_count(events: &[SessionEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, SessionEvent::PlayAffirmation { .. }))
        .count()
}

#[tokio::test]
async fn test_initial_batch_covers_track_duration() {
    let mut h = Harness::new();
    let started = h
        .service
        .start_session(
            "alice",
            track(300.0),
            StartOptions {
                buffer_size: Some(3),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(started.total_duration, 300.0);

    let (count, _) = h.wait_for_startup(&started.id).await;
    assert_eq!(count, 3);

    let snapshot = h.service.get_session(&started.id).await.unwrap();
    assert_eq!(snapshot.segments.len(), 3);

    let offsets: Vec<f64> = snapshot.segments.iter().map(|s| s.start_offset).collect();
    assert_eq!(offsets, vec![0.0, 100.0, 200.0]);
    let last = snapshot.segments.last().unwrap();
    assert!(last.end_offset() >= 300.0);

    for (i, segment) in snapshot.segments.iter().enumerate() {
        assert_eq!(segment.index, i as u64);
        assert!(segment.duration > 0.0);
        assert_eq!(
            segment.prompt,
            "meditation background music, calm, warm, seamless, no vocals"
        );
        let handle = h
            .service
            .get_segment_handle(&started.id, segment.index)
            .await
            .unwrap();
        assert_eq!(handle, segment.handle);
        assert!(h.store.len() > 0);
    }
}

#[tokio::test]
async fn test_affirmation_fires_on_interval_boundaries() {
    let mut h = Harness::new();
    let started = h
        .service
        .start_session(
            "alice",
            track_with_affirmations(600.0, &["I am calm", "I am here"]),
            StartOptions {
                affirmation_interval: Some(30.0),
                ..Default::default()
            },
        )
        .unwrap();
    let (_, pool) = h.wait_for_startup(&started.id).await;
    assert_eq!(pool, 2);
    h.drain_events();

    let id = &started.id;
    let at_29 = h.service.update_position(id, 29.0).await.unwrap();
    assert!(at_29.affirmation.is_none());
    assert_eq!(play_affirmation_count(&h.drain_events()), 0);

    let at_30 = h.service.update_position(id, 30.0).await.unwrap();
    assert!(at_30.affirmation.is_some());
    assert_eq!(play_affirmation_count(&h.drain_events()), 1);

    let at_59 = h.service.update_position(id, 59.0).await.unwrap();
    assert!(at_59.affirmation.is_none());
    assert_eq!(play_affirmation_count(&h.drain_events()), 0);

    let at_60 = h.service.update_position(id, 60.0).await.unwrap();
    let fired = at_60.affirmation.expect("affirmation at 60s");
    let events = h.drain_events();
    assert_eq!(play_affirmation_count(&events), 1);

    // The event and the handle lookup agree.
    let (event_handle, text) = events
        .iter()
        .find_map(|e| match e {
            SessionEvent::PlayAffirmation {
                affirmation_id,
                handle,
                text,
                ..
            } if affirmation_id == &fired => Some((handle.clone(), text.clone())),
            _ => None,
        })
        .unwrap();
    assert!(text == "I am calm" || text == "I am here");
    let handle = h.service.get_affirmation_handle(id, &fired).await.unwrap();
    assert_eq!(handle, event_handle);

    let snapshot = h.service.get_session(id).await.unwrap();
    assert_eq!(snapshot.last_affirmation_time, 60.0);
}

#[tokio::test]
async fn test_backward_seek_restarts_affirmation_clock() {
    let mut h = Harness::new();
    let started = h
        .service
        .start_session(
            "alice",
            track_with_affirmations(600.0, &["I am enough"]),
            StartOptions {
                affirmation_interval: Some(30.0),
                ..Default::default()
            },
        )
        .unwrap();
    h.wait_for_startup(&started.id).await;
    let id = &started.id;

    assert!(h.service.update_position(id, 90.0).await.unwrap().affirmation.is_some());
    assert!(h.service.update_position(id, 40.0).await.unwrap().affirmation.is_none());

    let snapshot = h.service.get_session(id).await.unwrap();
    assert_eq!(snapshot.last_affirmation_time, 40.0);
    assert!(snapshot.last_affirmation_time <= snapshot.current_position);

    assert!(h.service.update_position(id, 69.0).await.unwrap().affirmation.is_none());
    assert!(h.service.update_position(id, 70.0).await.unwrap().affirmation.is_some());
}

#[tokio::test]
async fn test_empty_affirmation_pool_never_fires() {
    let mut h = Harness::new();
    let started = h
        .service
        .start_session("alice", track(300.0), StartOptions::default())
        .unwrap();
    let (_, pool) = h.wait_for_startup(&started.id).await;
    assert_eq!(pool, 0);

    for position in [30.0, 60.0, 120.0] {
        let update = h.service.update_position(&started.id, position).await.unwrap();
        assert!(update.affirmation.is_none());
    }
    assert_eq!(play_affirmation_count(&h.drain_events()), 0);
}

#[tokio::test]
async fn test_buffer_stays_bounded_over_long_playback() {
    let mut h = Harness::new();
    let started = h
        .service
        .start_session(
            "alice",
            track(60.0),
            StartOptions {
                buffer_size: Some(2),
                segment_duration: Some(20.0),
                ..Default::default()
            },
        )
        .unwrap();
    h.wait_for_startup(&started.id).await;
    let id = started.id.clone();

    let mut appended = 0;
    let mut position = 0.0;
    while position <= 1_000.0 {
        let update = h.service.update_position(&id, position).await.unwrap();
        if update.generation_requested {
            let event = h
                .wait_for(&id, |e| {
                    matches!(
                        e,
                        SessionEvent::NewSegmentReady { .. } | SessionEvent::GenerationError { .. }
                    )
                })
                .await;
            assert!(matches!(event, SessionEvent::NewSegmentReady { .. }));
            appended += 1;
        }

        let snapshot = h.service.get_session(&id).await.unwrap();
        assert!(
            snapshot.segments.len() <= snapshot.buffer_size + 2,
            "{} segments buffered at {}s",
            snapshot.segments.len(),
            position
        );
        assert!(!snapshot.generation_in_flight);
        position += 5.0;
    }

    assert!(appended > 40, "only {} segments appended", appended);

    let snapshot = h.service.get_session(&id).await.unwrap();
    let first = snapshot.segments.first().unwrap();
    assert!(first.index > 0, "played segments were never evicted");
    // Offsets stay cumulative across the 30s initial segments and 20s follow-ups.
    assert_eq!(first.start_offset, 60.0 + (first.index as f64 - 2.0) * 20.0);

    // Evicted indices are gone; their storage is released exactly once.
    let err = h.service.get_segment_handle(&id, 0).await.unwrap_err();
    assert!(matches!(err, SessionError::SegmentNotFound { index: 0, .. }));
    assert_eq!(h.store.max_release_count(), 1);
}

#[tokio::test]
async fn test_segment_lookup_out_of_range() {
    let mut h = Harness::new();
    let started = h
        .service
        .start_session("alice", track(300.0), StartOptions::default())
        .unwrap();
    h.wait_for_startup(&started.id).await;

    let err = h
        .service
        .get_segment_handle(&started.id, 99)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        SessionError::SegmentNotFound {
            session_id: started.id.clone(),
            index: 99
        }
    );
}

#[tokio::test]
async fn test_growth_is_single_flight() {
    let store = Arc::new(CountingStore::new());
    let music = Arc::new(GatedMusic::new(store.clone()));
    let mut h = Harness::with_music(store.clone(), music.clone());
    music.open(3);

    let started = h
        .service
        .start_session("alice", track(300.0), StartOptions::default())
        .unwrap();
    h.wait_for_startup(&started.id).await;
    let id = started.id.clone();
    assert_eq!(music.started(), 3);

    // 75s is within look-ahead of the first segment's end at 100s.
    assert!(h.service.update_position(&id, 75.0).await.unwrap().generation_requested);
    tokio::time::timeout(Duration::from_secs(5), async {
        while music.started() < 4 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    for position in [80.0, 90.0, 95.0] {
        let update = h.service.update_position(&id, position).await.unwrap();
        assert!(!update.generation_requested, "second request at {}s", position);
    }
    tokio::task::yield_now().await;
    assert_eq!(music.started(), 4);
    assert!(h.service.get_session(&id).await.unwrap().generation_in_flight);

    music.open(1);
    let event = h
        .wait_for(&id, |e| matches!(e, SessionEvent::NewSegmentReady { .. }))
        .await;
    assert!(matches!(event, SessionEvent::NewSegmentReady { index: 3, .. }));
    assert!(!h.wait_until_idle(&id).await.generation_in_flight);
}

#[tokio::test]
async fn test_seek_back_during_generation_keeps_buffer_bounded() {
    let store = Arc::new(CountingStore::new());
    let music = Arc::new(GatedMusic::new(store.clone()));
    let mut h = Harness::with_music(store.clone(), music.clone());
    music.open(2);

    let started = h
        .service
        .start_session(
            "alice",
            track(60.0),
            StartOptions {
                buffer_size: Some(2),
                segment_duration: Some(20.0),
                ..Default::default()
            },
        )
        .unwrap();
    h.wait_for_startup(&started.id).await;
    let id = started.id.clone();

    // Two 30s segments, then one 20s segment appended at 0s and another at 30s.
    for position in [0.0, 30.0] {
        let update = h.service.update_position(&id, position).await.unwrap();
        assert!(update.generation_requested);
        music.open(1);
        h.wait_for(&id, |e| matches!(e, SessionEvent::NewSegmentReady { .. }))
            .await;
    }

    // A fifth segment is requested at 60s; seek back to the start before it lands.
    assert!(h.service.update_position(&id, 60.0).await.unwrap().generation_requested);
    let seek = h.service.update_position(&id, 0.0).await.unwrap();
    assert_eq!(seek.current_segment_index, 0);
    music.open(1);

    let snapshot = h.wait_until_idle(&id).await;
    assert_eq!(music.started(), 5);
    assert!(snapshot.segments.len() <= snapshot.buffer_size + 2);
    assert_eq!(snapshot.segments.len(), 4);
    assert!(h.service.get_segment_handle(&id, 4).await.is_err());

    // The discarded segment's audio is gone; nothing was released twice.
    assert_eq!(store.len(), 4);
    assert_eq!(store.max_release_count(), 1);
    let events = h.drain_events();
    assert!(!events
        .iter()
        .any(|e| matches!(e, SessionEvent::NewSegmentReady { index: 4, .. })));
}
