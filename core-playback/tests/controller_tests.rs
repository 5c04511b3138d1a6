mod common;

use bridge_traits::{DeviceEvent, DeviceState};
use common::{remote_track, remote_url, DeviceCommand, Harness, MemorySettingsStore};
use core_playback::{PlaybackStatus, Track, LAST_PLAYED_KEY};
use core_runtime::events::{CoreEvent, PlaybackEvent, QueueEvent};
use std::collections::HashSet;
use tokio::sync::broadcast;

fn drain(rx: &mut broadcast::Receiver<CoreEvent>) -> Vec<CoreEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn current_id(h: &Harness) -> Option<String> {
    h.engine.current_track().map(|t| t.id)
}

fn album(ids: &[&str]) -> Vec<Track> {
    ids.iter().map(|id| remote_track(id, 200.0)).collect()
}

#[tokio::test]
async fn test_sequential_queue_plays_through_and_stops_on_last_track() {
    let h = Harness::new();
    let queue = vec![remote_track("s1", 180.0), remote_track("s2", 200.0)];

    h.engine.play_collection(queue, 0).await;
    let state = h.engine.state();
    assert_eq!(state.status, PlaybackStatus::Playing);
    assert_eq!(state.current_track_id(), Some("s1"));
    assert_eq!(state.position_seconds, 0.0);
    assert_eq!(state.duration_seconds, 180.0);
    assert_eq!(
        h.device.commands(),
        vec![DeviceCommand::Load(remote_url("s1")), DeviceCommand::Play]
    );

    h.engine.next().await;
    let state = h.engine.state();
    assert_eq!(state.status, PlaybackStatus::Playing);
    assert_eq!(state.current_track_id(), Some("s2"));
    assert_eq!(state.position_seconds, 0.0);

    let mut rx = h.engine.subscribe();
    h.engine.next().await;
    let state = h.engine.state();
    assert_eq!(state.status, PlaybackStatus::Paused);
    assert_eq!(state.current_track_id(), Some("s2"));
    assert_eq!(state.position_seconds, 0.0);
    assert_eq!(h.engine.current_index(), Some(1));

    let events = drain(&mut rx);
    assert!(events.contains(&CoreEvent::Playback(PlaybackEvent::QueueEnded {
        track_id: "s2".to_string()
    })));
}

#[tokio::test]
async fn test_loop_wraps_to_first_track() {
    let h = Harness::new();
    h.engine.play_collection(album(&["a", "b"]), 1).await;
    h.engine.toggle_loop().await;

    h.engine.next().await;
    assert_eq!(current_id(&h).as_deref(), Some("a"));
    assert!(h.engine.is_playing());
}

#[tokio::test]
async fn test_next_after_idle_selection_advances() {
    let h = Harness::new();
    h.engine.set_queue(album(&["a", "b", "c"]), false).await;
    // set_queue selects the first track without playing it
    assert_eq!(h.engine.state().status, PlaybackStatus::Idle);

    h.engine.next().await;
    assert_eq!(current_id(&h).as_deref(), Some("b"));
    assert!(h.engine.is_playing());
}

#[tokio::test]
async fn test_start_index_is_clamped() {
    let h = Harness::new();
    h.engine.play_collection(album(&["a", "b", "c"]), 99).await;
    assert_eq!(h.engine.current_index(), Some(2));
    assert_eq!(current_id(&h).as_deref(), Some("c"));
}

#[tokio::test]
async fn test_empty_queue_commands_are_noops() {
    let h = Harness::new();
    h.engine.play_collection(Vec::new(), 0).await;
    h.engine.next().await;
    h.engine.previous().await;

    assert!(h.engine.current_track().is_none());
    assert_eq!(h.engine.state().status, PlaybackStatus::Idle);
    assert!(h.device.commands().is_empty());
}

#[tokio::test]
async fn test_previous_restarts_after_threshold() {
    let h = Harness::new();
    h.engine.play_collection(album(&["a", "b", "c"]), 1).await;
    h.device.clear();

    h.engine
        .handle_device_event(DeviceEvent::PositionChanged { position_seconds: 3.1 })
        .await;
    h.engine.previous().await;
    assert_eq!(current_id(&h).as_deref(), Some("b"));
    assert_eq!(h.engine.state().position_seconds, 0.0);
    assert_eq!(h.device.commands(), vec![DeviceCommand::Seek(0.0)]);

    h.engine
        .handle_device_event(DeviceEvent::PositionChanged { position_seconds: 2.9 })
        .await;
    h.engine.previous().await;
    assert_eq!(current_id(&h).as_deref(), Some("a"));
    assert!(h.engine.is_playing());
}

#[tokio::test]
async fn test_previous_on_first_track_wraps_to_last() {
    let h = Harness::new();
    h.engine.play_collection(album(&["a", "b", "c"]), 0).await;

    h.engine.previous().await;
    assert_eq!(current_id(&h).as_deref(), Some("c"));
}

#[tokio::test]
async fn test_shuffle_visits_every_track_once_per_pass() {
    let h = Harness::new();
    let ids = ["a", "b", "c", "d", "e", "f"];
    h.engine.toggle_shuffle().await;
    h.engine.play_collection(album(&ids), 2).await;

    let mut seen = vec![current_id(&h).unwrap()];
    for _ in 1..ids.len() {
        h.engine.next().await;
        seen.push(current_id(&h).unwrap());
    }
    let distinct: HashSet<_> = seen.iter().cloned().collect();
    assert_eq!(distinct.len(), ids.len(), "pass repeated a track: {seen:?}");
    assert!(h.engine.controller().shuffle_pool().is_empty());

    // Pass exhausted without loop
    let last = current_id(&h);
    h.engine.next().await;
    assert_eq!(current_id(&h), last);
    assert_eq!(h.engine.state().status, PlaybackStatus::Paused);
}

#[tokio::test]
async fn test_shuffle_with_loop_starts_a_new_pass() {
    let h = Harness::new();
    let ids = ["a", "b", "c", "d"];
    h.engine.toggle_shuffle().await;
    h.engine.toggle_loop().await;
    h.engine.play_collection(album(&ids), 0).await;

    for _ in 1..ids.len() {
        h.engine.next().await;
    }
    let end_of_pass = current_id(&h).unwrap();

    h.engine.next().await;
    assert!(h.engine.is_playing());
    let first_of_next = current_id(&h).unwrap();
    assert_ne!(first_of_next, end_of_pass);
    assert_eq!(h.engine.controller().shuffle_pool().len(), ids.len() - 2);
}

#[tokio::test]
async fn test_single_track_shuffle_loop_replays() {
    let h = Harness::new();
    h.engine.toggle_shuffle().await;
    h.engine.toggle_loop().await;
    h.engine.play_collection(album(&["only"]), 0).await;
    h.device.clear();

    h.engine.next().await;
    assert_eq!(current_id(&h).as_deref(), Some("only"));
    assert!(h.engine.is_playing());
    assert_eq!(
        h.device.commands(),
        vec![DeviceCommand::Load(remote_url("only")), DeviceCommand::Play]
    );
}

#[tokio::test]
async fn test_disabling_shuffle_discards_pool() {
    let h = Harness::new();
    h.engine.play_collection(album(&["a", "b", "c"]), 0).await;
    h.engine.toggle_shuffle().await;
    assert_eq!(h.engine.controller().shuffle_pool().len(), 2);

    h.engine.toggle_shuffle().await;
    assert!(h.engine.controller().shuffle_pool().is_empty());
    h.engine.next().await;
    assert_eq!(current_id(&h).as_deref(), Some("b"));
}

#[tokio::test]
async fn test_track_end_advances() {
    let h = Harness::new();
    h.engine.play_collection(album(&["a", "b"]), 0).await;

    h.engine.handle_device_event(DeviceEvent::TrackEnded).await;
    assert_eq!(current_id(&h).as_deref(), Some("b"));
    assert!(h.engine.is_playing());

    h.engine.handle_device_event(DeviceEvent::TrackEnded).await;
    assert_eq!(current_id(&h).as_deref(), Some("b"));
    assert_eq!(h.engine.state().status, PlaybackStatus::Paused);
}

#[tokio::test]
async fn test_track_end_settles_when_next_track_has_no_source() {
    let h = Harness::new();
    let mut silent = remote_track("b", 100.0);
    silent.remote_audio_ref = None;
    h.engine
        .play_collection(vec![remote_track("a", 200.0), silent], 0)
        .await;
    h.device.clear();

    h.engine.handle_device_event(DeviceEvent::TrackEnded).await;

    let state = h.engine.state();
    assert_eq!(state.status, PlaybackStatus::Paused);
    assert_eq!(state.current_track.map(|t| t.id).as_deref(), Some("a"));
    assert_eq!(state.position_seconds, 0.0);
    assert_eq!(
        h.device.commands(),
        vec![DeviceCommand::Pause, DeviceCommand::Seek(0.0)]
    );
}

#[tokio::test]
async fn test_play_track_toggles_current() {
    let h = Harness::new();
    let tracks = album(&["a", "b"]);
    h.engine.play_collection(tracks.clone(), 0).await;
    h.device.clear();

    h.engine.play_track(tracks[0].clone()).await;
    assert_eq!(h.engine.state().status, PlaybackStatus::Paused);

    h.engine.play_track(tracks[0].clone()).await;
    assert!(h.engine.is_playing());
    assert_eq!(h.device.commands(), vec![DeviceCommand::Pause, DeviceCommand::Play]);

    h.engine.play_track(tracks[1].clone()).await;
    assert_eq!(current_id(&h).as_deref(), Some("b"));
    assert_eq!(h.engine.current_index(), Some(1));
}

#[tokio::test]
async fn test_remote_track_outside_queue_is_rejected() {
    let h = Harness::new();
    h.engine.play_collection(album(&["a"]), 0).await;
    let before = h.engine.snapshot();
    let mut rx = h.engine.subscribe();

    h.engine.play_track(remote_track("stranger", 100.0)).await;

    assert_eq!(h.engine.snapshot(), before);
    let events = drain(&mut rx);
    assert!(matches!(
        events.as_slice(),
        [CoreEvent::Playback(PlaybackEvent::Error { track_id: Some(id), .. })] if id == "stranger"
    ));
}

#[tokio::test]
async fn test_local_track_outside_queue_is_appended() {
    let h = Harness::new();
    h.fs.add_file("/music/Artist - Local.mp3", b"ID3");
    h.engine.play_collection(album(&["a"]), 0).await;
    let mut rx = h.engine.subscribe();

    let local = Track::local("local-1", "Local", "Artist", 0.0, "/music/Artist - Local.mp3");
    h.engine.play_track(local).await;

    assert_eq!(h.engine.queue().len(), 2);
    assert_eq!(h.engine.current_index(), Some(1));
    let state = h.engine.state();
    assert!(state.source.as_ref().unwrap().is_local);
    assert_eq!(
        h.device.last_load().as_deref(),
        Some("file:///music/Artist - Local.mp3")
    );
    assert!(drain(&mut rx).contains(&CoreEvent::Queue(QueueEvent::TrackAdded {
        track_id: "local-1".to_string()
    })));
}

#[tokio::test]
async fn test_track_without_source_leaves_state_untouched() {
    let h = Harness::new();
    h.engine.play_collection(album(&["a", "b"]), 0).await;
    let before = h.engine.snapshot();

    let mut silent = remote_track("silent", 100.0);
    silent.remote_audio_ref = None;
    h.engine.play_collection(vec![silent], 0).await;

    assert_eq!(h.engine.snapshot(), before);
}

#[tokio::test]
async fn test_device_load_failure_pauses_with_recoverable_error() {
    let h = Harness::new();
    h.device.set_fail_load(true);
    let mut rx = h.engine.subscribe();

    h.engine.play_collection(album(&["a"]), 0).await;

    let state = h.engine.state();
    assert_eq!(state.status, PlaybackStatus::Paused);
    assert_eq!(state.current_track_id(), Some("a"));
    assert!(drain(&mut rx).iter().any(|e| matches!(
        e,
        CoreEvent::Playback(PlaybackEvent::Error { recoverable: true, .. })
    )));

    h.device.set_fail_load(false);
    h.engine.resume().await;
    assert!(h.engine.is_playing());
}

#[tokio::test]
async fn test_seek_is_clamped_and_applied_when_loaded() {
    let h = Harness::new();
    h.engine.play_collection(album(&["a"]), 0).await;
    h.device.clear();

    h.engine.seek_to(500.0).await;
    assert_eq!(h.engine.position_and_duration(), (200.0, 200.0));
    assert_eq!(h.device.commands(), vec![DeviceCommand::Seek(200.0)]);

    h.engine.seek_to(-3.0).await;
    assert_eq!(h.engine.state().position_seconds, 0.0);
    assert_eq!(h.engine.state().pending_seek, None);
}

#[tokio::test]
async fn test_seek_before_load_is_used_on_resume() {
    let h = Harness::new();
    h.engine.controller().restore_track(remote_track("a", 200.0)).await;

    h.engine.seek_to(42.0).await;
    assert!(h.device.commands().is_empty());
    assert_eq!(h.engine.state().pending_seek, Some(42.0));

    h.engine.resume().await;
    assert_eq!(
        h.device.commands(),
        vec![
            DeviceCommand::Load(remote_url("a")),
            DeviceCommand::Seek(42.0),
            DeviceCommand::Play
        ]
    );
    assert!(h.engine.is_playing());
}

#[tokio::test]
async fn test_volume_and_mute() {
    let h = Harness::new();

    h.engine.set_volume(1.7).await;
    assert_eq!(h.engine.state().volume, 1.0);

    h.engine.set_volume(0.4).await;
    h.engine.toggle_mute().await;
    let state = h.engine.state();
    assert!(state.muted);
    assert_eq!(state.volume, 0.4);
    assert_eq!(h.device.commands().last(), Some(&DeviceCommand::Volume(0.0)));

    h.engine.toggle_mute().await;
    assert_eq!(h.device.commands().last(), Some(&DeviceCommand::Volume(0.4)));

    h.engine.set_volume(0.0).await;
    assert!(h.engine.state().muted);
    h.engine.toggle_mute().await;
    let state = h.engine.state();
    assert!(!state.muted);
    assert_eq!(state.volume, 1.0);
}

#[tokio::test]
async fn test_set_queue_preserves_current_track() {
    let h = Harness::new();
    h.engine.play_collection(album(&["a", "b", "c"]), 1).await;
    h.device.clear();

    h.engine.set_queue(album(&["x", "b", "y", "z"]), true).await;
    assert_eq!(h.engine.current_index(), Some(1));
    assert_eq!(current_id(&h).as_deref(), Some("b"));
    assert!(h.engine.is_playing());
    assert!(h.device.commands().is_empty());
}

#[tokio::test]
async fn test_set_queue_without_current_selects_first_idle() {
    let h = Harness::new();
    h.engine.play_collection(album(&["a", "b"]), 1).await;
    h.device.clear();

    h.engine.set_queue(album(&["x", "y"]), true).await;
    assert_eq!(current_id(&h).as_deref(), Some("x"));
    assert_eq!(h.engine.state().status, PlaybackStatus::Idle);
    assert_eq!(h.device.commands(), vec![DeviceCommand::Stop]);

    h.engine.set_queue(Vec::new(), true).await;
    assert!(h.engine.current_track().is_none());
    assert_eq!(h.engine.current_index(), None);
}

#[tokio::test]
async fn test_remove_current_moves_to_successor() {
    let h = Harness::new();
    h.engine.play_collection(album(&["a", "b", "c"]), 1).await;

    h.engine.remove_from_queue("b").await;
    assert_eq!(current_id(&h).as_deref(), Some("c"));
    assert_eq!(h.engine.current_index(), Some(1));
    assert!(h.engine.is_playing());

    h.engine.remove_from_queue("a").await;
    assert_eq!(h.engine.current_index(), Some(0));
    assert_eq!(current_id(&h).as_deref(), Some("c"));

    h.engine.remove_from_queue("c").await;
    assert!(h.engine.current_track().is_none());
    assert_eq!(h.engine.state().status, PlaybackStatus::Idle);
}

#[tokio::test]
async fn test_add_to_queue_deduplicates() {
    let h = Harness::new();
    h.engine.play_collection(album(&["a"]), 0).await;
    h.engine.toggle_shuffle().await;

    h.engine.add_to_queue(remote_track("b", 100.0)).await;
    h.engine.add_to_queue(remote_track("b", 100.0)).await;
    assert_eq!(h.engine.queue().len(), 2);
    assert_eq!(h.engine.controller().shuffle_pool(), vec!["b".to_string()]);
}

#[tokio::test]
async fn test_position_updates_are_clamped() {
    let h = Harness::new();
    h.engine.play_collection(vec![remote_track("a", 180.0)], 0).await;

    h.engine
        .handle_device_event(DeviceEvent::PositionChanged { position_seconds: 250.0 })
        .await;
    assert_eq!(h.engine.state().position_seconds, 180.0);

    h.engine
        .handle_device_event(DeviceEvent::PositionChanged { position_seconds: f64::NAN })
        .await;
    assert_eq!(h.engine.state().position_seconds, 180.0);
}

#[tokio::test]
async fn test_device_state_changes_are_mirrored() {
    let h = Harness::new();
    h.engine.play_collection(album(&["a"]), 0).await;

    h.engine
        .handle_device_event(DeviceEvent::StateChanged { state: DeviceState::Paused })
        .await;
    assert_eq!(h.engine.state().status, PlaybackStatus::Paused);

    h.engine
        .handle_device_event(DeviceEvent::StateChanged { state: DeviceState::Playing })
        .await;
    assert!(h.engine.is_playing());
}

#[tokio::test]
async fn test_last_played_remote_track_is_remembered() {
    let store = MemorySettingsStore::new();
    let h = Harness::with_parts(common::MemoryFileSystem::new(), store.clone(), common::FakeHttpClient::new());

    h.engine.play_collection(album(&["a"]), 0).await;

    let raw = store.raw(LAST_PLAYED_KEY).expect("last played stored");
    let stored: Track = serde_json::from_str(&raw).unwrap();
    assert_eq!(stored.id, "a");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_snapshots_are_consistent_under_concurrent_commands() {
    let h = Harness::new();
    h.engine.toggle_loop().await;
    let tracks: Vec<Track> = ["a", "b", "c", "d", "e"]
        .iter()
        .enumerate()
        .map(|(i, id)| remote_track(id, 100.0 + 10.0 * i as f64))
        .collect();
    h.engine.play_collection(tracks, 0).await;
    let controller = h.engine.controller().clone();

    let mut writers = Vec::new();
    for worker in 0..4 {
        let controller = controller.clone();
        writers.push(tokio::spawn(async move {
            for step in 0..50 {
                if (worker + step) % 3 == 0 {
                    controller.previous().await;
                } else {
                    controller.next().await;
                }
            }
        }));
    }

    let reader = {
        let controller = controller.clone();
        tokio::spawn(async move {
            for _ in 0..500 {
                let snapshot = controller.snapshot();
                let indexed = snapshot
                    .current_index
                    .map(|i| snapshot.queue[i].id.clone());
                if let Some(track) = &snapshot.state.current_track {
                    assert_eq!(snapshot.state.duration_seconds, track.duration_seconds);
                }
                let current = snapshot.state.current_track.map(|t| t.id);
                assert_eq!(indexed, current);
                tokio::task::yield_now().await;
            }
        })
    };

    for writer in writers {
        writer.await.unwrap();
    }
    reader.await.unwrap();
}

mod with_mock_device {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result;
    use bridge_traits::PlaybackDevice;
    use core_playback::{PlaybackController, SourceResolver};
    use mockall::{mock, Sequence};
    use std::sync::Arc;

    mock! {
        Device {}

        #[async_trait]
        impl PlaybackDevice for Device {
            async fn load(&self, uri: &str) -> Result<()>;
            async fn play(&self) -> Result<()>;
            async fn pause(&self) -> Result<()>;
            async fn stop(&self) -> Result<()>;
            async fn seek_to(&self, position_seconds: f64) -> Result<()>;
            async fn set_volume(&self, volume: f32) -> Result<()>;
        }
    }

    fn controller(device: MockDevice) -> PlaybackController {
        let resolver = SourceResolver::new(
            Arc::new(common::MemoryFileSystem::new()),
            Some(common::API_BASE.to_string()),
        );
        PlaybackController::new(
            Arc::new(device),
            Arc::new(resolver),
            Arc::new(MemorySettingsStore::new()),
        )
    }

    #[tokio::test]
    async fn test_play_loads_then_plays_once() {
        let mut device = MockDevice::new();
        let mut seq = Sequence::new();
        let expected = remote_url("a");
        device
            .expect_load()
            .withf(move |uri| *uri == expected)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        device
            .expect_play()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));

        let controller = controller(device);
        controller.play_collection(album(&["a"]), 0).await;
        assert!(controller.is_playing());
    }

    #[tokio::test]
    async fn test_pause_without_loaded_source_skips_device() {
        let mut device = MockDevice::new();
        device.expect_pause().never();
        device.expect_load().never();

        let controller = controller(device);
        controller.restore_track(remote_track("a", 100.0)).await;
        controller.pause().await;
        assert_eq!(controller.state().status, PlaybackStatus::Idle);
    }
}
