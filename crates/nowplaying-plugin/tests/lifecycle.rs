mod common;

use common::*;
use nowplaying_plugin::engine::EngineEvent;
use nowplaying_plugin::render::NowPlayingContent;
use nowplaying_proto::keys::KeyKind;
use nowplaying_proto::library::SearchKind;
use nowplaying_proto::playback::TransportAction;
use nowplaying_proto::protocol::{
    DeviceInfo, HostEvent, HostKey, Interaction, PluginCommand, UiRequest, UiResponse,
};
use serde_json::json;
use std::sync::atomic::Ordering;

fn texts_to(h: &mut Harness, uid: &str) -> Vec<String> {
    h.draws_to(uid)
        .into_iter()
        .filter_map(|c| match c {
            PluginCommand::DrawText { text, .. } => Some(text),
            _ => None,
        })
        .collect()
}

fn ui_responses(h: &mut Harness) -> Vec<(u64, UiResponse)> {
    h.host_commands()
        .into_iter()
        .filter_map(|c| match c {
            PluginCommand::UiResponse {
                request_id,
                response,
            } => Some((request_id, response)),
            _ => None,
        })
        .collect()
}

async fn ui(h: &mut Harness, request_id: u64, request: UiRequest) {
    h.send(EngineEvent::Host(HostEvent::UiRequest {
        request_id,
        request,
    }))
    .await;
}

#[tokio::test]
async fn disconnected_device_loses_its_keys() {
    let mut h = Harness::new(FakeSource::playing("X", 0, 200_000));
    h.keys_present(&[("1", NOW_PLAYING_CID), ("2", LIKE_CID)]).await;
    assert!(h.engine.store().song_end_armed());

    h.send(EngineEvent::Host(HostEvent::DeviceStatus {
        devices: vec![DeviceInfo {
            serial_number: DEVICE.to_string(),
        }],
    }))
    .await;
    assert_eq!(h.engine.registry().active_ids().len(), 2);

    h.send(EngineEvent::Host(HostEvent::DeviceStatus {
        devices: vec![DeviceInfo {
            serial_number: "SN-2".to_string(),
        }],
    }))
    .await;
    assert!(h.engine.registry().active_ids().is_empty());
    assert_eq!(h.engine.registry().live_timer_count(), 0);
    assert!(!h.engine.store().song_end_armed());
}

#[tokio::test]
async fn draw_failure_deactivates_only_vanished_keys() {
    let mut h = Harness::new(FakeSource::playing("X", 0, 200_000));
    h.keys_present(&[("1", NOW_PLAYING_CID), ("2", NOW_PLAYING_CID)]).await;

    h.send(EngineEvent::Host(HostEvent::DrawFailed {
        device_id: DEVICE.to_string(),
        key_uid: "2".to_string(),
        error: "image payload too large".to_string(),
    }))
    .await;
    assert!(h.engine.registry().is_active(&key("2")));

    h.send(EngineEvent::Host(HostEvent::DrawFailed {
        device_id: DEVICE.to_string(),
        key_uid: "2".to_string(),
        error: "Device Not Connected".to_string(),
    }))
    .await;
    assert!(!h.engine.registry().is_active(&key("2")));
    assert!(h.engine.registry().is_active(&key("1")));
    assert_eq!(h.engine.registry().live_timer_count(), 2);
    assert!(h.engine.store().song_end_armed());
}

#[tokio::test]
async fn host_disconnect_stops_everything() {
    let mut h = Harness::new(FakeSource::playing("X", 0, 200_000));
    h.keys_present(&[("1", NOW_PLAYING_CID), ("3", COUNTER_CID)]).await;

    h.send(EngineEvent::HostDisconnected).await;

    assert!(h.engine.registry().active_ids().is_empty());
    assert_eq!(h.engine.registry().live_timer_count(), 0);
    assert!(!h.engine.store().song_end_armed());
}

#[tokio::test]
async fn counter_steps_and_wraps() {
    let mut h = Harness::new(FakeSource::new(Script::Playback(None)));
    let counter = HostKey {
        uid: "3".to_string(),
        cid: COUNTER_CID.to_string(),
        width: None,
        data: json!({ "rangeMin": 2, "rangeMax": 4 }),
    };
    h.send(EngineEvent::Host(HostEvent::KeysPresent {
        device_id: DEVICE.to_string(),
        keys: vec![counter.clone()],
    }))
    .await;
    assert_eq!(texts_to(&mut h, "3"), vec!["Click Me!".to_string()]);

    for _ in 0..3 {
        h.send(EngineEvent::Host(HostEvent::KeyInteraction {
            device_id: DEVICE.to_string(),
            key: counter.clone(),
            interaction: Interaction {
                evt: "click".to_string(),
                state: None,
            },
        }))
        .await;
    }
    assert_eq!(
        texts_to(&mut h, "3"),
        vec!["Count: 3", "Count: 4", "Count: 2"]
    );
    // counters never poll
    assert_eq!(h.source.fetches(), 0);
    assert_eq!(h.engine.registry().live_timer_count(), 0);
}

#[tokio::test]
async fn like_click_flips_known_status() {
    let source = FakeSource::playing("X", 0, 200_000);
    source.mark_liked("X", true);
    let mut h = Harness::new(source);
    h.keys_present(&[("1", NOW_PLAYING_CID), ("2", LIKE_CID)]).await;
    h.clear_frames();

    h.click("2", LIKE_CID).await;

    assert_eq!(
        *h.source.set_liked_calls.lock().unwrap(),
        vec![("X".to_string(), false)]
    );
    assert_eq!(h.engine.store().snapshot().is_liked, Some(false));
    assert_eq!(h.like_frames(), vec![(true, Some(false))]);
}

#[tokio::test]
async fn like_click_without_status_is_ignored() {
    let mut h = Harness::new(FakeSource::playing("X", 0, 200_000));
    h.keys_present(&[("1", NOW_PLAYING_CID), ("2", LIKE_CID)]).await;
    assert_eq!(h.engine.store().snapshot().is_liked, None);

    h.click("2", LIKE_CID).await;

    assert!(h.source.set_liked_calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn now_playing_click_toggles_transport_and_refreshes() {
    let mut h = Harness::new(FakeSource::playing("X", 0, 200_000));
    h.keys_present(&[("1", NOW_PLAYING_CID)]).await;
    let ids_before = h
        .engine
        .registry()
        .get(&key("1"))
        .and_then(|e| e.timers.fetch.as_ref().map(|t| t.id()));

    h.source
        .set_script(Script::Playback(Some(track_raw("X", 0, 200_000, false))));
    h.click("1", NOW_PLAYING_CID).await;

    // The press read "paused" from the fresh fetch, so it asked for play.
    assert_eq!(*h.source.transport.lock().unwrap(), vec![TransportAction::Play]);
    assert!(!h.engine.store().snapshot().is_playing);
    let ids_after = h
        .engine
        .registry()
        .get(&key("1"))
        .and_then(|e| e.timers.fetch.as_ref().map(|t| t.id()));
    assert_eq!(ids_before, ids_after);
}

#[tokio::test]
async fn interaction_on_unknown_key_registers_it() {
    let mut h = Harness::new(FakeSource::playing("X", 0, 200_000));

    h.click("1", NOW_PLAYING_CID).await;

    assert!(h.engine.registry().is_active(&key("1")));
    assert_eq!(h.engine.registry().live_timer_count(), 2);
    assert_eq!(*h.source.transport.lock().unwrap(), vec![TransportAction::Pause]);
}

#[tokio::test]
async fn unknown_cid_is_ignored() {
    let mut h = Harness::new(FakeSource::playing("X", 0, 200_000));
    h.keys_present(&[("9", "com.energy.spotify_integration.cyclebutton")])
        .await;

    assert!(!h.engine.registry().is_active(&key("9")));
    assert!(h.draws_to("9").is_empty());
    assert_eq!(h.source.fetches(), 0);
}

#[tokio::test]
async fn key_changing_kind_starts_over() {
    let mut h = Harness::new(FakeSource::playing("X", 0, 200_000));
    h.keys_present(&[("1", NOW_PLAYING_CID)]).await;
    assert_eq!(h.engine.registry().live_timer_count(), 2);
    h.host_commands();

    h.keys_present(&[("1", COUNTER_CID)]).await;

    let entry = h.engine.registry().get(&key("1")).unwrap();
    assert_eq!(entry.kind(), KeyKind::Counter);
    assert_eq!(entry.width, 80);
    assert_eq!(h.engine.registry().live_timer_count(), 0);
    assert!(!h.engine.store().song_end_armed());
    assert_eq!(texts_to(&mut h, "1"), vec!["Click Me!".to_string()]);
}

#[tokio::test]
async fn reaffirmed_key_takes_new_width_and_style() {
    let mut h = Harness::new(FakeSource::playing("X", 0, 200_000));
    h.keys_present(&[("1", NOW_PLAYING_CID)]).await;

    h.send(EngineEvent::Host(HostEvent::KeysPresent {
        device_id: DEVICE.to_string(),
        keys: vec![HostKey {
            uid: "1".to_string(),
            cid: NOW_PLAYING_CID.to_string(),
            width: Some(200),
            data: json!({ "showTitle": false }),
        }],
    }))
    .await;
    h.send(EngineEvent::InterpolationTick(key("1"))).await;

    assert_eq!(h.engine.registry().get(&key("1")).unwrap().width, 200);
    assert!(matches!(
        h.frames().last(),
        Some(Rendered::NowPlaying { width: 200, .. })
    ));
    assert_eq!(h.source.fetches(), 1);
}

#[tokio::test]
async fn ui_reads_current_playback() {
    let source = FakeSource::playing("X", 5_000, 200_000);
    source.mark_liked("X", true);
    let mut h = Harness::new(source);
    h.keys_present(&[("1", NOW_PLAYING_CID)]).await;
    h.host_commands();

    h.clock.advance(3_000);
    ui(&mut h, 7, UiRequest::GetPlayback).await;

    let responses = ui_responses(&mut h);
    assert_eq!(responses.len(), 1);
    match &responses[0] {
        (7, UiResponse::Playback { playback }) => {
            assert_eq!(playback.track_id.as_deref(), Some("X"));
            assert_eq!(playback.title.as_deref(), Some("Song X"));
            assert_eq!(playback.artist.as_deref(), Some("Artist X"));
            assert_eq!(playback.progress_ms, 8_000);
            assert_eq!(playback.is_liked, Some(true));
            assert!(playback.is_playing);
        }
        other => panic!("unexpected response {:?}", other),
    }
}

#[tokio::test]
async fn ui_control_sends_action_and_refreshes() {
    let mut h = Harness::new(FakeSource::playing("X", 0, 200_000));
    h.keys_present(&[("1", NOW_PLAYING_CID)]).await;
    h.host_commands();
    let fetches = h.source.fetches();

    h.source
        .set_script(Script::Playback(Some(track_raw("Y", 0, 150_000, true))));
    ui(
        &mut h,
        8,
        UiRequest::Control {
            action: TransportAction::Next,
        },
    )
    .await;

    assert_eq!(*h.source.transport.lock().unwrap(), vec![TransportAction::Next]);
    assert_eq!(h.source.fetches(), fetches + 1);
    assert_eq!(h.engine.store().snapshot().track_id.as_deref(), Some("Y"));
    assert_eq!(
        ui_responses(&mut h),
        vec![(
            8,
            UiResponse::Ok {
                message: "next sent".to_string()
            }
        )]
    );
}

#[tokio::test]
async fn ui_refresh_reconciles_now_playing_keys() {
    let mut h = Harness::new(FakeSource::playing("X", 0, 200_000));
    h.keys_present(&[("1", NOW_PLAYING_CID), ("2", NOW_PLAYING_CID)]).await;
    h.host_commands();
    let fetches = h.source.fetches();

    ui(&mut h, 9, UiRequest::Refresh).await;

    assert_eq!(h.source.fetches(), fetches + 2);
    assert_eq!(
        ui_responses(&mut h),
        vec![(
            9,
            UiResponse::Ok {
                message: "Refreshing".to_string()
            }
        )]
    );
    assert_eq!(h.last_now_playing(), Some(NowPlayingContent::Track(
        nowplaying_plugin::render::TrackFrame {
            title: "Song X".to_string(),
            artist: "Artist X".to_string(),
            album_art_url: None,
            is_playing: true,
            progress_ms: 0,
            duration_ms: 200_000,
        }
    )));
}

#[tokio::test]
async fn ui_volume_is_forwarded_to_the_source() {
    let mut h = Harness::new(FakeSource::playing("X", 0, 200_000));
    h.keys_present(&[("1", NOW_PLAYING_CID)]).await;
    h.host_commands();

    ui(
        &mut h,
        11,
        UiRequest::Control {
            action: TransportAction::SetVolume(40),
        },
    )
    .await;

    assert_eq!(
        *h.source.transport.lock().unwrap(),
        vec![TransportAction::SetVolume(40)]
    );
    assert_eq!(
        ui_responses(&mut h),
        vec![(
            11,
            UiResponse::Ok {
                message: "set-volume sent".to_string()
            }
        )]
    );
}

#[tokio::test]
async fn ui_playlists_default_to_first_page() {
    let mut h = Harness::new(FakeSource::playing("X", 0, 200_000));

    ui(
        &mut h,
        12,
        UiRequest::Playlists {
            limit: None,
            offset: None,
        },
    )
    .await;

    assert_eq!(h.source.library_calls(), vec!["playlists 50/0".to_string()]);
    let responses = ui_responses(&mut h);
    assert_eq!(responses.len(), 1);
    match &responses[0] {
        (12, UiResponse::Playlists { playlists }) => {
            assert_eq!(playlists.total, 1);
            assert_eq!(playlists.items[0].name, "Mix");
        }
        other => panic!("Unexpected response: {:?}", other),
    }
}

#[tokio::test]
async fn ui_search_fills_in_kinds_and_clamps_limit() {
    let mut h = Harness::new(FakeSource::playing("X", 0, 200_000));

    ui(
        &mut h,
        13,
        UiRequest::Search {
            query: "  daft punk ".to_string(),
            types: vec![],
            limit: Some(500),
            offset: Some(20),
        },
    )
    .await;
    ui(
        &mut h,
        14,
        UiRequest::Search {
            query: "air".to_string(),
            types: vec![SearchKind::Artist],
            limit: None,
            offset: None,
        },
    )
    .await;

    assert_eq!(
        h.source.library_calls(),
        vec![
            "search q=daft punk track,album,playlist 50/20".to_string(),
            "search q=air artist 10/0".to_string(),
        ]
    );
    let responses = ui_responses(&mut h);
    assert_eq!(responses.len(), 2);
    match &responses[0] {
        (13, UiResponse::Search { results }) => {
            assert_eq!(results.tracks[0].name, "Song daft punk");
        }
        other => panic!("Unexpected response: {:?}", other),
    }
}

#[tokio::test]
async fn ui_search_without_query_is_rejected() {
    let mut h = Harness::new(FakeSource::playing("X", 0, 200_000));

    ui(
        &mut h,
        15,
        UiRequest::Search {
            query: "   ".to_string(),
            types: vec![],
            limit: None,
            offset: None,
        },
    )
    .await;

    assert!(h.source.library_calls().is_empty());
    assert_eq!(
        ui_responses(&mut h),
        vec![(
            15,
            UiResponse::Error {
                message: "Query required".to_string(),
                needs_auth: false,
            }
        )]
    );
}

#[tokio::test]
async fn ui_library_requests_need_auth() {
    let source = FakeSource::playing("X", 0, 200_000);
    source.authenticated.store(false, Ordering::SeqCst);
    source.auth_succeeds.store(false, Ordering::SeqCst);
    let mut h = Harness::new(source);

    ui(
        &mut h,
        16,
        UiRequest::Playlists {
            limit: Some(5),
            offset: None,
        },
    )
    .await;

    assert!(h.source.library_calls().is_empty());
    assert_eq!(
        ui_responses(&mut h),
        vec![(
            16,
            UiResponse::Error {
                message: "Auth required".to_string(),
                needs_auth: true,
            }
        )]
    );
}
