//! Engine-level scenarios driven through the mock device

use crate::audio::backend::mock_backend::MockDevice;
use crate::audio::backend::{AudioDevice, FilterKind};
use crate::audio::{
    CacheKey, LoopOptions, PackRequest, PlaybackState, SessionPack, SoundManager, SoundManifest, SoundPlayOptions,
    Tier,
};
use crate::config::SoundConfig;
use crate::foundation::logging;
use futures::FutureExt;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

const FRAME: f32 = 0.016;

const SOURCES: &[(&str, &[&str])] = &[
    ("weapon/standard/fire", &["fire_a.ogg", "fire_b.ogg", "fire_c.ogg"]),
    ("vehicle/player_soviet/p_boost", &["boost_a.ogg", "boost_b.ogg"]),
    ("environment/forest/ambient_2d/birds", &["birds.ogg"]),
    ("bgm/battle", &["battle.ogg"]),
    ("vehicle/enemy_tiger/cookoff", &["cookoff.ogg"]),
    ("ui/click", &["click.ogg"]),
];

const REVERB_SOURCES: &[(&str, &[&str])] = &[
    ("weapon/standard/reverb_forest_after_explosion", &["tail_a.ogg", "tail_b.ogg", "tail_c.ogg"]),
    ("weapon/mortar/reverb_forest_after_explosion", &["mortar_tail.ogg"]),
];

const STANDARD_TAIL: &str = "weapon/standard/reverb_forest_after_explosion";
const MORTAR_TAIL: &str = "weapon/mortar/reverb_forest_after_explosion";

fn engine(device: &MockDevice) -> SoundManager {
    engine_with(device, SOURCES)
}

fn engine_with(device: &MockDevice, sources: &[(&str, &[&str])]) -> SoundManager {
    logging::init_for_tests();
    let manifest = SoundManifest::from_map(sources.iter().map(|(key, sources)| (*key, sources.to_vec())));
    let config = SoundConfig {
        mixer: Vec::new(),
        ..SoundConfig::default()
    };
    SoundManager::new(Box::new(device.probe()), manifest, config)
        .unwrap()
        .with_session_pack(SessionPack::shared())
        .with_seed(42)
}

fn preloaded() -> MockDevice {
    preloaded_with(SOURCES)
}

fn preloaded_with(manifest: &[(&str, &[&str])]) -> MockDevice {
    let device = MockDevice::new();
    for (_, sources) in manifest {
        for source in *sources {
            device.preload(CacheKey::for_source(source));
        }
    }
    device
}

fn run(manager: &mut SoundManager, frames: usize) {
    for _ in 0..frames {
        manager.update(FRAME);
    }
}

fn lowpass_of(manager: &SoundManager, device: &MockDevice, handle: crate::audio::PlaybackHandle) -> Option<f32> {
    let sound = device.sound(manager.sound_handle(handle).unwrap()).unwrap();
    sound
        .route
        .iter()
        .filter_map(|filter| device.filter(*filter))
        .find(|(kind, _)| *kind == FilterKind::Lowpass)
        .map(|(_, hz)| hz)
}

fn volume_of(manager: &SoundManager, device: &MockDevice, handle: crate::audio::PlaybackHandle) -> f32 {
    device.sound(manager.sound_handle(handle).unwrap()).unwrap().volume
}

#[test]
fn test_three_plays_cover_every_source() {
    let device = preloaded();
    let mut manager = engine(&device);

    let keys: HashSet<CacheKey> = (0..3)
        .map(|_| {
            let handle = manager.play_folder("weapon/standard/fire", SoundPlayOptions::new()).unwrap();
            assert_eq!(manager.state(handle), PlaybackState::Playing);
            device.sound(manager.sound_handle(handle).unwrap()).unwrap().key
        })
        .collect();
    assert_eq!(keys.len(), 3);
}

#[test]
fn test_weapon_family_fallback_plays_standard() {
    let device = preloaded();
    let mut manager = engine(&device);
    let handle = manager.play_folder("weapon/he/fire", SoundPlayOptions::new()).unwrap();
    assert_eq!(manager.state(handle), PlaybackState::Playing);
}

#[test]
fn test_exclusive_slot_keeps_one_instance() {
    let device = preloaded();
    let mut manager = engine(&device);

    let first = manager
        .play_folder_exclusive("boost", "vehicle/player_soviet/p_boost", SoundPlayOptions::new())
        .unwrap();
    let second = manager
        .play_folder_exclusive("boost", "vehicle/player_soviet/p_boost", SoundPlayOptions::new())
        .unwrap();

    assert_eq!(manager.state(first), PlaybackState::Ended);
    assert_eq!(manager.state(second), PlaybackState::Playing);
    assert_eq!(manager.exclusive_handle("boost"), Some(second));
    assert_eq!(device.playing_sounds().len(), 1);
}

#[test]
fn test_exclusive_superseded_while_loading() {
    let device = MockDevice::new();
    let mut manager = engine(&device);

    let first = manager
        .play_folder_exclusive("boost", "vehicle/player_soviet/p_boost", SoundPlayOptions::new())
        .unwrap();
    let second = manager
        .play_folder_exclusive("boost", "vehicle/player_soviet/p_boost", SoundPlayOptions::new())
        .unwrap();
    assert_eq!(manager.state(first), PlaybackState::Pending);
    assert_eq!(manager.state(second), PlaybackState::Pending);

    run(&mut manager, 1);
    assert_eq!(manager.state(first), PlaybackState::Ended);
    assert_eq!(manager.state(second), PlaybackState::Playing);
    assert_eq!(device.live_sounds(), 1);
}

#[test]
fn test_stop_exclusive_cancels_pending_request() {
    let device = MockDevice::new();
    let mut manager = engine(&device);

    let handle = manager
        .play_folder_exclusive("boost", "vehicle/player_soviet/p_boost", SoundPlayOptions::new())
        .unwrap();
    manager.stop_exclusive("boost", None);
    run(&mut manager, 1);

    assert_eq!(manager.state(handle), PlaybackState::Ended);
    assert_eq!(device.live_sounds(), 0);
}

#[test]
fn test_crossfade_fades_previous_occupant() {
    let device = preloaded();
    let mut manager = engine(&device);

    let first = manager
        .play_folder_exclusive_crossfade("music", "bgm/battle", SoundPlayOptions::new(), Some(200.0))
        .unwrap();
    run(&mut manager, 1);
    let second = manager
        .play_folder_exclusive_crossfade("music", "bgm/battle", SoundPlayOptions::new(), Some(200.0))
        .unwrap();

    run(&mut manager, 2);
    assert_eq!(manager.state(first), PlaybackState::Playing);
    assert!(volume_of(&manager, &device, first) < 1.0);
    assert_eq!(manager.exclusive_handle("music"), Some(second));

    run(&mut manager, 12);
    assert_eq!(manager.state(first), PlaybackState::Ended);
    assert_eq!(manager.state(second), PlaybackState::Playing);
    assert_eq!(device.live_sounds(), 1);
}

#[test]
fn test_stop_loop_fades_then_disposes() {
    let device = preloaded();
    let mut manager = engine(&device);

    let handle = manager
        .start_loop("amb", "environment/forest/ambient_2d/birds", LoopOptions::new().with_fade_in(0.0))
        .unwrap();
    run(&mut manager, 2);
    let start_volume = volume_of(&manager, &device, handle);
    assert!(start_volume > 0.9);

    manager.stop_loop("amb", Some(300.0));
    assert!(!manager.is_loop_active("amb"));
    run(&mut manager, 10);
    assert_eq!(manager.state(handle), PlaybackState::Playing);
    assert!(volume_of(&manager, &device, handle) < start_volume);

    run(&mut manager, 9);
    assert_eq!(manager.state(handle), PlaybackState::Ended);
    assert_eq!(manager.loop_handle("amb"), None);
    assert_eq!(device.live_sounds(), 0);
}

#[test]
fn test_loop_fades_in_from_silence() {
    let device = preloaded();
    let mut manager = engine(&device);

    let handle = manager
        .start_loop("amb", "environment/forest/ambient_2d/birds", LoopOptions::new())
        .unwrap();
    assert!(volume_of(&manager, &device, handle) < 0.01);

    run(&mut manager, 5);
    let midway = volume_of(&manager, &device, handle);
    assert!(midway > 0.0 && midway < 1.0);

    run(&mut manager, 10);
    assert!((volume_of(&manager, &device, handle) - 1.0).abs() < 1e-4);
}

#[test]
fn test_start_loop_is_idempotent() {
    let device = preloaded();
    let mut manager = engine(&device);

    let first = manager
        .start_loop("amb", "environment/forest/ambient_2d/birds", LoopOptions::new())
        .unwrap();
    let second = manager
        .start_loop("amb", "environment/forest/ambient_2d/birds", LoopOptions::new())
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(device.live_sounds(), 1);
    let sound = device.sound(manager.sound_handle(first).unwrap()).unwrap();
    assert!(sound.looping);
    assert_eq!(sound.play_count, 1);
}

#[test]
fn test_start_loop_while_loading_shares_request() {
    let device = MockDevice::new();
    let mut manager = engine(&device);

    let first = manager.start_loop("music", "bgm/battle", LoopOptions::new()).unwrap();
    let second = manager.start_loop("music", "bgm/battle", LoopOptions::new()).unwrap();
    assert_eq!(first, second);
    assert_eq!(device.decode_requests("battle.ogg"), 1);

    run(&mut manager, 1);
    assert_eq!(manager.state(first), PlaybackState::Playing);
    assert_eq!(device.live_sounds(), 1);
}

#[test]
fn test_restart_cancels_fade_out() {
    let device = preloaded();
    let mut manager = engine(&device);

    let handle = manager.start_loop("music", "bgm/battle", LoopOptions::new()).unwrap();
    run(&mut manager, 2);
    manager.stop_loop("music", Some(300.0));
    run(&mut manager, 2);

    let again = manager.start_loop("music", "bgm/battle", LoopOptions::new()).unwrap();
    assert_eq!(again, handle);
    assert!(manager.is_loop_active("music"));

    run(&mut manager, 30);
    assert_eq!(manager.state(handle), PlaybackState::Playing);
}

#[test]
fn test_restart_replaces_dead_loop() {
    let device = preloaded();
    let mut manager = engine(&device);

    let handle = manager.start_loop("music", "bgm/battle", LoopOptions::new()).unwrap();
    run(&mut manager, 2);
    device.kill(manager.sound_handle(handle).unwrap());

    let again = manager.start_loop("music", "bgm/battle", LoopOptions::new()).unwrap();
    assert_ne!(again, handle);
    assert_eq!(manager.state(handle), PlaybackState::Ended);

    run(&mut manager, 3);
    assert_eq!(manager.loop_handle("music"), Some(again));
    assert_eq!(manager.state(again), PlaybackState::Playing);
    assert_eq!(device.live_sounds(), 1);
}

#[test]
fn test_restart_without_volume_keeps_level() {
    let device = preloaded();
    let mut manager = engine(&device);
    let quiet = LoopOptions::new().with_volume(0.3).with_fade_in(0.0);

    let handle = manager.start_loop("music", "bgm/battle", quiet).unwrap();
    run(&mut manager, 2);
    assert!((volume_of(&manager, &device, handle) - 0.3).abs() < 1e-4);

    manager.start_loop("music", "bgm/battle", LoopOptions::new().with_fade_in(0.0));
    run(&mut manager, 2);
    assert!((volume_of(&manager, &device, handle) - 0.3).abs() < 1e-4);

    manager.stop_loop("music", Some(300.0));
    run(&mut manager, 5);
    manager.start_loop("music", "bgm/battle", LoopOptions::new());
    run(&mut manager, 20);
    assert!((volume_of(&manager, &device, handle) - 0.3).abs() < 1e-4);
}

#[test]
fn test_stop_loop_cancels_pending_start() {
    let device = MockDevice::new();
    device.set_manual_decode(true);
    let mut manager = engine(&device);

    let handle = manager.start_loop("music", "bgm/battle", LoopOptions::new()).unwrap();
    manager.stop_loop("music", None);
    assert_eq!(manager.state(handle), PlaybackState::Ended);

    device.complete_decodes();
    run(&mut manager, 2);
    assert_eq!(device.live_sounds(), 0);
    assert_eq!(manager.loop_handle("music"), None);
}

#[test]
fn test_loop_waits_for_unlock() {
    let device = preloaded();
    device.set_unlocked(false);
    let mut manager = engine(&device);

    let handle = manager
        .start_loop("amb", "environment/forest/ambient_2d/birds", LoopOptions::new())
        .unwrap();
    assert_eq!(manager.state(handle), PlaybackState::Pending);

    device.gesture();
    run(&mut manager, 1);
    assert_eq!(manager.state(handle), PlaybackState::Pending);

    device.set_unlocked(true);
    run(&mut manager, 1);
    assert_eq!(manager.state(handle), PlaybackState::Playing);
}

#[test]
fn test_broken_exclusive_is_pruned() {
    let device = preloaded();
    let mut manager = engine(&device);

    let handle = manager
        .play_folder_exclusive("boost", "vehicle/player_soviet/p_boost", SoundPlayOptions::new())
        .unwrap();
    device.kill(manager.sound_handle(handle).unwrap());
    run(&mut manager, 1);

    assert_eq!(manager.state(handle), PlaybackState::Ended);
    assert_eq!(manager.exclusive_handle("boost"), None);

    let next = manager
        .play_folder_exclusive("boost", "vehicle/player_soviet/p_boost", SoundPlayOptions::new())
        .unwrap();
    assert_eq!(manager.state(next), PlaybackState::Playing);
}

#[test]
fn test_broken_loop_is_pruned() {
    let device = preloaded();
    let mut manager = engine(&device);

    let handle = manager.start_loop("music", "bgm/battle", LoopOptions::new()).unwrap();
    device.kill(manager.sound_handle(handle).unwrap());
    run(&mut manager, 1);

    assert_eq!(manager.loop_handle("music"), None);
    assert_eq!(manager.state(handle), PlaybackState::Ended);
}

#[test]
fn test_weapon_fire_ducks_ambience() {
    let device = preloaded();
    let mut manager = engine(&device);

    let bed = manager
        .start_loop("amb", "environment/forest/ambient_2d/birds", LoopOptions::new().with_fade_in(0.0))
        .unwrap();
    run(&mut manager, 2);
    let open = volume_of(&manager, &device, bed);

    let shot = manager.play_folder("weapon/standard/fire", SoundPlayOptions::new()).unwrap();
    run(&mut manager, 5);
    let ducked = volume_of(&manager, &device, bed);
    assert!(ducked < open * 0.8);

    device.finish(manager.sound_handle(shot).unwrap());
    run(&mut manager, 10);
    assert_eq!(manager.state(shot), PlaybackState::Ended);
    assert!(volume_of(&manager, &device, bed) > ducked);
}

#[test]
fn test_cookoff_darkens_then_restores_ambience() {
    let device = preloaded();
    let mut manager = engine(&device);

    let bed = manager
        .start_loop("amb", "environment/forest/ambient_2d/birds", LoopOptions::new().with_fade_in(0.0))
        .unwrap();
    let cookoff = manager
        .play_folder("vehicle/enemy_tiger/cookoff", SoundPlayOptions::new())
        .unwrap();
    run(&mut manager, 10);

    let sound = device.sound(manager.sound_handle(bed).unwrap()).unwrap();
    assert_eq!(sound.route.len(), 1);
    let (_, focused_hz) = device.filter(sound.route[0]).unwrap();
    assert!(focused_hz < 20000.0);

    device.finish(manager.sound_handle(cookoff).unwrap());
    run(&mut manager, 1);
    let sound = device.sound(manager.sound_handle(bed).unwrap()).unwrap();
    let (_, restored_hz) = device.filter(sound.route[0]).unwrap();
    assert!(restored_hz > 23000.0);
}

#[test]
fn test_pending_play_goes_live_after_decode() {
    let device = MockDevice::new();
    device.set_manual_decode(true);
    let mut manager = engine(&device);

    let handle = manager.play_folder("ui/click", SoundPlayOptions::new()).unwrap();
    assert_eq!(manager.state(handle), PlaybackState::Pending);
    run(&mut manager, 1);
    assert_eq!(manager.state(handle), PlaybackState::Pending);

    device.complete_decodes();
    run(&mut manager, 1);
    assert_eq!(manager.state(handle), PlaybackState::Playing);
    assert_eq!(device.decode_requests("click.ogg"), 1);
}

#[test]
fn test_failed_decode_drops_play() {
    let device = MockDevice::new();
    device.fail_source("click.ogg");
    let mut manager = engine(&device);

    let handle = manager.play_folder("ui/click", SoundPlayOptions::new()).unwrap();
    run(&mut manager, 1);
    assert_eq!(manager.state(handle), PlaybackState::Ended);
    assert_eq!(device.live_sounds(), 0);
}

#[test]
fn test_cooldown_gate() {
    let device = preloaded();
    let mut manager = engine(&device);
    let options = SoundPlayOptions::new().with_cooldown(100.0);

    assert!(manager.play_folder("ui/click", options.clone()).is_some());
    assert!(manager.play_folder("ui/click", options.clone()).is_none());
    run(&mut manager, 7);
    assert!(manager.play_folder("ui/click", options).is_some());
}

#[test]
fn test_tracked_voice_follows_listener() {
    let device = preloaded();
    let mut manager = engine(&device);
    manager.set_listener_position(0.0, 0.0);

    let tracked = manager
        .play_folder("ui/click", SoundPlayOptions::new().at(400.0, 0.0).tracking())
        .unwrap();
    let fixed = manager.play_folder("ui/click", SoundPlayOptions::new().at(400.0, 0.0)).unwrap();
    let pan = |handle| device.sound(manager.sound_handle(handle).unwrap()).unwrap().pan;
    assert!(pan(tracked) > 0.1);

    manager.set_listener_position(400.0, 0.0);
    run(&mut manager, 1);
    let pan = |handle| device.sound(manager.sound_handle(handle).unwrap()).unwrap().pan;
    assert!(pan(tracked).abs() < 1e-6);
    assert!(pan(fixed) > 0.1);
}

#[test]
fn test_active_sounds_and_stop_all() {
    let device = preloaded();
    let mut manager = engine(&device);

    manager.start_loop("amb", "environment/forest/ambient_2d/birds", LoopOptions::new());
    let shot = manager.play_folder("ui/click", SoundPlayOptions::new()).unwrap();
    let active = manager.active_sounds();
    assert_eq!(active.len(), 2);
    assert_eq!(active.iter().filter(|sound| sound.looping).count(), 1);

    let mut probe = device.probe();
    probe.stop(manager.sound_handle(shot).unwrap()).unwrap();
    assert_eq!(manager.active_sounds().len(), 1);
    assert_eq!(manager.state(shot), PlaybackState::Ended);

    manager.stop_all();
    assert_eq!(device.live_sounds(), 0);
    assert!(manager.active_sounds().is_empty());
}

#[test]
fn test_resume_after_wake_resumes_loops() {
    let device = preloaded();
    let mut manager = engine(&device);

    let handle = manager.start_loop("music", "bgm/battle", LoopOptions::new()).unwrap();
    let sound_handle = manager.sound_handle(handle).unwrap();
    let mut probe = device.probe();
    probe.pause(sound_handle).unwrap();
    assert!(device.sound(sound_handle).unwrap().paused);

    manager.resume_after_wake();
    assert!(!device.sound(sound_handle).unwrap().paused);
}

#[test]
fn test_per_instance_filters() {
    let device = preloaded();
    let mut manager = engine(&device);

    let handle = manager.play_folder("ui/click", SoundPlayOptions::new()).unwrap();
    assert!(manager.set_highpass(handle, 200.0));
    assert!(manager.tween_lowpass(handle, 1000.0, 100.0));
    assert_eq!(device.live_filters(), 2);

    run(&mut manager, 8);
    let sound = device.sound(manager.sound_handle(handle).unwrap()).unwrap();
    let (_, lowpass_hz) = device.filter(sound.route[0]).unwrap();
    assert!((lowpass_hz - 1000.0).abs() < 1.0);

    assert!(manager.detach_filters(handle));
    assert_eq!(device.live_filters(), 0);
    assert!(!manager.set_lowpass(crate::foundation::collections::InstanceId::default(), 500.0));
}

#[test]
fn test_tier_load_reports_progress() {
    let device = MockDevice::new();
    let mut manager = engine(&device);
    let reports = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reports);

    let done = manager.ensure_session_audio_pack(
        PackRequest::tier(Tier::P0).with_progress(move |loaded, total| sink.lock().unwrap().push((loaded, total))),
    );
    run(&mut manager, 6);

    assert_eq!(done.clone().now_or_never(), Some(()));
    assert_eq!(reports.lock().unwrap().last().copied(), Some((3, 3)));
    assert!(!manager.is_session_audio_pack_ready());
}

#[test]
fn test_session_pack_loads_once() {
    let device = MockDevice::new();
    let mut manager = engine(&device);
    let reports = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reports);
    let _subscription = manager.on_session_audio_pack_progress(move |loaded, total| {
        sink.lock().unwrap().push((loaded, total));
    });

    manager.ensure_session_audio_pack(PackRequest::session());
    run(&mut manager, 10);
    assert!(manager.is_session_audio_pack_ready());
    let (loaded, total) = reports.lock().unwrap().last().copied().unwrap();
    assert_eq!(loaded, total);
    assert!(total > 0);

    let requests = device.total_decode_requests();
    let again = manager.ensure_session_audio_pack(PackRequest::session());
    assert_eq!(again.now_or_never(), Some(()));
    assert_eq!(device.total_decode_requests(), requests);
}

#[test]
fn test_prewarm_requests_distinct_sources() {
    let device = MockDevice::new();
    let mut manager = engine(&device);

    let requested = manager.prewarm_folders(&["weapon/standard/fire", "weapon/he/fire", "ui/click"], 2, 10);
    assert_eq!(requested, 3);
    assert_eq!(device.total_decode_requests(), 3);
}

#[test]
fn test_oldest_forest_reverb_yields() {
    let device = preloaded_with(REVERB_SOURCES);
    let mut manager = engine_with(&device, REVERB_SOURCES);

    let tails: Vec<_> = (0..3)
        .map(|_| manager.play_folder(STANDARD_TAIL, SoundPlayOptions::new()).unwrap())
        .collect();
    run(&mut manager, 50);

    let oldest = volume_of(&manager, &device, tails[0]);
    assert!(oldest > 0.3 && oldest < 0.6, "oldest tail at {oldest}");
    assert!(lowpass_of(&manager, &device, tails[0]).is_some_and(|hz| hz < 20000.0));
    for newer in &tails[1..] {
        assert!((volume_of(&manager, &device, *newer) - 1.0).abs() < 1e-4);
        assert_eq!(lowpass_of(&manager, &device, *newer), None);
    }

    run(&mut manager, 60);
    assert!(volume_of(&manager, &device, tails[0]) < 1e-4);
    assert!(lowpass_of(&manager, &device, tails[0]).is_some_and(|hz| hz < 200.0));
}

#[test]
fn test_mortar_reverb_takes_priority() {
    let device = preloaded_with(REVERB_SOURCES);
    let mut manager = engine_with(&device, REVERB_SOURCES);

    let normal = manager.play_folder(STANDARD_TAIL, SoundPlayOptions::new()).unwrap();
    let mortar = manager.play_folder(MORTAR_TAIL, SoundPlayOptions::new()).unwrap();
    run(&mut manager, 40);
    assert!(volume_of(&manager, &device, normal) < 0.8);
    assert!((volume_of(&manager, &device, mortar) - 1.0).abs() < 1e-4);

    device.finish(manager.sound_handle(mortar).unwrap());
    run(&mut manager, 2);
    assert_eq!(manager.state(mortar), PlaybackState::Ended);
    assert!((volume_of(&manager, &device, normal) - 1.0).abs() < 1e-4);
    assert!(lowpass_of(&manager, &device, normal).is_some_and(|hz| hz > 23000.0));
}

#[test]
fn test_forest_reverb_pan_recenters() {
    let device = preloaded_with(REVERB_SOURCES);
    let mut manager = engine_with(&device, REVERB_SOURCES);
    let pan = |manager: &SoundManager, handle| device.sound(manager.sound_handle(handle).unwrap()).unwrap().pan;

    let tail = manager
        .play_folder(STANDARD_TAIL, SoundPlayOptions::new().at(450.0, 0.0))
        .unwrap();
    let start = pan(&manager, tail);
    assert!(start > 0.1);

    run(&mut manager, 25);
    assert!((pan(&manager, tail) - start).abs() < 1e-4);

    run(&mut manager, 75);
    assert!(pan(&manager, tail).abs() < 1e-4);
}
