use snipwave_lib::{
    compute_multiplier, BufferedMediaElement, FadeParams, FadeState, ManualFrameScheduler,
    MediaElement, PreviewConfig, PreviewSession, BAND_COUNT,
};
use std::sync::Arc;

const SR: f64 = 48000.0;

fn setup() -> (PreviewSession, Arc<ManualFrameScheduler>, Arc<BufferedMediaElement>) {
    let scheduler = Arc::new(ManualFrameScheduler::new());
    let session = PreviewSession::new(PreviewConfig::default(), scheduler.clone());
    // 10 s of constant 0.5
    let element = Arc::new(BufferedMediaElement::from_mono(vec![0.5; 10 * SR as usize], SR));
    (session, scheduler, element)
}

fn fade_in_params() -> FadeParams {
    FadeParams {
        fade_in_seconds: 2.0,
        fade_out_seconds: 0.0,
        region_start: 0.0,
        region_end: 10.0,
        is_inverted: false,
        total_duration: 10.0,
    }
}

fn peak(session: &PreviewSession) -> f32 {
    let mut out = vec![Vec::new(), Vec::new()];
    assert!(session.render(&mut out));
    out[0].iter().fold(0.0_f32, |m, s| m.max(s.abs()))
}

#[test]
fn test_fade_follows_playback_position() {
    let (mut session, scheduler, element) = setup();
    assert!(session.connect_audio_element(element.clone()));
    session.update_fade_config(fade_in_params()).unwrap();

    element.play();
    session.set_fade_active(true);
    assert_eq!(session.fade_state(), FadeState::Animating);
    assert!(peak(&session) < 0.01);

    element.set_current_time(5.0);
    scheduler.run_frame(16.0);
    assert!((peak(&session) - 0.5).abs() < 1e-3);

    element.set_current_time(1.0);
    scheduler.run_frame(32.0);
    let expected = compute_multiplier(1.0, &session.fade_config());
    let gain = session.fade_gain().unwrap().value();
    assert!((gain - expected).abs() < 1e-6);
}

#[test]
fn test_pause_ends_loop_and_restores_unity() {
    let (mut session, scheduler, element) = setup();
    assert!(session.connect_audio_element(element.clone()));
    session.update_fade_config(fade_in_params()).unwrap();
    element.play();
    session.set_fade_active(true);

    element.pause();
    scheduler.run_frame(16.0);
    assert_eq!(session.fade_state(), FadeState::Idle);
    assert_eq!(scheduler.pending(), 0);
    assert_eq!(session.fade_gain().unwrap().value(), 1.0);
}

#[test]
fn test_disconnect_cancels_fade_first() {
    let (mut session, scheduler, element) = setup();
    assert!(session.connect_audio_element(element.clone()));
    session.update_fade_config(fade_in_params()).unwrap();
    element.play();
    session.set_fade_active(true);
    let gain = session.fade_gain().unwrap();

    session.disconnect();
    session.disconnect();
    assert_eq!(scheduler.pending(), 0);
    assert_eq!(scheduler.run_frame(16.0), 0);
    assert_eq!(gain.value(), 1.0);
    assert!(!session.is_connected());
}

#[test]
fn test_config_change_while_playing_restarts_loop() {
    let (mut session, scheduler, element) = setup();
    assert!(session.connect_audio_element(element.clone()));
    element.play();
    session.set_fade_active(true);
    assert_eq!(session.fade_state(), FadeState::Idle);

    session.update_fade_config(fade_in_params()).unwrap();
    assert_eq!(session.fade_state(), FadeState::Animating);
    assert_eq!(scheduler.pending(), 1);

    session.clear_fade_selection(10.0);
    scheduler.run_frame(16.0);
    assert_eq!(session.fade_state(), FadeState::Idle);
}

#[test]
fn test_invalid_fade_config_rejected() {
    let (mut session, _, _) = setup();
    let bad = FadeParams {
        region_start: 4.0,
        region_end: 2.0,
        ..fade_in_params()
    };
    assert!(session.update_fade_config(bad).is_err());
    assert!(!session.fade_config().is_active());
}

#[test]
fn test_connect_twice_is_idempotent() {
    let (mut session, _, element) = setup();
    assert!(session.connect_audio_element(element.clone()));
    let before = session.controller().topology();
    assert!(session.connect_audio_element(element));
    assert_eq!(session.controller().topology(), before);
}

#[test]
fn test_master_volume_scales_output() {
    let (mut session, _, element) = setup();
    assert!(session.connect_audio_element(element.clone()));
    element.play();

    session.set_master_volume(3.0);
    assert_eq!(session.master_volume(), 2.0);
    assert!((peak(&session) - 1.0).abs() < 1e-3);
}

#[test]
fn test_equalizer_band_clamped() {
    let (mut session, _, element) = setup();
    assert!(session.connect_audio_element(element));
    session.update_equalizer_band(2, 999.0);
    assert_eq!(session.equalizer_gains()[2], 12.0);

    session.update_equalizer_values(&[1.0; 3]);
    assert_eq!(session.equalizer_gains()[0], 0.0);

    session.update_equalizer_values(&[-20.0; BAND_COUNT]);
    assert_eq!(session.equalizer_gains(), [-12.0; BAND_COUNT]);

    session.reset_equalizer();
    assert_eq!(session.equalizer_gains(), [0.0; BAND_COUNT]);
}

#[test]
fn test_playback_rate_uses_element() {
    let (mut session, _, element) = setup();
    assert!(session.connect_audio_element(element.clone()));
    assert!(session.set_playback_rate(1.5));
    assert_eq!(element.playback_rate(), 1.5);

    let pitch = session.controller().pitch_params().unwrap();
    assert_eq!(pitch.rate.value(), 1.0);
}

#[test]
fn test_analyser_sees_output() {
    let (mut session, _, element) = setup();
    assert!(session.connect_audio_element(element.clone()));
    element.play();
    peak(&session);

    let tap = session.analyser().unwrap();
    assert!((tap.peak() - 0.5).abs() < 1e-3);
}
