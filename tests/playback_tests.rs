// Integration tests for reply playback with barge-in

use loqa_voice::audio::{
    AudioCaptureService, AudioPlaybackService, Interruption, ScriptedMicrophone, Segment,
    SpeakFailure, SpeakOutcome, TimedSpeaker,
};
use loqa_voice::error::ProviderError;
use loqa_voice::providers::scripted::ScriptedSynthesizer;
use std::sync::Arc;
use std::time::{Duration, Instant};

const RATE: u32 = 16000;

fn service(
    mic: &[Segment],
    speaker: TimedSpeaker,
    synthesizer: ScriptedSynthesizer,
) -> AudioPlaybackService {
    service_with_mic(
        ScriptedMicrophone::from_segments(mic, RATE),
        speaker,
        synthesizer,
    )
}

fn service_with_mic(
    mic: ScriptedMicrophone,
    speaker: TimedSpeaker,
    synthesizer: ScriptedSynthesizer,
) -> AudioPlaybackService {
    let capture = AudioCaptureService::new(
        Box::new(mic),
        Duration::from_millis(20),
        Duration::from_millis(20),
    );
    AudioPlaybackService::new(
        Box::new(speaker),
        Arc::new(synthesizer),
        capture,
        "onyx",
        1500,
        Duration::from_millis(10),
    )
}

#[tokio::test]
async fn test_barge_in_cuts_playback_short() {
    let synthesizer = ScriptedSynthesizer::new();
    synthesizer.push_duration(Duration::from_secs(2));
    let speaker = TimedSpeaker::new();
    // Quiet for a moment, then the user talks over the reply
    let playback = service(
        &[Segment::secs(100, 0.06), Segment::secs(2500, 5.0)],
        speaker.clone(),
        synthesizer,
    );

    let started = Instant::now();
    let report = playback.speak("A long answer that the user interrupts").await;

    assert!(started.elapsed() < Duration::from_millis(1500));
    assert!(matches!(
        report.outcome,
        SpeakOutcome::Interrupted(Interruption::BargeIn { rms: 2500 })
    ));
    assert_eq!(report.clip_duration, Duration::from_secs(2));

    let played = speaker.history();
    assert_eq!(played.len(), 1);
    assert!(played[0].stopped);
    assert!(played[0].played < Duration::from_secs(2));
}

#[tokio::test]
async fn test_barge_in_survives_a_failed_microphone_read() {
    let synthesizer = ScriptedSynthesizer::new();
    synthesizer.push_duration(Duration::from_secs(2));
    let speaker = TimedSpeaker::new();
    let mic = ScriptedMicrophone::from_segments(&[Segment::secs(3000, 5.0)], RATE)
        .with_failed_reads(1);
    let playback = service_with_mic(mic, speaker.clone(), synthesizer);

    let started = Instant::now();
    let report = playback.speak("The user talks over a glitching microphone").await;

    assert!(started.elapsed() < Duration::from_millis(1500));
    assert!(matches!(
        report.outcome,
        SpeakOutcome::Interrupted(Interruption::BargeIn { rms: 3000 })
    ));
    assert!(speaker.history()[0].stopped);
}

#[tokio::test]
async fn test_quiet_room_plays_to_completion() {
    let synthesizer = ScriptedSynthesizer::new();
    synthesizer.push_duration(Duration::from_millis(200));
    let speaker = TimedSpeaker::new();
    let playback = service(&[Segment::secs(300, 10.0)], speaker.clone(), synthesizer);

    let report = playback.speak("Short answer.").await;

    assert!(matches!(report.outcome, SpeakOutcome::Completed));
    assert_eq!(report.finished_at, playback.last_finished_at());
    assert!(!speaker.history()[0].stopped);
}

#[tokio::test]
async fn test_external_interrupt_stops_playback() {
    let synthesizer = ScriptedSynthesizer::new();
    synthesizer.push_duration(Duration::from_secs(3));
    let playback = service(&[Segment::secs(0, 10.0)], TimedSpeaker::new(), synthesizer);

    let interrupt = playback.interrupt_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        interrupt.notify_waiters();
    });

    let started = Instant::now();
    let report = playback.speak("Please stop me").await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(matches!(
        report.outcome,
        SpeakOutcome::Interrupted(Interruption::External)
    ));
    assert!(report.finished_at.is_some());
}

#[tokio::test]
async fn test_interrupt_while_idle_does_not_leak() {
    let synthesizer = ScriptedSynthesizer::new();
    synthesizer.push_duration(Duration::from_millis(100));
    let playback = service(&[Segment::secs(0, 10.0)], TimedSpeaker::new(), synthesizer);

    playback.interrupt();
    let report = playback.speak("Still heard in full").await;
    assert!(matches!(report.outcome, SpeakOutcome::Completed));
}

#[tokio::test]
async fn test_synthesis_failure_reports_without_audio() {
    let synthesizer = ScriptedSynthesizer::new();
    synthesizer.push_failure(ProviderError::Synthesis("quota exceeded".to_string()));
    let speaker = TimedSpeaker::new();
    let playback = service(&[Segment::secs(0, 1.0)], speaker.clone(), synthesizer);

    let report = playback.speak("never heard").await;

    assert!(matches!(
        report.outcome,
        SpeakOutcome::Failed(SpeakFailure::Synthesis(ProviderError::Synthesis(_)))
    ));
    assert!(report.finished_at.is_none());
    assert!(playback.last_finished_at().is_none());
    assert!(speaker.history().is_empty());
}

#[tokio::test]
async fn test_device_failure_is_reported() {
    let synthesizer = ScriptedSynthesizer::new();
    let playback = service(&[Segment::secs(0, 1.0)], TimedSpeaker::failing(), synthesizer);

    let report = playback.speak("into the void").await;

    assert!(matches!(
        report.outcome,
        SpeakOutcome::Failed(SpeakFailure::Playback(_))
    ));
    assert!(report.finished_at.is_some());
}

#[tokio::test]
async fn test_empty_text_is_skipped() {
    let synthesizer = ScriptedSynthesizer::new();
    let playback = service(&[Segment::secs(0, 1.0)], TimedSpeaker::new(), synthesizer.clone());

    let report = playback.speak("   ").await;

    assert!(matches!(report.outcome, SpeakOutcome::Skipped));
    assert!(synthesizer.texts().is_empty());
}
