//! Song playback through the sequencer and the FM engine

use open_roads::audio::player::note_frequency;
use open_roads::audio::{
    AudioSource, Mixer, MusicHandle, NoteSource, Opl, OscDesc, Player, Song, SongEvent,
    SoundEffect, Synth,
};
use proptest::prelude::*;

#[derive(Debug, Clone, PartialEq)]
enum NoteCall {
    Start(usize, u16, u8),
    Stop(usize),
}

#[derive(Default)]
struct NoteLog(Vec<NoteCall>);

impl Synth for NoteLog {
    fn set_channel_config(&mut self, _n: usize, _a: OscDesc, _b: OscDesc, _additive: bool, _feedback: u8) {}
    fn start_note(&mut self, channel: usize, freq_num: u16, block_num: u8) {
        self.0.push(NoteCall::Start(channel, freq_num, block_num));
    }
    fn stop_note(&mut self, channel: usize) {
        self.0.push(NoteCall::Stop(channel));
    }
    fn set_channel_volume(&mut self, _n: usize, _volume: f64) {}
}

/// Sustaining sine organ with fast envelopes
const ORGAN: [u8; 16] = [
    0x21, 0x10, 0xF0, 0x0F, 0x00, //
    0x21, 0x00, 0xF0, 0x0F, 0x00, //
    0x00, 0, 0, 0, 0, 0,
];

fn encode(events: &[SongEvent]) -> Song {
    let mut data = ORGAN.to_vec();
    for event in events {
        data.extend_from_slice(&event.encode());
    }
    Song::new(data, 1).unwrap()
}

fn note_event() -> impl Strategy<Value = SongEvent> {
    prop_oneof![
        (0u8..11, any::<u8>()).prop_map(|(channel, note)| SongEvent::Play { channel, note }),
        (0u8..11).prop_map(|channel| SongEvent::Stop { channel }),
        Just(SongEvent::Pause(0)),
    ]
}

proptest! {
    #[test]
    fn test_note_stream_round_trips(events in prop::collection::vec(note_event(), 0..64)) {
        let expected: Vec<NoteCall> = events
            .iter()
            .filter_map(|event| match *event {
                SongEvent::Play { channel, note } => {
                    let (freq, block) = note_frequency(note);
                    Some(NoteCall::Start(channel as usize, freq, block))
                }
                SongEvent::Stop { channel } => Some(NoteCall::Stop(channel as usize)),
                _ => None,
            })
            .collect();

        let mut player = Player::new(vec![encode(&events)], MusicHandle::new());
        let mut synth = NoteLog::default();
        player.load_song(0, &mut synth).unwrap();
        synth.0.clear();

        let mut ticks = 0;
        while player.is_playing() {
            player.read_note(&mut synth);
            ticks += 1;
            prop_assert!(ticks <= events.len() + 1);
        }
        prop_assert_eq!(synth.0, expected);
    }
}

fn looping_song() -> Song {
    encode(&[
        SongEvent::Configure { channel: 0, instrument: 0 },
        SongEvent::Save,
        SongEvent::Play { channel: 0, note: 48 },
        SongEvent::Pause(40),
        SongEvent::Stop { channel: 0 },
        SongEvent::Pause(10),
        SongEvent::Jump,
    ])
}

#[test]
fn test_requested_song_is_audible_and_stops() {
    let handle = MusicHandle::new();
    let mut opl = Opl::new(44100);
    opl.set_source(Some(Box::new(Player::new(vec![looping_song()], handle.clone()))));

    let mut buffer = vec![0.0f32; 4410];
    opl.fill_audio_buffer(&mut buffer);
    assert!(buffer.iter().all(|&s| s == 0.0));

    handle.request_song(Some(0));
    opl.fill_audio_buffer(&mut buffer);
    let peak = buffer.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    assert!(peak > 0.05, "peak {peak}");

    // Half gain halves the output
    handle.set_gain(0.5);
    let mut quieter = vec![0.0f32; 4410];
    opl.fill_audio_buffer(&mut quieter);
    let quiet_peak = quieter.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    assert!(quiet_peak < peak);

    handle.request_song(None);
    opl.fill_audio_buffer(&mut buffer);
    opl.fill_audio_buffer(&mut buffer);
    assert!(buffer.iter().all(|&s| s == 0.0));
}

#[test]
fn test_mixer_layers_effects_over_music() {
    let handle = MusicHandle::new();
    let mut opl = Opl::new(8000);
    opl.set_source(Some(Box::new(Player::new(vec![looping_song()], handle.clone()))));
    let mut mixer = Mixer::new(opl);
    mixer.set_effect_gain(1.0);

    mixer.play(&SoundEffect::from_pcm_u8(&[191; 400], 8000));
    let mut out = vec![0.0f32; 800];
    assert!(mixer.fill(&mut out));
    assert!(out[..400].iter().all(|&s| s == 0.5));
    assert!(out[400..].iter().all(|&s| s == 0.0));
    assert_eq!(mixer.active_effects(), 0);
}
