//! Song sequencer
//!
//! A decoded song is an instrument table (16 bytes per instrument) followed
//! by a stream of two-byte events. [`Player`] walks the stream once per
//! sequencer tick, feeding a [`Synth`] until it reaches a pause.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::handoff::MusicHandle;
use super::opl::{NoteSource, OscDesc, Synth, Waveform};
use super::tables::NOTE_FNUMS;

const SONG_HEADER_BYTES: usize = 6;
const INSTRUMENT_BYTES: usize = 16;
/// Bytes of an instrument record actually read: two operators and the channel byte
const INSTRUMENT_RECORD_BYTES: usize = 11;
/// Channels the sequencer may stop (melodic 0..6, drums 6..11)
const SEQUENCER_CHANNELS: u8 = 11;
/// Lowest block used for note number 0
const BASE_BLOCK: u8 = 2;
/// Upper bound on events consumed in one tick without reaching a pause
pub const MAX_EVENTS_PER_TICK: usize = 4096;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SongError {
    #[error("song {song} requested but the bank holds {count}")]
    OutOfRange { song: usize, count: usize },
    #[error("instrument table needs {needed} bytes but song data has {len}")]
    InstrumentsTooLarge { needed: usize, len: usize },
    #[error("song {song} data starts at {start_pos}, inside the header table")]
    StartInsideHeaders { song: usize, start_pos: u16 },
    #[error("song bank header truncated at byte {offset}")]
    HeaderTruncated { offset: usize },
}

/// Location and shape of one compressed song in a bank
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SongHeader {
    /// Byte offset of the compressed data in the bank
    pub start_pos: u16,
    pub num_instruments: u16,
    pub uncompressed_length: u16,
}

/// Header table of a song bank
///
/// The table runs from byte 0 up to the start of the first song's data.
#[derive(Debug, Clone, Default)]
pub struct SongBank {
    headers: Vec<SongHeader>,
}

impl SongBank {
    pub fn parse(bytes: &[u8]) -> Result<Self, SongError> {
        let read_header = |offset: usize| -> Result<SongHeader, SongError> {
            let raw = bytes
                .get(offset..offset + SONG_HEADER_BYTES)
                .ok_or(SongError::HeaderTruncated { offset })?;
            let word = |i: usize| u16::from_le_bytes([raw[i], raw[i + 1]]);
            Ok(SongHeader {
                start_pos: word(0),
                num_instruments: word(2),
                uncompressed_length: word(4),
            })
        };

        let first = read_header(0)?;
        let count = (first.start_pos as usize / SONG_HEADER_BYTES).max(1);
        let mut headers = Vec::with_capacity(count);
        for song in 0..count {
            let header = if song == 0 {
                first
            } else {
                read_header(song * SONG_HEADER_BYTES)?
            };
            if (header.start_pos as usize) < count * SONG_HEADER_BYTES {
                return Err(SongError::StartInsideHeaders {
                    song,
                    start_pos: header.start_pos,
                });
            }
            headers.push(header);
        }
        Ok(Self { headers })
    }

    pub fn header(&self, song: usize) -> Result<&SongHeader, SongError> {
        self.headers.get(song).ok_or(SongError::OutOfRange {
            song,
            count: self.headers.len(),
        })
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

/// A decoded song: instrument table plus event stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Song {
    data: Vec<u8>,
    num_instruments: u16,
}

impl Song {
    pub fn new(data: Vec<u8>, num_instruments: u16) -> Result<Self, SongError> {
        let needed = num_instruments as usize * INSTRUMENT_BYTES;
        if needed > data.len() {
            return Err(SongError::InstrumentsTooLarge {
                needed,
                len: data.len(),
            });
        }
        Ok(Self {
            data,
            num_instruments,
        })
    }

    pub fn from_header(header: &SongHeader, data: Vec<u8>) -> Result<Self, SongError> {
        if data.len() != header.uncompressed_length as usize {
            log::warn!(
                "Song data is {} bytes, header says {}",
                data.len(),
                header.uncompressed_length
            );
        }
        Self::new(data, header.num_instruments)
    }

    /// Offset of the first event
    pub fn stream_start(&self) -> usize {
        self.num_instruments as usize * INSTRUMENT_BYTES
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// One decoded sequencer command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SongEvent {
    /// Wait this many ticks (0 yields for the current tick only)
    Pause(u8),
    Configure { channel: u8, instrument: u8 },
    Play { channel: u8, note: u8 },
    Stop { channel: u8 },
    Volume { channel: u8, level: u8 },
    Jump,
    Save,
    Nop,
}

impl SongEvent {
    pub fn decode(low: u8, high: u8) -> Self {
        let channel = low >> 4;
        match low & 7 {
            0 => SongEvent::Pause(high),
            1 => SongEvent::Configure {
                channel,
                instrument: high,
            },
            2 => SongEvent::Play {
                channel,
                note: high,
            },
            3 => SongEvent::Stop { channel },
            4 => SongEvent::Volume {
                channel,
                level: high,
            },
            5 => SongEvent::Jump,
            6 => SongEvent::Save,
            _ => SongEvent::Nop,
        }
    }

    pub fn encode(self) -> [u8; 2] {
        match self {
            SongEvent::Pause(ticks) => [0, ticks],
            SongEvent::Configure {
                channel,
                instrument,
            } => [channel << 4 | 1, instrument],
            SongEvent::Play { channel, note } => [channel << 4 | 2, note],
            SongEvent::Stop { channel } => [channel << 4 | 3, 0],
            SongEvent::Volume { channel, level } => [channel << 4 | 4, level],
            SongEvent::Jump => [5, 0],
            SongEvent::Save => [6, 0],
            SongEvent::Nop => [7, 0],
        }
    }
}

/// F-number and block for a sequencer note number
pub fn note_frequency(note: u8) -> (u16, u8) {
    (NOTE_FNUMS[(note % 12) as usize], note / 12 + BASE_BLOCK)
}

/// 6-bit attenuation code to dB
pub fn attenuation_db(level: u8) -> f64 {
    (level & 0x3F) as f64 / 63.0 * -47.25
}

/// Two operators and channel routing as stored in a song
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Instrument {
    pub a: OscDesc,
    pub b: OscDesc,
    pub additive: bool,
    pub feedback: u8,
}

impl Instrument {
    /// Parse a record; `None` if fewer than 11 bytes are available
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let record: &[u8; INSTRUMENT_RECORD_BYTES] =
            bytes.get(..INSTRUMENT_RECORD_BYTES)?.try_into().ok()?;
        let channel = record[10];
        Some(Self {
            a: parse_operator([record[0], record[1], record[2], record[3], record[4]]),
            b: parse_operator([record[5], record[6], record[7], record[8], record[9]]),
            additive: channel & 1 != 0,
            feedback: (channel & 14) >> 1,
        })
    }
}

fn parse_operator([flags, level, attack_decay, sustain_release, wave]: [u8; 5]) -> OscDesc {
    OscDesc {
        tremolo: flags & 0x80 != 0,
        vibrato: flags & 0x40 != 0,
        sound_sustaining: flags & 0x20 != 0,
        key_scaling: flags & 0x10 != 0,
        multiplication: flags & 0x0F,
        key_scale_level: level >> 6,
        output_level: attenuation_db(level),
        attack_rate: attack_decay >> 4,
        decay_rate: attack_decay & 0x0F,
        sustain_level: -45.0 * (sustain_release >> 4) as f64 / 15.0,
        release_rate: sustain_release & 0x0F,
        waveform: Waveform::from_code(wave),
    }
}

/// Sequencer over a set of decoded songs
pub struct Player {
    songs: Vec<Song>,
    handle: MusicHandle,
    /// Serial of the last handle request acted upon
    seen_request: u32,
    current_song: Option<usize>,
    /// Read offset into the current song; `None` when nothing plays
    position: Option<usize>,
    paused: u8,
    jump_pos: usize,
    warned_end: bool,
    warned_overlong: bool,
    warned_instrument: bool,
}

impl Player {
    pub fn new(songs: Vec<Song>, handle: MusicHandle) -> Self {
        Self {
            songs,
            handle,
            seen_request: 0,
            current_song: None,
            position: None,
            paused: 0,
            jump_pos: 0,
            warned_end: false,
            warned_overlong: false,
            warned_instrument: false,
        }
    }

    pub fn handle(&self) -> &MusicHandle {
        &self.handle
    }

    pub fn current_song(&self) -> Option<usize> {
        self.current_song
    }

    pub fn is_playing(&self) -> bool {
        self.position.is_some()
    }

    /// Start song `n` from the top. Loading the song already playing does nothing.
    pub fn load_song(&mut self, n: usize, synth: &mut dyn Synth) -> Result<(), SongError> {
        if self.current_song == Some(n) && self.is_playing() {
            return Ok(());
        }
        let song = self.songs.get(n).ok_or(SongError::OutOfRange {
            song: n,
            count: self.songs.len(),
        })?;
        let start = song.stream_start();
        log::info!(
            "Loading song {} ({} bytes, {} instruments)",
            n,
            song.data.len(),
            song.num_instruments
        );

        self.current_song = Some(n);
        self.position = Some(start);
        self.jump_pos = start;
        self.paused = 0;
        self.stop_sequencer_channels(synth);
        Ok(())
    }

    /// Silence the sequencer and forget the current song
    pub fn stop(&mut self, synth: &mut dyn Synth) {
        self.current_song = None;
        self.position = None;
        self.paused = 0;
        self.stop_sequencer_channels(synth);
    }

    fn stop_sequencer_channels(&self, synth: &mut dyn Synth) {
        for channel in 0..SEQUENCER_CHANNELS {
            synth.stop_note(channel as usize);
        }
    }

    fn poll_handle(&mut self, synth: &mut dyn Synth) {
        let serial = self.handle.request_serial();
        if serial == self.seen_request {
            return;
        }
        self.seen_request = serial;

        match self.handle.requested_song() {
            None => self.stop(synth),
            Some(n) => {
                if let Err(err) = self.load_song(n, synth) {
                    log::warn!("Cannot play song {}: {}", n, err);
                    self.stop(synth);
                }
            }
        }
    }

    fn next_event(&mut self) -> Option<SongEvent> {
        let song = self.songs.get(self.current_song?)?;
        let pos = self.position?;
        let low = *song.data.get(pos)?;
        let high = *song.data.get(pos + 1)?;
        self.position = Some(pos + 2);
        Some(SongEvent::decode(low, high))
    }

    fn configure_instrument(&mut self, channel: u8, instrument: u8, synth: &mut dyn Synth) {
        let parsed = self
            .current_song
            .and_then(|n| self.songs.get(n))
            .and_then(|song| song.data.get(instrument as usize * INSTRUMENT_BYTES..))
            .and_then(Instrument::parse);

        match parsed {
            Some(inst) => {
                synth.set_channel_config(channel as usize, inst.a, inst.b, inst.additive, inst.feedback)
            }
            None if !self.warned_instrument => {
                log::warn!("Instrument {} lies outside the song data", instrument);
                self.warned_instrument = true;
            }
            None => {}
        }
    }

    fn stop_if_sequenced(channel: u8, synth: &mut dyn Synth) {
        if channel < SEQUENCER_CHANNELS {
            synth.stop_note(channel as usize);
        }
    }
}

impl NoteSource for Player {
    fn read_note(&mut self, synth: &mut dyn Synth) {
        self.poll_handle(synth);
        if self.position.is_none() {
            return;
        }
        if self.paused > 0 {
            self.paused -= 1;
            return;
        }

        for _ in 0..MAX_EVENTS_PER_TICK {
            let Some(event) = self.next_event() else {
                if !self.warned_end {
                    log::warn!("Song {:?} ran past the end of its data", self.current_song);
                    self.warned_end = true;
                }
                self.current_song = None;
                self.position = None;
                return;
            };

            match event {
                SongEvent::Pause(ticks) => {
                    self.paused = ticks;
                    return;
                }
                SongEvent::Configure {
                    channel,
                    instrument,
                } => {
                    Self::stop_if_sequenced(channel, synth);
                    self.configure_instrument(channel, instrument, synth);
                }
                SongEvent::Play { channel, note } => {
                    if channel < SEQUENCER_CHANNELS {
                        let (freq_num, block_num) = note_frequency(note);
                        synth.start_note(channel as usize, freq_num, block_num);
                    }
                }
                SongEvent::Stop { channel } => Self::stop_if_sequenced(channel, synth),
                SongEvent::Volume { channel, level } => {
                    synth.set_channel_volume(channel as usize, attenuation_db(level))
                }
                SongEvent::Jump => self.position = Some(self.jump_pos),
                SongEvent::Save => {
                    if let Some(pos) = self.position {
                        self.jump_pos = pos;
                    }
                }
                SongEvent::Nop => {}
            }
        }

        if !self.warned_overlong {
            log::warn!(
                "Song {:?} ran {} events without a pause",
                self.current_song,
                MAX_EVENTS_PER_TICK
            );
            self.warned_overlong = true;
        }
    }

    fn gain(&self) -> f32 {
        self.handle.gain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Config(usize, bool, u8),
        Start(usize, u16, u8),
        Stop(usize),
        Volume(usize, f64),
    }

    #[derive(Default)]
    struct Recorder {
        calls: Vec<Call>,
    }

    impl Synth for Recorder {
        fn set_channel_config(&mut self, n: usize, _a: OscDesc, _b: OscDesc, additive: bool, feedback: u8) {
            self.calls.push(Call::Config(n, additive, feedback));
        }
        fn start_note(&mut self, channel: usize, freq_num: u16, block_num: u8) {
            self.calls.push(Call::Start(channel, freq_num, block_num));
        }
        fn stop_note(&mut self, channel: usize) {
            self.calls.push(Call::Stop(channel));
        }
        fn set_channel_volume(&mut self, n: usize, volume: f64) {
            self.calls.push(Call::Volume(n, volume));
        }
    }

    const PIANO: [u8; 16] = [
        0xA1, 0x4A, 0xF2, 0x53, 0x01, // operator A
        0x21, 0x00, 0xF4, 0x27, 0x00, // operator B
        0x07, 0, 0, 0, 0, 0,
    ];

    fn song(events: &[SongEvent]) -> Song {
        let mut data = PIANO.to_vec();
        for event in events {
            data.extend_from_slice(&event.encode());
        }
        Song::new(data, 1).unwrap()
    }

    fn loaded(events: &[SongEvent]) -> (Player, Recorder) {
        let mut player = Player::new(vec![song(events)], MusicHandle::new());
        let mut synth = Recorder::default();
        player.load_song(0, &mut synth).unwrap();
        synth.calls.clear();
        (player, synth)
    }

    #[test]
    fn test_event_decoding() {
        assert_eq!(SongEvent::decode(0x32, 50), SongEvent::Play { channel: 3, note: 50 });
        // Bit 3 is not part of the function code
        assert_eq!(SongEvent::decode(0x3A, 50), SongEvent::Play { channel: 3, note: 50 });
        assert_eq!(SongEvent::decode(0x00, 7), SongEvent::Pause(7));
        assert_eq!(SongEvent::decode(0xF5, 0xFF), SongEvent::Jump);
        assert_eq!(SongEvent::Volume { channel: 9, level: 63 }.encode(), [0x94, 63]);
    }

    #[test]
    fn test_note_frequency() {
        assert_eq!(note_frequency(0), (0x0AC, 2));
        assert_eq!(note_frequency(45), (0x122, 5));
        assert_eq!(note_frequency(23), (0x145, 3));
    }

    #[test]
    fn test_instrument_parsing() {
        let inst = Instrument::parse(&PIANO).unwrap();
        assert!(inst.a.tremolo && !inst.a.vibrato && inst.a.sound_sustaining);
        assert_eq!(inst.a.multiplication, 1);
        assert_eq!(inst.a.key_scale_level, 1);
        assert!((inst.a.output_level - attenuation_db(0x0A)).abs() < 1e-12);
        assert_eq!((inst.a.attack_rate, inst.a.decay_rate), (15, 2));
        assert!((inst.a.sustain_level + 15.0).abs() < 1e-12);
        assert_eq!(inst.a.release_rate, 3);
        assert_eq!(inst.a.waveform, Waveform::HalfSine);
        assert_eq!(inst.b.output_level, 0.0);
        assert!(inst.additive);
        assert_eq!(inst.feedback, 3);

        assert!(Instrument::parse(&PIANO[..10]).is_none());
    }

    #[test]
    fn test_song_bank_parse() {
        let mut bank = Vec::new();
        for header in [[12u16, 2, 100], [40, 5, 300]] {
            for word in header {
                bank.extend_from_slice(&word.to_le_bytes());
            }
        }
        let parsed = SongBank::parse(&bank).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed.header(1).unwrap().num_instruments, 5);
        assert_eq!(
            parsed.header(2),
            Err(SongError::OutOfRange { song: 2, count: 2 })
        );

        // Second song pointing back into the header table
        bank[6] = 4;
        bank[7] = 0;
        assert_eq!(
            SongBank::parse(&bank).unwrap_err(),
            SongError::StartInsideHeaders { song: 1, start_pos: 4 }
        );
        assert_eq!(
            SongBank::parse(&bank[..8]).unwrap_err(),
            SongError::HeaderTruncated { offset: 6 }
        );
    }

    #[test]
    fn test_instrument_table_must_fit() {
        assert_eq!(
            Song::new(vec![0; 20], 2),
            Err(SongError::InstrumentsTooLarge { needed: 32, len: 20 })
        );
    }

    #[test]
    fn test_load_song_stops_channels_once() {
        let mut player = Player::new(vec![song(&[])], MusicHandle::new());
        let mut synth = Recorder::default();
        player.load_song(0, &mut synth).unwrap();
        assert_eq!(synth.calls.len(), 11);
        assert!(synth.calls.iter().all(|c| matches!(c, Call::Stop(n) if *n < 11)));

        player.load_song(0, &mut synth).unwrap();
        assert_eq!(synth.calls.len(), 11);

        assert_eq!(
            player.load_song(4, &mut synth),
            Err(SongError::OutOfRange { song: 4, count: 1 })
        );
    }

    #[test]
    fn test_pause_save_and_jump() {
        let (mut player, mut synth) = loaded(&[
            SongEvent::Save,
            SongEvent::Configure { channel: 0, instrument: 0 },
            SongEvent::Play { channel: 0, note: 45 },
            SongEvent::Pause(2),
            SongEvent::Stop { channel: 0 },
            SongEvent::Pause(0),
            SongEvent::Jump,
        ]);

        player.read_note(&mut synth);
        assert_eq!(
            synth.calls,
            vec![Call::Stop(0), Call::Config(0, true, 3), Call::Start(0, 0x122, 5)]
        );

        synth.calls.clear();
        player.read_note(&mut synth);
        player.read_note(&mut synth);
        assert!(synth.calls.is_empty());

        player.read_note(&mut synth);
        assert_eq!(synth.calls, vec![Call::Stop(0)]);

        synth.calls.clear();
        player.read_note(&mut synth);
        assert_eq!(
            synth.calls,
            vec![Call::Stop(0), Call::Config(0, true, 3), Call::Start(0, 0x122, 5)]
        );
        assert!(player.is_playing());
    }

    #[test]
    fn test_channel_limits_and_volume() {
        let (mut player, mut synth) = loaded(&[
            SongEvent::Play { channel: 11, note: 10 },
            SongEvent::Stop { channel: 12 },
            SongEvent::Play { channel: 7, note: 10 },
            SongEvent::Volume { channel: 2, level: 0x3F },
            SongEvent::Nop,
            SongEvent::Pause(9),
        ]);
        player.read_note(&mut synth);
        assert_eq!(
            synth.calls,
            vec![Call::Start(7, 0x133, 2), Call::Volume(2, -47.25)]
        );
    }

    #[test]
    fn test_end_of_stream_stops_playback() {
        let (mut player, mut synth) = loaded(&[SongEvent::Play { channel: 1, note: 12 }]);
        player.read_note(&mut synth);
        assert_eq!(synth.calls, vec![Call::Start(1, 0x0AC, 3)]);
        assert!(!player.is_playing());

        synth.calls.clear();
        player.read_note(&mut synth);
        assert!(synth.calls.is_empty());
    }

    #[test]
    fn test_endless_loop_is_capped() {
        let (mut player, mut synth) = loaded(&[
            SongEvent::Save,
            SongEvent::Play { channel: 0, note: 0 },
            SongEvent::Jump,
        ]);
        player.read_note(&mut synth);
        // Save once, then Play/Jump pairs until the cap
        assert_eq!(synth.calls.len(), MAX_EVENTS_PER_TICK / 2);
        assert!(player.is_playing());
    }

    #[test]
    fn test_handle_requests_switch_songs() {
        let handle = MusicHandle::new();
        handle.set_gain(0.5);
        let songs = vec![
            song(&[SongEvent::Pause(255)]),
            song(&[SongEvent::Play { channel: 2, note: 30 }, SongEvent::Pause(255)]),
        ];
        let mut player = Player::new(songs, handle.clone());
        let mut synth = Recorder::default();

        player.read_note(&mut synth);
        assert!(synth.calls.is_empty());
        assert_eq!(player.gain(), 0.5);

        handle.request_song(Some(1));
        player.read_note(&mut synth);
        assert_eq!(player.current_song(), Some(1));
        assert_eq!(synth.calls.last(), Some(&Call::Start(2, 0x0F3, 4)));

        handle.request_song(Some(7));
        player.read_note(&mut synth);
        assert!(!player.is_playing());
        assert_eq!(player.current_song(), None);

        handle.request_song(None);
        player.read_note(&mut synth);
        assert_eq!(player.current_song(), None);
    }

    #[test]
    fn test_repeated_request_restarts_finished_song() {
        let handle = MusicHandle::new();
        let songs = vec![song(&[SongEvent::Play { channel: 1, note: 12 }])];
        let mut player = Player::new(songs, handle.clone());
        let mut synth = Recorder::default();

        handle.request_song(Some(0));
        player.read_note(&mut synth);
        assert!(!player.is_playing());
        assert_eq!(player.current_song(), None);

        synth.calls.clear();
        handle.request_song(Some(0));
        player.read_note(&mut synth);
        assert_eq!(synth.calls.last(), Some(&Call::Start(1, 0x0AC, 3)));
    }

    #[test]
    fn test_failed_request_can_be_retried_after_success() {
        let handle = MusicHandle::new();
        let songs = vec![song(&[SongEvent::Pause(255)])];
        let mut player = Player::new(songs, handle.clone());
        let mut synth = Recorder::default();

        handle.request_song(Some(3));
        player.read_note(&mut synth);
        assert_eq!(player.current_song(), None);

        handle.request_song(Some(0));
        player.read_note(&mut synth);
        assert_eq!(player.current_song(), Some(0));
        assert!(player.is_playing());

        // Asking again for the song already playing leaves it alone
        synth.calls.clear();
        handle.request_song(Some(0));
        player.read_note(&mut synth);
        assert!(synth.calls.is_empty());
        assert!(player.is_playing());
    }
}
