//! Browser bindings
//!
//! The page owns the render loop and the audio worklet; these wrappers run
//! the physics and the synthesizer on its behalf.

use wasm_bindgen::prelude::*;

use crate::audio::{MusicHandle, Opl, Player, Song};
use crate::settings::Settings;
use crate::sim::{
    Controller, ControllerState, DemoController, FrameClock, GameSnapshot, InputController,
    InterpolatingSnapshots, LatestSnapshot, Level, LiveInput, ShipEvent, SnapshotProvider,
    StateManager, TickOutcome,
};

#[wasm_bindgen(start)]
pub fn start() {
    console_error_panic_hook::set_once();
    // Fails only if a logger is already installed
    console_log::init_with_level(log::Level::Info).ok();
    log::info!("Open Roads starting");
}

fn js_error(err: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&err.to_string())
}

/// One level being played in the page
#[wasm_bindgen]
pub struct WasmGame {
    state: StateManager,
    clock: FrameClock,
    snapshots: Box<dyn SnapshotProvider>,
    input: LiveInput,
    events: Vec<ShipEvent>,
}

#[wasm_bindgen]
impl WasmGame {
    /// `demo` replaces live input with a recorded tape
    #[wasm_bindgen(constructor)]
    pub fn new(
        name: &str,
        level_bytes: &[u8],
        demo: Option<Vec<u8>>,
        interpolate: bool,
    ) -> Result<WasmGame, JsValue> {
        let level = Level::from_decoded(name, level_bytes).map_err(js_error)?;
        let input = LiveInput::new();
        let controller: Box<dyn Controller> = match demo {
            Some(tape) => Box::new(DemoController::new(tape)),
            None => Box::new(InputController::new(input.clone())),
        };
        let snapshots: Box<dyn SnapshotProvider> = if interpolate {
            Box::new(InterpolatingSnapshots::default())
        } else {
            Box::new(LatestSnapshot::default())
        };

        Ok(Self {
            state: StateManager::new(level, controller),
            clock: FrameClock::new(),
            snapshots,
            input,
            events: Vec::new(),
        })
    }

    pub fn set_input(&self, turn: i8, accel: i8, jump: bool) -> Result<(), JsValue> {
        let state = ControllerState::new(turn, accel, jump).map_err(js_error)?;
        self.input.set(state);
        Ok(())
    }

    /// Feed `dt` seconds of frame time at page time `now` (seconds);
    /// returns the number of physics ticks run
    pub fn advance(&mut self, dt: f64, now: f64) -> usize {
        let produced = self.clock.advance(dt, &mut self.state, &mut self.events);
        let ticks = produced.len();
        for snapshot in produced {
            self.snapshots.push(snapshot, now);
        }
        ticks
    }

    /// Snapshot to draw at `now` as JSON, or `undefined` before the first tick
    pub fn snapshot_json(&self, now: f64) -> Result<Option<String>, JsValue> {
        self.snapshots
            .snapshot(now)
            .map(|s: GameSnapshot| serde_json::to_string(&s).map_err(js_error))
            .transpose()
    }

    /// `[x, y, z]` to draw at `now`
    pub fn position(&self, now: f64) -> Option<Vec<f64>> {
        self.snapshots
            .snapshot(now)
            .map(|s| s.position.to_array().to_vec())
    }

    /// Ship events since the last call, by name
    pub fn drain_events(&mut self) -> js_sys::Array {
        self.events
            .drain(..)
            .map(|e| JsValue::from_str(&format!("{e:?}")))
            .collect()
    }

    pub fn progress(&self) -> f64 {
        self.state.track_progress()
    }

    pub fn did_win(&self) -> bool {
        self.state.did_win()
    }

    pub fn outcome(&self) -> String {
        match self.state.outcome() {
            TickOutcome::Running => "Running".to_string(),
            TickOutcome::Won => "Won".to_string(),
            TickOutcome::Lost(state) => format!("{state:?}"),
        }
    }

    pub fn reset(&mut self) {
        self.state.reset();
        self.clock.reset();
        self.snapshots.reset();
        self.events.clear();
    }
}

/// Music synthesizer driven from an audio worklet
#[wasm_bindgen]
pub struct WasmMusic {
    opl: Opl,
    handle: MusicHandle,
    scratch: Vec<f32>,
}

#[wasm_bindgen]
impl WasmMusic {
    /// `songs` is an array of decoded song byte arrays; `instruments[i]`
    /// is the instrument count of song `i`
    #[wasm_bindgen(constructor)]
    pub fn new(
        sample_rate: u32,
        songs: js_sys::Array,
        instruments: Vec<u16>,
    ) -> Result<WasmMusic, JsValue> {
        let songs = songs
            .iter()
            .zip(instruments)
            .map(|(bytes, count)| {
                let data = js_sys::Uint8Array::new(&bytes).to_vec();
                Song::new(data, count).map_err(js_error)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let handle = MusicHandle::new();
        let mut opl = Opl::new(sample_rate);
        opl.set_source(Some(Box::new(Player::new(songs, handle.clone()))));
        Ok(Self {
            opl,
            handle,
            scratch: Vec::new(),
        })
    }

    /// Negative numbers stop the music
    pub fn play_song(&self, song: i32) {
        self.handle.request_song(usize::try_from(song).ok());
    }

    pub fn set_gain(&self, gain: f32) {
        self.handle.set_gain(gain);
    }

    pub fn apply_settings_json(&self, json: &str) -> Result<(), JsValue> {
        let settings = Settings::from_json(json).map_err(js_error)?;
        self.handle.set_gain(settings.effective_music_gain());
        Ok(())
    }

    pub fn fill(&mut self, buffer: &js_sys::Float32Array) -> bool {
        self.scratch.resize(buffer.length() as usize, 0.0);
        let more = self.opl.fill_audio_buffer(&mut self.scratch);
        buffer.copy_from(&self.scratch);
        more
    }
}
