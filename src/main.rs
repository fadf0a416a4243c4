//! Open Roads headless driver
//!
//! Replays a decoded level (optionally under a recorded demo tape) or renders
//! a decoded song to raw PCM. Asset decompression happens elsewhere.

#[cfg(not(target_arch = "wasm32"))]
mod native {
    use std::fs;
    use std::path::PathBuf;

    use anyhow::{Context, Result};
    use clap::{Parser, Subcommand};

    use open_roads::audio::{MusicHandle, Opl, Player, Song};
    use open_roads::consts::PHYSICS_DT;
    use open_roads::sim::{
        Controller, DemoController, FrameClock, Level, NullController, ShipEvent, StateManager,
        TickOutcome,
    };
    use open_roads::{Progress, Settings};

    const RENDER_CHUNK: usize = 1024;

    #[derive(Parser, Debug)]
    #[command(name = "open-roads")]
    #[command(about = "Headless level replays and song rendering")]
    struct Cli {
        #[command(subcommand)]
        command: Commands,
    }

    #[derive(Subcommand, Debug)]
    enum Commands {
        /// Replay a decoded level, optionally under a recorded demo tape
        Replay {
            #[arg(long)]
            level: PathBuf,
            /// Index recorded in the progress file on a win
            #[arg(long, default_value_t = 0)]
            level_number: usize,
            #[arg(long)]
            demo: Option<PathBuf>,
            #[arg(long, default_value_t = 30 * 60 * 10)]
            max_ticks: u64,
            #[arg(long)]
            progress: Option<PathBuf>,
        },
        /// Render a decoded song to raw f32 PCM
        Song {
            #[arg(long)]
            song: PathBuf,
            /// Number of instrument records at the head of the song
            #[arg(long)]
            instruments: u16,
            #[arg(long)]
            out: PathBuf,
            #[arg(long, default_value_t = 30.0)]
            seconds: f64,
            #[arg(long)]
            settings: Option<PathBuf>,
        },
    }

    fn replay(
        level_path: PathBuf,
        level_number: usize,
        demo: Option<PathBuf>,
        max_ticks: u64,
        progress_path: Option<PathBuf>,
    ) -> Result<()> {
        let bytes = fs::read(&level_path)
            .with_context(|| format!("reading level {}", level_path.display()))?;
        let name = level_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("level {level_number}"));
        let level = Level::from_decoded(name, &bytes)
            .with_context(|| format!("decoding level {}", level_path.display()))?;

        let controller: Box<dyn Controller> = match &demo {
            Some(path) => {
                let tape = fs::read(path)
                    .with_context(|| format!("reading demo {}", path.display()))?;
                Box::new(DemoController::new(tape))
            }
            None => Box::new(NullController),
        };

        let mut state = StateManager::new(level, controller);
        let mut clock = FrameClock::new();
        let mut events: Vec<ShipEvent> = Vec::new();

        while state.ticks() < max_ticks && state.outcome() == TickOutcome::Running {
            clock.advance(PHYSICS_DT, &mut state, &mut events);
        }

        let ship = state.ship();
        println!(
            "{:?} after {} ticks at z={:.3} (fuel {:.1}%, oxygen {:.1}%, {} events)",
            state.outcome(),
            state.ticks(),
            ship.z,
            ship.fuel / open_roads::consts::RESOURCE_MAX * 100.0,
            ship.oxygen / open_roads::consts::RESOURCE_MAX * 100.0,
            events.len()
        );

        if let (TickOutcome::Won, Some(path)) = (state.outcome(), progress_path) {
            let mut progress = match fs::read_to_string(&path) {
                Ok(json) => Progress::from_json(&json)
                    .with_context(|| format!("parsing progress {}", path.display()))?,
                Err(_) => Progress::new(),
            };
            progress.record_win(level_number);
            fs::write(&path, progress.to_json()?)
                .with_context(|| format!("writing progress {}", path.display()))?;
        }
        Ok(())
    }

    fn render_song(
        song_path: PathBuf,
        instruments: u16,
        seconds: f64,
        out: PathBuf,
        settings_path: Option<PathBuf>,
    ) -> Result<()> {
        let settings = settings_path
            .map(|p| Settings::load(&p))
            .unwrap_or_default();
        let data = fs::read(&song_path)
            .with_context(|| format!("reading song {}", song_path.display()))?;
        let song = Song::new(data, instruments)?;

        let handle = MusicHandle::new();
        handle.set_gain(settings.effective_music_gain());
        handle.request_song(Some(0));

        let mut opl = Opl::new(settings.output_sample_rate);
        opl.set_source(Some(Box::new(Player::new(vec![song], handle))));

        let total = (seconds.max(0.0) * settings.output_sample_rate as f64) as usize;
        let mut samples = vec![0.0f32; total];
        for chunk in samples.chunks_mut(RENDER_CHUNK) {
            opl.fill_audio_buffer(chunk);
        }

        fs::write(&out, bytemuck::cast_slice::<f32, u8>(&samples))
            .with_context(|| format!("writing {}", out.display()))?;
        log::info!(
            "Rendered {} samples at {} Hz to {}",
            total,
            settings.output_sample_rate,
            out.display()
        );
        Ok(())
    }

    pub fn run() -> Result<()> {
        env_logger::init();
        match Cli::parse().command {
            Commands::Replay {
                level,
                level_number,
                demo,
                max_ticks,
                progress,
            } => replay(level, level_number, demo, max_ticks, progress),
            Commands::Song {
                song,
                instruments,
                seconds,
                out,
                settings,
            } => render_song(song, instruments, seconds, out, settings),
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn main() -> anyhow::Result<()> {
    native::run()
}

#[cfg(target_arch = "wasm32")]
fn main() {
    // Browser entry points live in the library's `wasm` module
}
