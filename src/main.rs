// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Headless driver for the nowcast engine.
//!
//! Loads the time series for the configured mode, then plays through it,
//! waiting for every base map and overlay tile of each frame before stepping
//! to the next one.
//!
//! Unlike an interactive viewer, autoplay here is gated on tile loading: the
//! fixed-interval timer is only polled once the shown frame is complete (or
//! has stalled), so each logged frame reflects fully loaded tiles. The
//! timeline itself still advances on its own clock.

mod config;

use std::error::Error;
use std::time::{Duration, Instant};

use chrono::Utc;
use clap::Parser;
use log::{info, warn};
use nowcast_core::{Engine, NowcastMode};

use crate::config::AppConfig;

/// How long to wait for a repaint signal between polls.
const POLL_INTERVAL: Duration = Duration::from_millis(33);

/// Plays the JMA precipitation nowcast over the GSI base map without a window
#[derive(Parser, Debug)]
#[command(name = "nowcast-viewer")]
#[command(version, about)]
struct Args {
    /// Map center longitude
    #[arg(long)]
    lon: Option<f64>,

    /// Map center latitude
    #[arg(long)]
    lat: Option<f64>,

    /// Continuous zoom level
    #[arg(long)]
    zoom: Option<f64>,

    /// Use the forecast series instead of observations
    #[arg(long)]
    forecast: bool,

    /// Number of frames to play before exiting
    #[arg(long, default_value_t = 12)]
    frames: usize,

    /// Viewport width in pixels
    #[arg(long)]
    width: Option<f64>,

    /// Viewport height in pixels
    #[arg(long)]
    height: Option<f64>,

    /// Print the config file location and effective settings, then exit
    #[arg(long)]
    print_config: bool,
}

impl Args {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(lon) = self.lon {
            config.start_lon = lon;
        }
        if let Some(lat) = self.lat {
            config.start_lat = lat;
        }
        if let Some(zoom) = self.zoom {
            config.start_zoom = zoom;
        }
        if let Some(width) = self.width {
            config.viewport_width = width;
        }
        if let Some(height) = self.height {
            config.viewport_height = height;
        }
        if self.forecast {
            config.start_mode = NowcastMode::Forecast;
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!("Failed to load config, using defaults: {e}");
        AppConfig::default()
    });
    args.apply(&mut config);

    if args.print_config {
        println!("{}", AppConfig::get_config_path()?.display());
        println!("{config:#?}");
        return Ok(());
    }

    let mut engine = Engine::with_http(config.engine_config(), config.http_config())?;
    engine.set_mode(config.start_mode);
    if let Err(e) = engine.refresh_series() {
        warn!("No nowcast frames available, showing base map only: {e}");
    }

    let view = config.initial_view();
    let (lon, lat) = view.center_lon_lat();
    info!(
        "View {}x{} at zoom {:.2}, centered on {:.4}, {:.4}",
        view.width, view.height, view.zoom, lon, lat
    );

    // A frame that cannot finish in this long is skipped
    let stall_limit = config.http_config().timeout * 2;
    play(&mut engine, &view, args.frames, stall_limit);

    info!("Done: {:?}", engine.stats());
    Ok(())
}

fn play<D: nowcast_core::TileDecoder>(
    engine: &mut Engine<D>,
    view: &nowcast_core::ViewState,
    frames: usize,
    stall_limit: Duration,
) {
    let ready = engine.ready_signal();
    let mut shown = 0;
    let mut frame_started = Instant::now();
    let mut reported: Option<usize> = None;

    while shown < frames {
        let now = Instant::now();
        let frame = engine.frame(view, now);
        let index = engine.timeline().current_index();

        if frame.animating {
            let _ = ready.recv_timeout(POLL_INTERVAL);
            continue;
        }

        let stalled = now.duration_since(frame_started) > stall_limit;
        if frame.is_complete() || stalled {
            if reported != Some(index) {
                report(engine, index, frame.missing(), stalled);
                reported = Some(index);
                shown += 1;
            }
            if shown >= frames {
                break;
            }
            if engine.timeline_mut().poll_autoplay(now) {
                frame_started = now;
            } else if index + 1 >= engine.timeline().len() {
                info!("Reached the end of the series");
                break;
            }
        }

        let _ = ready.recv_timeout(POLL_INTERVAL);
    }
}

fn report<D: nowcast_core::TileDecoder>(
    engine: &Engine<D>,
    index: usize,
    missing: usize,
    stalled: bool,
) {
    let stats = engine.stats();
    let Some(time) = engine.timeline().get(index) else {
        info!("Base map loaded ({} tiles cached)", stats.decoded);
        return;
    };

    let age = time
        .valid_at()
        .map(|t| (Utc::now() - t).num_minutes())
        .map_or_else(String::new, |m| format!(" ({m} min ago)"));
    if stalled {
        warn!(
            "{} frame {}/{} {}{} gave up with {} tiles missing",
            engine.mode().display_name(),
            index + 1,
            engine.timeline().len(),
            time.label(),
            age,
            missing
        );
    } else {
        info!(
            "{} frame {}/{} {}{} ready, {} decoded, {} pending, {} queued",
            engine.mode().display_name(),
            index + 1,
            engine.timeline().len(),
            time.label(),
            age,
            stats.decoded,
            stats.pending,
            stats.queued_jobs
        );
    }
}
