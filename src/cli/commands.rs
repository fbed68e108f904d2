//! CLI Command Implementations
//!
//! Implements the actual logic for each CLI command.

use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use super::session::Session;
use crate::engine::{export_wav, BitDepth};
use crate::mapper::interval_name;
use crate::playback::{extended_loop_end, repeat_count};
use crate::sequencer::Sequencer;
use crate::track::Track;
use crate::transport::TransportRunner;

fn load(path: &Path) -> Result<Sequencer> {
    let session = Session::load(path)
        .with_context(|| format!("failed to read session {}", path.display()))?;
    let (seq, _) = session.build(&Session::root_for(path))?;
    Ok(seq)
}

/// Print the session as the engine sees it.
pub fn inspect(path: &Path) -> Result<()> {
    info!("Inspecting session: {}", path.display());
    let seq = load(path)?;
    print!("{}", describe(&seq));
    Ok(())
}

/// Play the session in real time for `cycles` pattern cycles.
pub async fn play(path: &Path, cycles: u32) -> Result<()> {
    let seq = load(path)?;
    let length = seq.pattern_length();
    let total = Duration::from_secs_f64(seq.clock().cycle_duration() * cycles as f64);
    let mut playhead = seq.playhead();

    let shared = Arc::new(Mutex::new(seq));
    let runner = TransportRunner::spawn(Arc::clone(&shared))?;
    info!("Playing {} cycle(s), {:.2}s", cycles, total.as_secs_f64());

    // Redraw runs on its own task; the tick thread never waits for it
    let redraw = tokio::spawn(async move {
        while playhead.changed().await.is_ok() {
            let update = *playhead.borrow_and_update();
            if !update.state.is_running() {
                break;
            }
            print!("\r{} cycle {}", playhead_line(update.step, length), update.cycle + 1);
            let _ = std::io::stdout().flush();
        }
        println!();
    });

    tokio::time::sleep(total).await;
    tokio::task::spawn_blocking(move || runner.stop())
        .await
        .context("transport runner did not shut down")?;
    redraw.await.context("playhead task failed")?;

    Ok(())
}

/// Render `cycles` pattern cycles to a WAV file.
pub fn render(path: &Path, output: &Path, cycles: u32, bits: u16) -> Result<()> {
    let depth = BitDepth::from_bits(bits)?;
    let mut seq = load(path)?;

    info!("Rendering {} cycle(s) to {}", cycles, output.display());
    let buffer = seq.render_offline(cycles)?;
    export_wav(&buffer, output, depth)
        .with_context(|| format!("failed to write {}", output.display()))?;

    println!(
        "Rendered {:.2}s ({} frames) to {}",
        buffer.duration_secs(),
        buffer.len(),
        output.display()
    );
    Ok(())
}

/// Text report of tracks, transforms, loop extension and patterns
pub fn describe(seq: &Sequencer) -> String {
    let clock = seq.clock();
    let pattern_secs = clock.cycle_duration();
    let mut out = String::new();

    out.push_str(&format!(
        "Tempo {:.1} BPM | grid 1/{} | {} steps | step {:.4}s | cycle {:.3}s\n",
        clock.bpm(),
        clock.grid_division(),
        seq.pattern_length(),
        clock.step_duration(),
        pattern_secs
    ));
    out.push_str(&format!("{:-<72}\n", ""));

    for track in seq.tracks() {
        out.push_str(&describe_track(seq, track, pattern_secs));
    }
    out
}

fn describe_track(seq: &Sequencer, track: &Track, pattern_secs: f64) -> String {
    let factory = seq.graphs().factory();
    let transform = factory.select(track.playback_rate(), track.pitch_shift());
    let shift = track.pitch_shift().round() as i32;

    let mut flags = String::new();
    if track.is_muted() {
        flags.push_str(" [muted]");
    }
    if track.is_solo() {
        flags.push_str(" [solo]");
    }
    if track.is_locked() {
        flags.push_str(" [locked]");
    }

    let mut out = format!("{} ({}){}\n", track.name(), track.source(), flags);
    out.push_str(&format!(
        "  tempo  {:.1} -> {:.1} BPM, rate {:.4}\n",
        track.original_bpm(),
        track.current_bpm(),
        track.playback_rate()
    ));
    out.push_str(&format!(
        "  key    {} -> {} ({}), chain {}\n",
        track.original_key(),
        track.current_key(),
        interval_name(shift),
        transform.label()
    ));
    match track.loop_window() {
        Some(window) => out.push_str(&format!(
            "  loop   {:.3}-{:.3}s x{} -> end {:.3}s\n",
            window.start,
            window.end,
            repeat_count(pattern_secs, window.duration()),
            extended_loop_end(&window, pattern_secs)
        )),
        None => out.push_str("  loop   one-shot\n"),
    }

    let row: String = seq
        .patterns()
        .pattern(track.id())
        .unwrap_or(&[])
        .iter()
        .map(|&hit| if hit { 'x' } else { '.' })
        .collect();
    out.push_str(&format!("  steps  {}\n", row));

    let notes = seq.piano_roll().notes(track.id());
    if !notes.is_empty() {
        out.push_str(&format!("  notes  {}\n", notes.len()));
    }
    out
}

fn playhead_line(step: usize, length: usize) -> String {
    (0..length)
        .map(|i| if i == step { '>' } else { '.' })
        .collect()
}
