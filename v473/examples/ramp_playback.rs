//! Plays a rotating square on channels 0 (x) and 1 (y), swapping ramp tables every cycle without a
//! glitch. Runs against the simulated card, which follows the trigger map like real TCLK would.

use std::f32::consts::PI;
use tracing_subscriber::EnvFilter;
use v473::prelude::*;

const CORNERS: [(f32, f32); 5] = [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5), (-0.5, -0.5)];
const SEGMENT_TICKS: u16 = 300;
const FULL_SCALE: f32 = 16000.0;

/// One ramp per axis tracing the square rotated by `angle` degrees
fn square(angle: f32) -> (Vec<RampEntry>, Vec<RampEntry>) {
    let (sin, cos) = (angle * PI / 180.0).sin_cos();
    CORNERS
        .iter()
        .map(|&(x, y)| {
            let (rx, ry) = (x * cos - y * sin, x * sin + y * cos);
            (
                RampEntry {
                    value: (rx * FULL_SCALE) as i16,
                    duration: SEGMENT_TICKS,
                },
                RampEntry {
                    value: (ry * FULL_SCALE) as i16,
                    duration: SEGMENT_TICKS,
                },
            )
        })
        .unzip()
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mock = Mock::new();
    let setup = PlayerSetup::default();
    mock.simulate_tclk(Some(setup.event));
    let card = Card::new(mock, 0x40, Config::default())?;

    let mut player = RampPlayer::new(&card, setup)?;
    for step in 0..36u8 {
        let (x, y) = square(f32::from(step) * 10.0);
        player.play(&[&x[..], &y[..]])?;
        tracing::info!(level = player.playing_level(), step, "Playing");
    }
    player.stop()
}
