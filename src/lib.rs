//! Host-side glue for driving the core headless.
//!
//! Frame counting is done by audio samples rather than video: the APU
//! produces samples at a fixed rate even when the LCD (or the APU
//! itself) is switched off, so "N frames" is always well defined.

use std::time::{Duration, Instant};

pub use brick_core::{Emulator, Error, Events, HEIGHT, WIDTH};

/// Audio bytes produced per video frame: one stereo pair per APU cycle,
/// two APU cycles per M-cycle.
pub const CHANNEL_SAMPLES_PER_FRAME: usize = brick_core::FRAME_CYCLES as usize;

/// Run for `frames` frames worth of audio, then stop at the next frame
/// edge. Returns the final event set; TIMEOUT means the wall clock ran
/// out first.
pub fn run_frames(emulator: &mut Emulator, frames: u32, timeout: Duration) -> Events {
    let deadline = Instant::now() + timeout;
    let chunk = CHANNEL_SAMPLES_PER_FRAME;
    let mut remaining = frames as usize * CHANNEL_SAMPLES_PER_FRAME;
    let mut finish_at_next_frame = false;
    let mut event = Events::empty();
    loop {
        event = emulator.run_until(event, chunk, Some(deadline));
        if event.contains(Events::TIMEOUT) {
            log::warn!("run_frames timed out with {remaining} samples to go");
            return event;
        }
        if event.contains(Events::NEW_FRAME) && finish_at_next_frame {
            return event;
        }
        if event.contains(Events::AUDIO_BUFFER_FULL) {
            if remaining > chunk {
                remaining -= chunk;
            } else {
                remaining = 0;
                finish_at_next_frame = true;
            }
        }
    }
}

/// Run until the next presented frame, bounded by a wall-clock timeout.
pub fn run_one_frame(emulator: &mut Emulator, last_event: Events, timeout: Duration) -> Events {
    let deadline = Instant::now() + timeout;
    let mut event = last_event;
    loop {
        event = emulator.run_until(event, CHANNEL_SAMPLES_PER_FRAME, Some(deadline));
        if event.intersects(Events::NEW_FRAME | Events::TIMEOUT) {
            return event;
        }
    }
}
