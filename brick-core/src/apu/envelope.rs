//! Volume envelope, shared by channels 1, 2 and 4.

pub const ENVELOPE_MAX_PERIOD: u8 = 8;
pub const ENVELOPE_MAX_VOLUME: u8 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnvelopeDirection {
    #[default]
    Attenuate,
    Amplify,
}

#[derive(Debug, Clone, Default)]
pub struct Envelope {
    pub initial_volume: u8,
    pub direction: EnvelopeDirection,
    pub period: u8,
    pub volume: u8,
    pub timer: u8,
    /// Cleared once the volume boundary is reached.
    pub automatic: bool,
}

impl Envelope {
    pub fn read(&self) -> u8 {
        self.initial_volume << 4
            | u8::from(self.direction == EnvelopeDirection::Amplify) << 3
            | self.period
    }

    pub fn write(&mut self, value: u8) {
        self.initial_volume = value >> 4;
        self.direction = if value & 0x08 != 0 {
            EnvelopeDirection::Amplify
        } else {
            EnvelopeDirection::Attenuate
        };
        self.period = value & 0x07;
    }

    /// NRx4 trigger. If the next sequencer frame is the envelope frame,
    /// the first period is one tick longer.
    pub fn trigger(&mut self, next_frame_is_envelope: bool) {
        self.volume = self.initial_volume;
        self.timer = if self.period != 0 {
            self.period
        } else {
            ENVELOPE_MAX_PERIOD
        };
        self.automatic = true;
        if next_frame_is_envelope {
            self.timer += 1;
        }
    }

    /// Sequencer frame 7.
    pub fn tick(&mut self) {
        if self.period != 0 {
            if self.automatic {
                self.timer -= 1;
                if self.timer == 0 {
                    self.timer = self.period;
                    let delta: u8 = match self.direction {
                        EnvelopeDirection::Attenuate => 0xff,
                        EnvelopeDirection::Amplify => 1,
                    };
                    let volume = self.volume.wrapping_add(delta);
                    if volume < ENVELOPE_MAX_VOLUME {
                        self.volume = volume;
                    } else {
                        self.automatic = false;
                    }
                }
            }
        } else {
            // Period 0 is inactive but keeps the timer primed at 8.
            self.timer = ENVELOPE_MAX_PERIOD;
        }
    }
}
