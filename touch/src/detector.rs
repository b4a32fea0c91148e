use crate::{DetectorConfig, SCALE};

/// Debounced state of a touch pad
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Released = 0,
    Tripped = 1,
}

/// Emitted once for every transition into [`Status::Tripped`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TouchEvent {
    /// The baseline frozen at the moment of the trip
    pub baseline: u16,
    /// The reading which confirmed the trip
    pub sample: u16,
}

/// Compute `permille * base / SCALE`, truncating, reinterpreted as signed
fn fraction(permille: u16, base: u16) -> i16 {
    (permille as u32 * base as u32 / SCALE as u32) as i16
}

/// Hysteretic touch detector for a single pad.
///
/// A touch increases the pad capacitance, which lowers the oscillator frequency and with it the
/// sample value. The detector tracks a slowly adapting baseline and trips once readings stay far
/// enough below it for long enough.
pub struct TouchDetector<'a> {
    rolling_avg: u16,
    frozen_avg: u16,
    status: Status,
    consecutive_count: u8,
    sample_count: u8,
    pub config: &'a DetectorConfig,
}

impl<'a> TouchDetector<'a> {
    /// Create a detector with an initial baseline, normally the average of several measurements
    pub fn new(config: &'a DetectorConfig, seed: u16) -> Self {
        let seed = seed.max(1);
        Self {
            rolling_avg: seed,
            frozen_avg: seed,
            status: Status::Released,
            consecutive_count: 0,
            sample_count: 0,
            config,
        }
    }

    pub fn rolling_avg(&self) -> u16 {
        self.rolling_avg
    }

    pub fn frozen_avg(&self) -> u16 {
        self.frozen_avg
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn is_tripped(&self) -> bool {
        self.status == Status::Tripped
    }

    /// Process one measurement
    ///
    /// Returns an event when this sample confirmed a new touch.
    pub fn step(&mut self, sample: u16) -> Option<TouchEvent> {
        let mut event = None;

        match self.status {
            Status::Released => {
                let drop = self.rolling_avg.wrapping_sub(sample) as i16;
                if drop > fraction(self.config.trip_threshold_permille, self.rolling_avg) {
                    self.consecutive_count = self.consecutive_count.saturating_add(1);
                    if self.consecutive_count > self.config.reads_to_trip {
                        self.consecutive_count = 0;
                        self.frozen_avg = self.rolling_avg;
                        self.status = Status::Tripped;
                        log::debug!("tripped: baseline {} sample {}", self.frozen_avg, sample);
                        event = Some(TouchEvent { baseline: self.frozen_avg, sample });
                    }
                } else {
                    self.consecutive_count = 0;
                }
            }
            Status::Tripped => {
                let drop = self.frozen_avg.wrapping_sub(sample) as i16;
                if drop < fraction(self.config.hyst_threshold_permille, self.frozen_avg) {
                    self.consecutive_count = 0;
                    self.status = Status::Released;
                    log::debug!("released: baseline {} sample {}", self.frozen_avg, sample);
                } else {
                    self.consecutive_count = self.consecutive_count.saturating_add(1);
                    if self.consecutive_count > self.config.release_timeout {
                        self.consecutive_count = 0;
                        self.status = Status::Released;
                        log::debug!("release timeout: baseline {} now {}", self.frozen_avg, self.rolling_avg);
                    }
                }
            }
        }

        // While tripped the baseline follows every reading, so a lasting shift (e.g. water on
        // the pad) is absorbed quickly. While released it only moves every few cycles.
        self.sample_count = self.sample_count.wrapping_add(1);
        let refresh = match self.sample_count.checked_rem(self.config.averaging_rate) {
            Some(r) => r == 0,
            None => true,
        };
        if self.status == Status::Tripped || refresh {
            self.rolling_avg = ((self.rolling_avg as u32 * 15 + sample as u32 + 8) / 16) as u16;
        }

        event
    }
}
