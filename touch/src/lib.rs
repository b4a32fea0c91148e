#![cfg_attr(not(test), no_std)]

pub mod control;
pub mod detector;
#[cfg(feature = "stm32f0x1")]
pub mod gate;
pub mod sampler;

pub use control::{Channel, Clock, Command, ControlLoop, Gang, PowerMonitor, PowerStatus, Report, SwitchActuator, SwitchStatus};
pub use detector::{Status, TouchDetector, TouchEvent};
pub use sampler::{FrequencySampler, GateCounter, GateTiming};

/// Configuration for a touch channel
///
/// Thresholds are expressed in parts per [`SCALE`] of the baseline, and are evaluated with
/// truncating integer division.
#[derive(Clone, Copy, Debug)]
pub struct DetectorConfig {
    /// Drop below the rolling baseline, in permille, which counts toward a trip
    pub trip_threshold_permille: u16,
    /// Once tripped, a reading within this many permille of the frozen baseline releases
    pub hyst_threshold_permille: u16,
    /// Tripping requires more than this many consecutive readings past the trip threshold
    pub reads_to_trip: u8,
    /// A trip is dropped after more than this many consecutive cycles without recovery
    pub release_timeout: u8,
    /// While released, the baseline is refreshed every `averaging_rate` cycles
    pub averaging_rate: u8,
}

impl DetectorConfig {
    const fn default() -> Self {
        Self {
            trip_threshold_permille: 60,
            hyst_threshold_permille: 20,
            reads_to_trip: 3,
            release_timeout: 200,
            averaging_rate: 8,
        }
    }
}

pub const DEFAULT_DETECTOR_CONFIG: DetectorConfig = DetectorConfig::default();
/// Denominator for the permille thresholds
pub const SCALE: u16 = 1000;
/// Number of measurements averaged to seed the baseline at startup
pub const SEED_SAMPLES: u8 = 16;
