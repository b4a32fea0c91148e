//! Bistable relay with separate set and reset coils.

use embedded_hal::digital::v2::OutputPin;
use touch::{SwitchActuator, SwitchStatus};

/// Time a coil is energized for one actuation
const COIL_PULSE_MS: u32 = 10;
const COIL_PULSE_CYCLES: u32 = crate::SYSCLK_HZ / 1000 * COIL_PULSE_MS;

/// A latching relay which holds its contact position with both coils off
///
/// The contact position can't be read back, so the driver tracks it. Commands which would not
/// change the position leave both coils off.
pub struct LatchingRelay<SET, RESET> {
    set: SET,
    reset: RESET,
    status: SwitchStatus,
}

impl<SET: OutputPin, RESET: OutputPin> LatchingRelay<SET, RESET> {
    /// Create the driver and pulse the reset coil, so the relay starts off
    pub fn new(set: SET, reset: RESET) -> Self {
        let mut relay = Self {
            set,
            reset,
            status: SwitchStatus::Off,
        };
        relay.set.set_low().ok();
        relay.reset.set_low().ok();
        relay.pulse_reset();
        relay
    }

    fn pulse_set(&mut self) {
        self.set.set_high().ok();
        cortex_m::asm::delay(COIL_PULSE_CYCLES);
        self.set.set_low().ok();
    }

    fn pulse_reset(&mut self) {
        self.reset.set_high().ok();
        cortex_m::asm::delay(COIL_PULSE_CYCLES);
        self.reset.set_low().ok();
    }
}

impl<SET: OutputPin, RESET: OutputPin> SwitchActuator for LatchingRelay<SET, RESET> {
    fn on(&mut self) {
        if self.status == SwitchStatus::On {
            return;
        }
        self.pulse_set();
        self.status = SwitchStatus::On;
    }

    fn off(&mut self) {
        if self.status == SwitchStatus::Off {
            return;
        }
        self.pulse_reset();
        self.status = SwitchStatus::Off;
    }

    fn status(&self) -> SwitchStatus {
        self.status
    }
}
