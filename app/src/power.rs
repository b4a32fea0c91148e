use embedded_hal::digital::v2::InputPin;
use touch::{PowerMonitor, PowerStatus};

/// Mains sense input, high while mains power is present
pub struct PowerLine<P> {
    pin: P,
}

impl<P: InputPin> PowerLine<P> {
    pub fn new(pin: P) -> Self {
        Self { pin }
    }
}

impl<P: InputPin> PowerMonitor for PowerLine<P> {
    fn read(&mut self) -> PowerStatus {
        match self.pin.is_high() {
            Ok(true) => PowerStatus::Ok,
            // A pin which can't be read counts as an outage
            _ => PowerStatus::Outage,
        }
    }
}
