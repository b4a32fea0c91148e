/// A gated pulse counter
///
/// The pulse counter is clocked by the sensor oscillator, and an independent gate clock
/// determines how long pulses are accumulated.
pub trait GateCounter {
    /// Reset the pulse counter and the gate clock, and begin a new gate window
    fn start(&mut self);
    /// Block until the gate window started by `start()` has elapsed
    fn wait_for_gate(&mut self);
    /// Pulses accumulated since the last call to `start()`
    fn read_count(&self) -> u16;
}

/// Prescaler and reload settings for a 16-bit gate clock
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GateTiming {
    pub prescale: u16,
    pub reload: u16,
}

impl GateTiming {
    /// Choose the smallest prescaler which fits a gate of `gate_us` microseconds at `clk_freq` Hz
    pub const fn new(clk_freq: u32, gate_us: u32) -> Self {
        let mut ticks = (clk_freq as u64 * gate_us as u64 / 1_000_000) as u32;
        if ticks == 0 {
            ticks = 1;
        }
        let mut prescale = (ticks - 1) / 65536;
        if prescale > u16::MAX as u32 {
            prescale = u16::MAX as u32;
        }
        let mut divided = ticks / (prescale + 1);
        if divided > 65536 {
            divided = 65536;
        } else if divided == 0 {
            divided = 1;
        }
        Self {
            prescale: prescale as u16,
            reload: (divided - 1) as u16,
        }
    }
}

/// Takes frequency-proxy measurements from a [`GateCounter`]
pub struct FrequencySampler<G> {
    pub counter: G,
}

impl<G: GateCounter> FrequencySampler<G> {
    pub fn new(counter: G) -> Self {
        Self { counter }
    }

    /// Take a single measurement over one full gate window
    ///
    /// Blocks for the gate duration.
    pub fn measure(&mut self) -> u16 {
        self.counter.start();
        self.counter.wait_for_gate();
        self.counter.read_count()
    }

    /// Average `n` consecutive measurements, truncating
    pub fn average(&mut self, n: u8) -> u16 {
        if n == 0 {
            return 0;
        }
        let mut total: u32 = 0;
        for _ in 0..n {
            total += self.measure() as u32;
        }
        (total / n as u32) as u16
    }
}
