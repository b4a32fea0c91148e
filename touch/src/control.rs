//! Fixed-period control loop tying sensing, power supervision and relay actuation together.
//!
//! Everything runs on a single thread of control. Each call to [`ControlLoop::poll`] first
//! applies the power-outage override, and then runs a sampling cycle on every channel if the
//! next deadline has been reached. Deadlines advance by exactly one period from the previous
//! deadline, so the cycle rate does not drift when a poll runs late.

use core::fmt;

use crate::detector::{Status, TouchDetector};
use crate::sampler::{FrequencySampler, GateCounter};
use crate::{DetectorConfig, SEED_SAMPLES};

/// A free-running tick counter which may wrap
pub trait Clock {
    fn ticks(&self) -> u32;
}

impl<F: Fn() -> u32> Clock for F {
    fn ticks(&self) -> u32 {
        self()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerStatus {
    Outage = 0,
    Ok = 1,
}

/// Reports the state of the supply
pub trait PowerMonitor {
    fn read(&mut self) -> PowerStatus;
}

impl<F: FnMut() -> PowerStatus> PowerMonitor for F {
    fn read(&mut self) -> PowerStatus {
        self()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwitchStatus {
    Off = 0,
    On = 1,
}

/// A relay which holds its state between commands
///
/// Implementations are expected to ignore `on()` while on and `off()` while off.
pub trait SwitchActuator {
    fn on(&mut self);
    fn off(&mut self);
    fn status(&self) -> SwitchStatus;

    fn toggle(&mut self) {
        match self.status() {
            SwitchStatus::On => self.off(),
            SwitchStatus::Off => self.on(),
        }
    }
}

/// Forced actuation requests, bypassing the touch detector
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Toggle,
    On,
    Off,
}

impl Command {
    /// Decode a single command character: `' '` toggles, `'i'` switches on, `'o'` switches off
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            b' ' => Some(Self::Toggle),
            b'i' => Some(Self::On),
            b'o' => Some(Self::Off),
            _ => None,
        }
    }
}

/// Per-channel record of one sampling cycle, for offline tuning
///
/// Displays as `rolling_avg,frozen_avg,sample,status,power_status,switch_status`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Report {
    pub rolling_avg: u16,
    pub frozen_avg: u16,
    pub sample: u16,
    pub status: Status,
    pub power: PowerStatus,
    pub switch: SwitchStatus,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{},{}",
            self.rolling_avg,
            self.frozen_avg,
            self.sample,
            self.status as u8,
            self.power as u8,
            self.switch as u8
        )
    }
}

/// One touch pad and the relay it controls
pub struct Channel<'a, G, S> {
    pub sampler: FrequencySampler<G>,
    pub detector: TouchDetector<'a>,
    pub switch: S,
}

impl<'a, G: GateCounter, S: SwitchActuator> Channel<'a, G, S> {
    /// Create a channel, seeding the baseline from [`SEED_SAMPLES`] measurements
    ///
    /// Blocks for the duration of the seed measurements.
    pub fn new(config: &'a DetectorConfig, counter: G, switch: S) -> Self {
        let mut sampler = FrequencySampler::new(counter);
        let seed = sampler.average(SEED_SAMPLES);
        log::info!("baseline seeded at {}", seed);
        Self {
            sampler,
            detector: TouchDetector::new(config, seed),
            switch,
        }
    }
}

/// The set of channels driven by a control loop
///
/// Single-gang hardware uses one [`Channel`]; two-gang hardware uses a tuple of two, each with
/// its own sampler and detector state.
pub trait Gang {
    /// Switch off every relay which is on
    fn enforce_outage(&mut self);
    /// Run one sampling cycle on every channel
    fn cycle(&mut self, power: PowerStatus, report: &mut dyn FnMut(&Report));
    /// Apply a forced command to every channel
    fn command(&mut self, command: Command);
}

impl<'a, G: GateCounter, S: SwitchActuator> Gang for Channel<'a, G, S> {
    fn enforce_outage(&mut self) {
        // The coil is only energized when the relay is actually on
        if self.switch.status() == SwitchStatus::On {
            log::warn!("power outage, switching off");
            self.switch.off();
        }
    }

    fn cycle(&mut self, power: PowerStatus, report: &mut dyn FnMut(&Report)) {
        let sample = self.sampler.measure();

        if self.detector.step(sample).is_some() {
            if power == PowerStatus::Ok {
                self.switch.toggle();
            } else {
                log::info!("touch ignored during power outage");
            }
        }

        report(&Report {
            rolling_avg: self.detector.rolling_avg(),
            frozen_avg: self.detector.frozen_avg(),
            sample,
            status: self.detector.status(),
            power,
            switch: self.switch.status(),
        });
    }

    fn command(&mut self, command: Command) {
        match command {
            Command::Toggle => self.switch.toggle(),
            Command::On => self.switch.on(),
            Command::Off => self.switch.off(),
        }
    }
}

impl<A: Gang, B: Gang> Gang for (A, B) {
    fn enforce_outage(&mut self) {
        self.0.enforce_outage();
        self.1.enforce_outage();
    }

    fn cycle(&mut self, power: PowerStatus, report: &mut dyn FnMut(&Report)) {
        self.0.cycle(power, report);
        self.1.cycle(power, report);
    }

    fn command(&mut self, command: Command) {
        self.0.command(command);
        self.1.command(command);
    }
}

pub struct ControlLoop<C, P, G> {
    clock: C,
    power: P,
    pub gang: G,
    period: u32,
    last_deadline: u32,
    power_status: PowerStatus,
}

impl<C: Clock, P: PowerMonitor, G: Gang> ControlLoop<C, P, G> {
    /// Create a control loop running a sampling cycle every `period` ticks of `clock`
    ///
    /// The first cycle runs one period after construction.
    pub fn new(clock: C, power: P, gang: G, period: u32) -> Self {
        let last_deadline = clock.ticks();
        Self {
            clock,
            power,
            gang,
            period,
            last_deadline,
            power_status: PowerStatus::Ok,
        }
    }

    /// The power status as of the last poll
    pub fn power_status(&self) -> PowerStatus {
        self.power_status
    }

    /// Run one iteration of the loop
    ///
    /// Returns true if a sampling cycle ran. `report` is called once per channel for each cycle.
    pub fn poll(&mut self, report: &mut dyn FnMut(&Report)) -> bool {
        let power = self.power.read();
        if power != self.power_status {
            log::info!("power status {:?}", power);
        }
        self.power_status = power;

        if power == PowerStatus::Outage {
            self.gang.enforce_outage();
        }

        let now = self.clock.ticks();
        if now.wrapping_sub(self.last_deadline) < self.period {
            return false;
        }
        self.last_deadline = self.last_deadline.wrapping_add(self.period);

        // Sensing continues through an outage; only actuation is gated on power
        self.gang.cycle(power, report);
        true
    }

    /// Apply a forced command, bypassing the touch detector
    pub fn command(&mut self, command: Command) {
        log::info!("command {:?}", command);
        self.gang.command(command);
    }

    /// Run forever, applying commands from `commands` between polls
    pub fn run(
        mut self,
        mut commands: impl FnMut() -> Option<Command>,
        mut report: impl FnMut(&Report),
    ) -> ! {
        loop {
            if let Some(command) = commands() {
                self.command(command);
            }
            self.poll(&mut report);
        }
    }
}

#[cfg(test)]
pub mod test {
    use super::*;
    use crate::sampler::test::ScriptedCounter;
    use core::cell::Cell;

    const CONFIG: DetectorConfig = DetectorConfig {
        trip_threshold_permille: 250,
        hyst_threshold_permille: 30,
        reads_to_trip: 3,
        release_timeout: 10,
        averaging_rate: 8,
    };

    const PERIOD: u32 = 20;

    pub struct MockSwitch {
        pub state: SwitchStatus,
        pub on_calls: usize,
        pub off_calls: usize,
    }

    impl MockSwitch {
        pub fn new(state: SwitchStatus) -> Self {
            Self { state, on_calls: 0, off_calls: 0 }
        }
    }

    impl SwitchActuator for MockSwitch {
        fn on(&mut self) {
            self.on_calls += 1;
            self.state = SwitchStatus::On;
        }

        fn off(&mut self) {
            self.off_calls += 1;
            self.state = SwitchStatus::Off;
        }

        fn status(&self) -> SwitchStatus {
            self.state
        }
    }

    /// Seed readings at 1000 followed by `samples`
    fn script(samples: &[u16]) -> ScriptedCounter {
        let mut counts = vec![1000; SEED_SAMPLES as usize];
        counts.extend_from_slice(samples);
        ScriptedCounter::new(&counts)
    }

    fn channel(samples: &[u16], state: SwitchStatus) -> Channel<'static, ScriptedCounter, MockSwitch> {
        Channel::new(&CONFIG, script(samples), MockSwitch::new(state))
    }

    #[test]
    fn test_channel_seed() {
        let ch = channel(&[1000], SwitchStatus::Off);
        assert_eq!(ch.detector.rolling_avg(), 1000);
        assert_eq!(ch.sampler.counter.gates, SEED_SAMPLES as usize);
    }

    #[test]
    fn test_fixed_period_scheduling() {
        let now = Cell::new(0u32);
        let mut cl = ControlLoop::new(|| now.get(), || PowerStatus::Ok, channel(&[1000], SwitchStatus::Off), PERIOD);
        let mut reports = 0;
        let mut count = |_: &Report| reports += 1;

        now.set(19);
        assert!(!cl.poll(&mut count));
        now.set(20);
        assert!(cl.poll(&mut count));
        assert!(!cl.poll(&mut count));

        // Late poll: the missed deadline is caught up from the previous deadline, not from now
        now.set(65);
        assert!(cl.poll(&mut count));
        assert!(cl.poll(&mut count));
        assert!(!cl.poll(&mut count));
        now.set(79);
        assert!(!cl.poll(&mut count));
        now.set(80);
        assert!(cl.poll(&mut count));

        assert_eq!(reports, 4);
    }

    #[test]
    fn test_scheduling_across_wraparound() {
        let now = Cell::new(u32::MAX - 5);
        let mut cl = ControlLoop::new(|| now.get(), || PowerStatus::Ok, channel(&[1000], SwitchStatus::Off), PERIOD);

        now.set(13);
        assert!(!cl.poll(&mut |_| ()));
        now.set(14);
        assert!(cl.poll(&mut |_| ()));
    }

    #[test]
    fn test_touch_toggles_switch() {
        let now = Cell::new(0u32);
        let mut cl = ControlLoop::new(
            || now.get(),
            || PowerStatus::Ok,
            channel(&[700, 700, 700, 700, 1000, 700, 700, 700, 700], SwitchStatus::Off),
            PERIOD,
        );

        for i in 1..=3 {
            now.set(i * PERIOD);
            assert!(cl.poll(&mut |_| ()));
            assert_eq!(cl.gang.switch.state, SwitchStatus::Off);
        }
        now.set(4 * PERIOD);
        cl.poll(&mut |_| ());
        assert_eq!(cl.gang.switch.state, SwitchStatus::On);
        assert_eq!(cl.gang.switch.on_calls, 1);

        // Release, then a second touch toggles back off
        for i in 5..=9 {
            now.set(i * PERIOD);
            cl.poll(&mut |_| ());
        }
        assert_eq!(cl.gang.switch.state, SwitchStatus::Off);
        assert_eq!(cl.gang.switch.on_calls, 1);
        assert_eq!(cl.gang.switch.off_calls, 1);
    }

    #[test]
    fn test_outage_override() {
        let now = Cell::new(0u32);
        let power = Cell::new(PowerStatus::Outage);
        let mut cl = ControlLoop::new(|| now.get(), || power.get(), channel(&[1000], SwitchStatus::On), PERIOD);

        // Applied on every poll, whether or not a cycle is due
        assert!(!cl.poll(&mut |_| ()));
        assert_eq!(cl.gang.switch.off_calls, 1);
        assert_eq!(cl.gang.switch.state, SwitchStatus::Off);
        assert_eq!(cl.power_status(), PowerStatus::Outage);

        // Already off: no further calls
        assert!(!cl.poll(&mut |_| ()));
        assert_eq!(cl.gang.switch.off_calls, 1);

        // Switched on by command while the outage persists, the next poll turns it back off
        cl.command(Command::On);
        assert_eq!(cl.gang.switch.state, SwitchStatus::On);
        cl.poll(&mut |_| ());
        assert_eq!(cl.gang.switch.off_calls, 2);
        assert_eq!(cl.gang.switch.state, SwitchStatus::Off);

        power.set(PowerStatus::Ok);
        cl.command(Command::On);
        cl.poll(&mut |_| ());
        assert_eq!(cl.gang.switch.state, SwitchStatus::On);
    }

    #[test]
    fn test_touch_during_outage_is_sensed_but_not_actuated() {
        let now = Cell::new(0u32);
        let mut cl = ControlLoop::new(
            || now.get(),
            || PowerStatus::Outage,
            channel(&[700, 700, 700, 700], SwitchStatus::Off),
            PERIOD,
        );
        let mut last = None;

        for i in 1..=4 {
            now.set(i * PERIOD);
            assert!(cl.poll(&mut |r| last = Some(*r)));
        }

        assert!(cl.gang.detector.is_tripped());
        assert_eq!(cl.gang.switch.on_calls, 0);
        assert_eq!(cl.gang.switch.off_calls, 0);
        assert_eq!(
            last,
            Some(Report {
                rolling_avg: 981,
                frozen_avg: 1000,
                sample: 700,
                status: Status::Tripped,
                power: PowerStatus::Outage,
                switch: SwitchStatus::Off,
            })
        );
    }

    #[test]
    fn test_two_gang_channels_are_independent() {
        let now = Cell::new(0u32);
        let gang = (
            channel(&[1000, 1000, 1000, 1000], SwitchStatus::Off),
            channel(&[700, 700, 700, 700], SwitchStatus::Off),
        );
        let mut cl = ControlLoop::new(|| now.get(), || PowerStatus::Ok, gang, PERIOD);
        let mut reports = 0;

        for i in 1..=4 {
            now.set(i * PERIOD);
            cl.poll(&mut |_| reports += 1);
        }

        assert_eq!(reports, 8);
        assert!(!cl.gang.0.detector.is_tripped());
        assert_eq!(cl.gang.0.switch.state, SwitchStatus::Off);
        assert!(cl.gang.1.detector.is_tripped());
        assert_eq!(cl.gang.1.switch.state, SwitchStatus::On);
    }

    #[test]
    fn test_two_gang_outage() {
        let gang = (channel(&[1000], SwitchStatus::On), channel(&[1000], SwitchStatus::Off));
        let mut cl = ControlLoop::new(|| 0u32, || PowerStatus::Outage, gang, PERIOD);
        cl.poll(&mut |_| ());
        assert_eq!(cl.gang.0.switch.off_calls, 1);
        assert_eq!(cl.gang.1.switch.off_calls, 0);
    }

    #[test]
    fn test_commands_bypass_detector() {
        let mut cl = ControlLoop::new(|| 0u32, || PowerStatus::Ok, channel(&[1000], SwitchStatus::Off), PERIOD);

        cl.command(Command::Toggle);
        assert_eq!(cl.gang.switch.state, SwitchStatus::On);
        cl.command(Command::Toggle);
        assert_eq!(cl.gang.switch.state, SwitchStatus::Off);
        cl.command(Command::On);
        assert_eq!(cl.gang.switch.state, SwitchStatus::On);
        cl.command(Command::Off);
        assert_eq!(cl.gang.switch.state, SwitchStatus::Off);
        assert!(!cl.gang.detector.is_tripped());
    }

    #[test]
    fn test_command_decoding() {
        assert_eq!(Command::from_byte(b' '), Some(Command::Toggle));
        assert_eq!(Command::from_byte(b'i'), Some(Command::On));
        assert_eq!(Command::from_byte(b'o'), Some(Command::Off));
        assert_eq!(Command::from_byte(b'x'), None);
        assert_eq!(Command::from_byte(b'\r'), None);
    }

    #[test]
    fn test_report_line() {
        let r = Report {
            rolling_avg: 1000,
            frozen_avg: 990,
            sample: 700,
            status: Status::Tripped,
            power: PowerStatus::Ok,
            switch: SwitchStatus::Off,
        };
        assert_eq!(format!("{}", r), "1000,990,700,1,1,0");
    }
}
