#![no_main]
#![no_std]

use core::sync::atomic::{AtomicU32, Ordering};
use cortex_m_rt::{entry, exception};
use panic_halt as _;

use stm32f0xx_hal as hal;

use touch::gate::Channel1Counter;
#[cfg(feature = "two-gang")]
use touch::gate::Channel2Counter;
use touch::{Channel, Command, ControlLoop, GateTiming, Report, DEFAULT_DETECTOR_CONFIG};

use crate::hal::pac;
use crate::hal::pac::interrupt;
use crate::hal::prelude::*;
use crate::hal::rcc::Rcc;

use power::PowerLine;
use relay::LatchingRelay;

mod logger;
mod power;
mod relay;
mod serial;

const SYSCLK_HZ: u32 = 48_000_000;
/// SysTick rate, one tick per millisecond
const TICK_HZ: u32 = 1000;
/// Milliseconds between sampling cycles
const INTER_SAMPLE_PERIOD_MS: u32 = 20;
/// Length of one frequency gate window. Must be well below the sampling period.
const GATE_US: u32 = 2000;

static TIME: AtomicU32 = AtomicU32::new(0);

/// Kernel clock of the APB timers
fn timer_clock(rcc: &Rcc) -> u32 {
    // If pclk is prescaled from hclk, the frequency fed into the timers is doubled
    if rcc.clocks.hclk().0 == rcc.clocks.pclk().0 {
        rcc.clocks.pclk().0
    } else {
        rcc.clocks.pclk().0 * 2
    }
}

#[cfg(feature = "serial-commands")]
fn next_command() -> Option<Command> {
    serial::uart1::read_byte().and_then(Command::from_byte)
}

#[cfg(not(feature = "serial-commands"))]
fn next_command() -> Option<Command> {
    None
}

#[cfg(feature = "diagnostics")]
fn report(report: &Report) {
    let mut writer = serial::uart1::writer();
    core::fmt::write(&mut writer, format_args!("{}\r\n", report)).ok();
}

#[cfg(not(feature = "diagnostics"))]
fn report(_: &Report) {}

#[entry]
fn main() -> ! {
    let dp = pac::Peripherals::take().unwrap();
    let cp = cortex_m::Peripherals::take().unwrap();

    let mut flash = dp.FLASH;
    let mut rcc = dp.RCC.configure().sysclk(SYSCLK_HZ.hz()).freeze(&mut flash);
    let gpioa = dp.GPIOA.split(&mut rcc);
    let gpiob = dp.GPIOB.split(&mut rcc);

    // A library requiring a critical section to set a gpio AF register is bad and I just won't.
    let fake_cs = unsafe { cortex_m::interrupt::CriticalSection::new() };

    // Sensor oscillator output into the TIM2 ETR pulse counter
    let _osc1 = gpioa.pa0.into_alternate_af2(&fake_cs);
    // Mains sense
    let mains = gpioa.pa4.into_floating_input(&fake_cs);
    // Relay coils
    let set1 = gpiob.pb8.into_push_pull_output(&fake_cs);
    let reset1 = gpiob.pb9.into_push_pull_output(&fake_cs);

    let tx_pin = gpiob.pb6.into_alternate_af0(&fake_cs);
    let rx_pin = gpiob.pb7.into_alternate_af0(&fake_cs);
    let uart = hal::serial::Serial::usart1(dp.USART1, (tx_pin, rx_pin), 115200.bps(), &mut rcc);
    serial::uart1::init(uart, 4);
    logger::init();

    let mut syst = hal::timers::Timer::syst(cp.SYST, TICK_HZ.hz(), &mut rcc);
    syst.listen(&hal::timers::Event::TimeOut);

    let timing = GateTiming::new(timer_clock(&rcc), GATE_US);
    log::info!("gate prescale {} reload {}", timing.prescale, timing.reload);

    let channel1 = Channel::new(
        &DEFAULT_DETECTOR_CONFIG,
        Channel1Counter::new(timing),
        LatchingRelay::new(set1, reset1),
    );

    #[cfg(feature = "two-gang")]
    let gang = {
        let gpiod = dp.GPIOD.split(&mut rcc);
        let _osc2 = gpiod.pd2.into_alternate_af0(&fake_cs);
        let set2 = gpiob.pb10.into_push_pull_output(&fake_cs);
        let reset2 = gpiob.pb11.into_push_pull_output(&fake_cs);
        let channel2 = Channel::new(
            &DEFAULT_DETECTOR_CONFIG,
            Channel2Counter::new(timing),
            LatchingRelay::new(set2, reset2),
        );
        (channel1, channel2)
    };
    #[cfg(not(feature = "two-gang"))]
    let gang = channel1;

    let control = ControlLoop::new(
        || TIME.load(Ordering::Relaxed),
        PowerLine::new(mains),
        gang,
        INTER_SAMPLE_PERIOD_MS * TICK_HZ / 1000,
    );

    log::info!("running");
    control.run(next_command, report)
}

#[exception]
fn SysTick() {
    // Only written here; no read-modify-write atomics on this core
    let time = TIME.load(Ordering::Relaxed);
    TIME.store(time.wrapping_add(1), Ordering::Relaxed);
}
