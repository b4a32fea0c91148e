//! Gated pulse counters built from STM32F0 general purpose timers.
//!
//! Each counter uses two timers. The pulse timer runs in external clock mode 2 and counts rising
//! edges on its ETR pin, which is driven by the sensor oscillator. The gate timer is clocked from
//! the timer kernel clock, and its update flag marks the end of a gate window. The flag is polled,
//! no interrupts are used.
//!
//! These access the timer registers directly through the PAC pointers rather than taking
//! ownership of the peripherals, so the timers used here must not be
//! reconfigured elsewhere in the application. The ETR pin must be set to its alternate function
//! by the application.

use stm32f0::stm32f0x1 as pac;

use crate::sampler::{GateCounter, GateTiming};

/// SMCR.ECE: external clock mode 2, counting on ETR
const SMCR_ECE: u32 = 1 << 14;
/// SR.UIF: update (overflow) flag
const SR_UIF: u32 = 1;
/// CR1.CEN: counter enable
const CR1_CEN: u32 = 1;
/// CR1.URS: only overflow raises UIF, not a software UG
const CR1_URS: u32 = 1 << 2;

macro_rules! gate_counter {
    ($(#[$doc:meta])* $name:ident, $pulse:ident: $pulse_mod:ident ($pulse_enr:ident, $pulse_en:ident),
     $gate:ident: $gate_mod:ident ($gate_enr:ident, $gate_en:ident)) => {
        $(#[$doc])*
        pub struct $name {
            pulse: &'static pac::$pulse_mod::RegisterBlock,
            gate: &'static pac::$gate_mod::RegisterBlock,
        }

        impl $name {
            /// Enable and configure both timers for a gate window of `timing`
            pub fn new(timing: GateTiming) -> Self {
                let rcc = unsafe { &*pac::RCC::ptr() };
                rcc.$pulse_enr.modify(|_, w| w.$pulse_en().set_bit());
                rcc.$gate_enr.modify(|_, w| w.$gate_en().set_bit());

                let pulse = unsafe { &*pac::$pulse::ptr() };
                let gate = unsafe { &*pac::$gate::ptr() };

                pulse.cr1.write(|w| unsafe { w.bits(0) });
                pulse.smcr.write(|w| unsafe { w.bits(SMCR_ECE) });
                // Hardware truncates this on 16-bit timers. Overflow is caught through UIF.
                pulse.arr.write(|w| unsafe { w.bits(u32::MAX) });
                pulse.cr1.modify(|_, w| w.cen().set_bit());

                gate.psc.write(|w| unsafe { w.bits(timing.prescale as u32) });
                gate.arr.write(|w| unsafe { w.bits(timing.reload as u32) });
                // The prescaler is only loaded on an update event
                gate.cr1.write(|w| unsafe { w.bits(CR1_URS) });
                gate.egr.write(|w| w.ug().set_bit());
                gate.cr1.write(|w| unsafe { w.bits(CR1_URS | CR1_CEN) });

                Self { pulse, gate }
            }
        }

        impl GateCounter for $name {
            fn start(&mut self) {
                // UG clears both the counter and the prescaler counter, so each window is exact
                self.gate.egr.write(|w| w.ug().set_bit());
                self.pulse.cnt.write(|w| unsafe { w.bits(0) });
                self.gate.sr.write(|w| unsafe { w.bits(0) });
                self.pulse.sr.write(|w| unsafe { w.bits(0) });
            }

            fn wait_for_gate(&mut self) {
                while self.gate.sr.read().bits() & SR_UIF == 0 {}
                self.gate.sr.write(|w| unsafe { w.bits(0) });
            }

            /// Counts which do not fit in 16 bits saturate at `u16::MAX`
            fn read_count(&self) -> u16 {
                if self.pulse.sr.read().bits() & SR_UIF != 0 {
                    return u16::MAX;
                }
                let count = self.pulse.cnt.read().bits();
                if count > u16::MAX as u32 {
                    u16::MAX
                } else {
                    count as u16
                }
            }
        }
    };
}

gate_counter!(
    /// Counts pulses on TIM2_ETR (PA0, AF2), gated by TIM14
    Channel1Counter,
    TIM2: tim2 (apb1enr, tim2en),
    TIM14: tim14 (apb1enr, tim14en)
);

gate_counter!(
    /// Counts pulses on TIM3_ETR (PD2, AF0), gated by TIM16
    Channel2Counter,
    TIM3: tim3 (apb1enr, tim3en),
    TIM16: tim16 (apb2enr, tim16en)
);
