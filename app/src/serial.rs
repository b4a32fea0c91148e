/// USART1 with interrupt-driven byte queues
///
/// Transmit carries log records and diagnostic lines, receive carries single-character
/// commands. Neither direction ever blocks the control loop: a full queue drops bytes.
pub mod uart1 {
    use core::fmt;

    use crate::interrupt;
    use crate::hal::{
        pac,
        prelude::*,
        serial::{Event, Serial},
    };
    use heapless::spsc::{Consumer, Producer, Queue};
    use stm32f0xx_hal::gpio::{gpiob, Alternate, AF0};

    const TX_Q_SIZE: usize = 256;
    const RX_Q_SIZE: usize = 8;

    type TxPin = gpiob::PB6<Alternate<AF0>>;
    type RxPin = gpiob::PB7<Alternate<AF0>>;
    type Port = Serial<pac::USART1, TxPin, RxPin>;

    /// Consumer side of the receive queue, owned by the main thread
    struct Rx {
        queue: Consumer<'static, u8, RX_Q_SIZE>,
    }

    /// Producer side of the transmit queue, owned by the main thread
    struct Tx {
        queue: Producer<'static, u8, TX_Q_SIZE>,
    }

    /// Everything the USART1 handler touches
    struct Isr {
        port: Port,
        rx: Producer<'static, u8, RX_Q_SIZE>,
        tx: Consumer<'static, u8, TX_Q_SIZE>,
    }

    static mut RX: Option<Rx> = None;
    static mut TX: Option<Tx> = None;
    static mut ISR: Option<Isr> = None;

    pub struct Writer {}

    impl fmt::Write for Writer {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            s.bytes().for_each(write_byte);
            Ok(())
        }
    }

    /// Must be called once during application initialization, before anything is logged
    pub fn init(mut port: Port, irq_prio: u8) {
        static mut RX_Q: Queue<u8, RX_Q_SIZE> = Queue::new();
        static mut TX_Q: Queue<u8, TX_Q_SIZE> = Queue::new();

        port.listen(Event::Rxne);

        let mut nvic = unsafe { pac::CorePeripherals::steal() }.NVIC;
        unsafe {
            let (rx_producer, rx_consumer) = RX_Q.split();
            let (tx_producer, tx_consumer) = TX_Q.split();
            RX = Some(Rx { queue: rx_consumer });
            TX = Some(Tx { queue: tx_producer });
            ISR = Some(Isr { port, rx: rx_producer, tx: tx_consumer });

            nvic.set_priority(pac::Interrupt::USART1, irq_prio);
            pac::NVIC::unmask(pac::Interrupt::USART1);
        }
    }

    /// Next received byte, if any
    #[allow(dead_code)]
    pub fn read_byte() -> Option<u8> {
        let rx = unsafe { RX.as_mut() }?;
        rx.queue.dequeue()
    }

    /// Queue one byte for transmission. Bytes written before `init()` are discarded.
    pub fn write_byte(b: u8) {
        let tx = match unsafe { TX.as_mut() } {
            Some(tx) => tx,
            None => return,
        };
        if tx.queue.enqueue(b).is_err() {
            return;
        }
        // The handler masks TXE once the queue drains
        cortex_m::interrupt::free(|_| {
            if let Some(isr) = unsafe { ISR.as_mut() } {
                isr.port.listen(Event::Txe);
            }
        });
    }

    pub fn writer() -> Writer {
        Writer {}
    }

    #[interrupt]
    fn USART1() {
        let isr = match unsafe { ISR.as_mut() } {
            Some(isr) => isr,
            None => return,
        };

        if let Ok(b) = isr.port.read() {
            isr.rx.enqueue(b).ok();
        }

        let usart1 = unsafe { &*pac::USART1::ptr() };
        if usart1.isr.read().txe().bit_is_set() {
            match isr.tx.dequeue() {
                Some(b) => {
                    isr.port.write(b).ok();
                }
                None => isr.port.unlisten(Event::Txe),
            }
        }
    }
}
