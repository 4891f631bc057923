//! Runs the dispatcher on a Nucleo-64 F401, bridging USART2 bytes to a
//! SPI-attached flash chip on the Arduino-style connector.
//!
//! *  SCK = D13 = PA5
//! * MISO = D12 = PA6
//! * MOSI = D11 = PA7
//! *  CS  =      PA9
//!
//! The host talks the wire protocol over USART2 (TX = D1 = PA2, RX = D0
//! = PA3); adapted from `spi-memory`'s own `examples/dump.rs`, which
//! wires up the identical pins to drive `series25::Flash` directly.

#![no_std]
#![no_main]

extern crate panic_semihosting;

use cortex_m_rt::entry;
use cortex_m_semihosting::hprintln;
use embedded_hal::blocking::spi::Transfer;
use embedded_hal::digital::v2::OutputPin;
use embedded_hal::serial::{Read, Write};
use embedded_hal::spi::MODE_0;
use stm32f4xx_hal::gpio::gpioa::PA9;
use stm32f4xx_hal::gpio::{Output, PushPull};
use stm32f4xx_hal::gpio::GpioExt;
use stm32f4xx_hal::rcc::RccExt;
use stm32f4xx_hal::serial::{self, Serial as HalSerial};
use stm32f4xx_hal::spi::Spi;
use stm32f4xx_hal::stm32 as pac;
use stm32f4xx_hal::time::{Bps, MegaHertz};

use spi_flash_firmware::{ChipSelect, Dispatcher, Serial, SpiBus};

/// Serial baudrate shared with the host's `flashutil` transport.
const BAUDRATE: u32 = 115_200;

/// Arena size; drives the `GET_INFO` advertised max packet size.
const ARENA_SIZE: usize = 264;

struct BoardSpi<SPI> {
    spi: SPI,
}

impl<SPI, E> SpiBus for BoardSpi<SPI>
where
    SPI: Transfer<u8, Error = E>,
{
    fn transfer(&mut self, buf: &mut [u8], _tx_len: usize, _rx_len: usize) {
        self.spi.transfer(buf).ok();
    }
}

struct BoardCs {
    pin: PA9<Output<PushPull>>,
}

impl ChipSelect for BoardCs {
    fn assert(&mut self, asserted: bool) {
        if asserted {
            self.pin.set_low().ok();
        } else {
            self.pin.set_high().ok();
        }
    }
}

/// Only the transmit half is handed to the dispatcher — `SER: Serial`
/// is a write-only capability, matching the original firmware's
/// `SerialSendCallback`/`SerialFlushCallback` pair. The receive half
/// stays in `main`'s polling loop, which is where incoming bytes are
/// discovered and fed to `on_byte` in the first place.
struct BoardSerial<TX> {
    tx: TX,
}

impl<TX, E> Serial for BoardSerial<TX>
where
    TX: Write<u8, Error = E>,
{
    fn send(&mut self, byte: u8) {
        nb::block!(self.tx.write(byte)).ok();
    }

    fn flush(&mut self) {
        nb::block!(self.tx.flush()).ok();
    }
}

#[entry]
fn main() -> ! {
    let periph = pac::Peripherals::take().unwrap();
    let clocks = periph.RCC.constrain().cfgr.freeze();
    let gpioa = periph.GPIOA.split();

    let cs = {
        let mut pin = gpioa.pa9.into_push_pull_output();
        pin.set_high().ok();
        BoardCs { pin }
    };

    let spi = {
        let sck = gpioa.pa5.into_alternate_af5();
        let miso = gpioa.pa6.into_alternate_af5();
        let mosi = gpioa.pa7.into_alternate_af5();

        BoardSpi {
            spi: Spi::spi1(
                periph.SPI1,
                (sck, miso, mosi),
                MODE_0,
                MegaHertz(1).into(),
                clocks,
            ),
        }
    };

    let (tx, mut rx) = {
        let tx_pin = gpioa.pa2.into_alternate_af7();
        let rx_pin = gpioa.pa3.into_alternate_af7();

        let config = serial::config::Config {
            baudrate: Bps(BAUDRATE),
            ..Default::default()
        };
        HalSerial::usart2(periph.USART2, (tx_pin, rx_pin), config, clocks)
            .unwrap()
            .split()
    };

    let mut arena = [0u8; ARENA_SIZE];
    let serial = BoardSerial { tx };
    hprintln!("dispatcher starting").ok();

    let mut dispatcher = Dispatcher::new(&mut arena, spi, cs, serial);

    loop {
        match rx.read() {
            Ok(byte) => dispatcher.on_byte(byte),
            Err(nb::Error::WouldBlock) => dispatcher.on_idle(),
            Err(nb::Error::Other(_)) => dispatcher.on_idle(),
        }
    }
}
