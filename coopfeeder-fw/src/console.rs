// Copyright (C) 2025 Paul Hampson
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License version 3 as  published by the
// Free Software Foundation.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program.  If not, see <https://www.gnu.org/licenses/>.

//! USB CDC console. Lines go to the device task over [`CONSOLE_LINES`], responses come back
//! through [`CONSOLE_OUTPUT`].

use coopfeeder_core::lifecycle::presence::ClientKind;
use defmt::{info, unwrap, warn};
use embassy_executor::Spawner;
use embassy_futures::select::select;
use embassy_rp::bind_interrupts;
use embassy_rp::peripherals::USB;
use embassy_rp::usb::{Driver, InterruptHandler};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::pipe::Pipe;
use embassy_usb::class::cdc_acm::{CdcAcmClass, Receiver, Sender, State};
use embassy_usb::driver::EndpointError;
use static_cell::StaticCell;

use crate::{PRESENCE, UsbResources};

bind_interrupts!(struct UsbIrqs {
    USBCTRL_IRQ => InterruptHandler<USB>;
});

const MAX_PACKET_SIZE: u8 = 64;
pub const LINE_CAPACITY: usize = 96;
const OUTPUT_CAPACITY: usize = 1024;

pub type ConsoleLine = heapless::Vec<u8, LINE_CAPACITY>;

pub static CONSOLE_LINES: Channel<CriticalSectionRawMutex, ConsoleLine, 4> = Channel::new();
pub static CONSOLE_OUTPUT: Pipe<CriticalSectionRawMutex, OUTPUT_CAPACITY> = Pipe::new();

type UsbDriver = Driver<'static, USB>;

pub fn start(spawner: Spawner, resources: UsbResources) {
    let driver = Driver::new(resources.usb, UsbIrqs);

    let config = {
        let mut config = embassy_usb::Config::new(0x1209, 0x4005);
        config.manufacturer = Some("Coop Feeder");
        config.product = Some("Coop Feeder Console");
        config.serial_number = Some("00000001");
        config.max_power = 100;
        config.max_packet_size_0 = MAX_PACKET_SIZE;
        config
    };

    let mut builder = {
        static CONFIG_DESCRIPTOR: StaticCell<[u8; 256]> = StaticCell::new();
        static BOS_DESCRIPTOR: StaticCell<[u8; 256]> = StaticCell::new();
        static CONTROL_BUF: StaticCell<[u8; 64]> = StaticCell::new();

        embassy_usb::Builder::new(
            driver,
            config,
            CONFIG_DESCRIPTOR.init([0; 256]),
            BOS_DESCRIPTOR.init([0; 256]),
            &mut [], // no msos descriptors
            CONTROL_BUF.init([0; 64]),
        )
    };

    static STATE: StaticCell<State> = StaticCell::new();
    let class = CdcAcmClass::new(&mut builder, STATE.init(State::new()), MAX_PACKET_SIZE as u16);
    let usb = builder.build();

    spawner.spawn(unwrap!(usb_task(usb)));
    spawner.spawn(unwrap!(console_task(class)));
}

#[embassy_executor::task]
async fn usb_task(mut usb: embassy_usb::UsbDevice<'static, UsbDriver>) {
    usb.run().await;
}

#[embassy_executor::task]
async fn console_task(class: CdcAcmClass<'static, UsbDriver>) {
    let (mut sender, mut receiver) = class.split();
    loop {
        receiver.wait_connection().await;
        CONSOLE_OUTPUT.clear();
        PRESENCE.on_connect(ClientKind::Socket);
        info!("Console connected");

        select(read_lines(&mut receiver), write_output(&mut sender)).await;

        PRESENCE.on_disconnect(ClientKind::Socket);
        info!("Console disconnected");
    }
}

struct Disconnected {}

impl From<EndpointError> for Disconnected {
    fn from(val: EndpointError) -> Self {
        match val {
            EndpointError::BufferOverflow => warn!("USB buffer overflow"),
            EndpointError::Disabled => {}
        }
        Disconnected {}
    }
}

async fn read_lines(receiver: &mut Receiver<'static, UsbDriver>) -> Result<(), Disconnected> {
    let mut packet = [0u8; MAX_PACKET_SIZE as usize];
    let mut line = ConsoleLine::new();
    let mut overflowed = false;

    loop {
        let count = receiver.read_packet(&mut packet).await?;
        for &byte in &packet[..count] {
            match byte {
                b'\r' | b'\n' => {
                    if overflowed {
                        warn!("Console line longer than {} bytes dropped", LINE_CAPACITY);
                    } else if !line.is_empty() {
                        CONSOLE_LINES.send(line.clone()).await;
                    }
                    line.clear();
                    overflowed = false;
                }
                _ => {
                    if line.push(byte).is_err() {
                        overflowed = true;
                    }
                }
            }
        }
    }
}

async fn write_output(sender: &mut Sender<'static, UsbDriver>) -> Result<(), Disconnected> {
    let mut buffer = [0u8; MAX_PACKET_SIZE as usize];
    loop {
        let count = CONSOLE_OUTPUT.read(&mut buffer).await;
        sender.write_packet(&buffer[..count]).await?;
    }
}

/// `core::fmt::Write` into [`CONSOLE_OUTPUT`] with CRLF line endings. Output that does not fit
/// is dropped so a missing host never stalls the caller.
pub struct ConsoleWriter;

impl ConsoleWriter {
    fn push(bytes: &[u8]) {
        let mut remaining = bytes;
        while !remaining.is_empty() {
            match CONSOLE_OUTPUT.try_write(remaining) {
                Ok(written) => remaining = &remaining[written..],
                Err(_) => return,
            }
        }
    }
}

impl core::fmt::Write for ConsoleWriter {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let mut segments = s.split('\n');
        if let Some(first) = segments.next() {
            Self::push(first.as_bytes());
        }
        for segment in segments {
            Self::push(b"\r\n");
            Self::push(segment.as_bytes());
        }
        Ok(())
    }
}
