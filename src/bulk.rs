//! Bulk flash-programming protocol.
//!
//! A foreground state machine driven by [`FlashProgrammer::tick`]. Commands
//! arrive as the first byte of an OUT packet; page data moves as fixed-size
//! blocks (one full bulk packet each), and every page transaction exchanges
//! exactly `blocks_per_page` blocks followed by a one-byte response packet,
//! whether or not the page index was valid. Invalid pages exchange dummy
//! data and report the failure in-band instead of stalling.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::CriticalSectionMutex;

use crate::device::{Packet, UsbDevice};
use crate::flash::{FlashLayout, FlashStore};
use crate::fmt::{debug, warn};
use crate::regs::UsbPort;
use crate::EP1_MAX_PACKET;

/// Command byte, first byte of each OUT command packet.
pub mod cmd {
    /// Payload: two key bytes.
    pub const SET_FLASH_KEY: u8 = 0x00;
    pub const GET_PAGE_INFO: u8 = 0x01;
    /// Payload: page index, then one page of data blocks.
    pub const WRITE_PAGE: u8 = 0x02;
    /// Payload: page index; one page of data blocks follows in response.
    pub const READ_PAGE: u8 = 0x03;
}

/// Response byte, first byte of each IN response packet.
pub mod rsp {
    pub const SUCCESS: u8 = 0x00;
    pub const INVALID: u8 = 0x01;
}

/// Activity indicators driven by the protocol.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Led {
    /// Lit for the duration of a page read.
    Read,
    /// Lit for the duration of a page write.
    Write,
}

pub trait Indicators {
    fn set(&mut self, led: Led, on: bool);
}

/// No indicators attached.
impl Indicators for () {
    fn set(&mut self, _led: Led, _on: bool) {}
}

/// The USB device context shared between the interrupt handler and the
/// foreground protocol driver.
pub type SharedDevice<P> = CriticalSectionMutex<RefCell<UsbDevice<P>>>;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum ProtocolState {
    /// Awaiting a command packet.
    Idle,
    SetFlashKey,
    TxPageInfo,
    /// Page-read command stage.
    ReadPage,
    /// Page-read data stage, one block per entry.
    TxBlock,
    /// Page-write command stage.
    WritePage,
    /// Page-write data stage.
    RxBlock,
    TxSuccess,
    TxInvalid,
}

/// What the caller should do after a tick.
#[must_use]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Tick {
    Continue,
    /// The host asked for a device reset and the flash interface was
    /// unlocked; the caller should reset the device.
    ResetDevice,
}

pub struct FlashProgrammer<'d, P: UsbPort, F: FlashStore, L: Indicators> {
    usb: &'d SharedDevice<P>,
    flash: F,
    leds: L,
    layout: FlashLayout,
    state: ProtocolState,
    /// Command packet taken in `Idle`; parameter bytes are read by the
    /// command-stage states.
    command: Packet,
    page: u8,
    block: u8,
    valid: bool,
    /// Block staging buffer. Deliberately not cleared between transactions:
    /// blocks for an invalid page send whatever it last held.
    scratch: Packet,
}

impl<'d, P: UsbPort, F: FlashStore, L: Indicators> FlashProgrammer<'d, P, F, L> {
    pub fn new(usb: &'d SharedDevice<P>, flash: F, leds: L, layout: FlashLayout) -> Self {
        Self {
            usb,
            flash,
            leds,
            layout,
            state: ProtocolState::Idle,
            command: [0; EP1_MAX_PACKET],
            page: 0,
            block: 0,
            valid: false,
            scratch: [0; EP1_MAX_PACKET],
        }
    }

    /// Advance the protocol by at most one step.
    ///
    /// Checks for an asynchronous reset first: a bus reset or a host
    /// RST_STATE request flushes both bulk FIFOs and mailboxes and forces
    /// the machine back to `Idle` before any further command is processed.
    pub fn tick(&mut self) -> Tick {
        let usb = self.usb;
        let reset = critical_section::with(|cs| {
            let mut dev = usb.borrow(cs).borrow_mut();
            if dev.take_async_reset() {
                dev.flush_bulk(cs);
                Some(dev.take_device_reset_request())
            } else {
                None
            }
        });
        if let Some(reset_requested) = reset {
            debug!("protocol reset");
            self.state = ProtocolState::Idle;
            self.leds.set(Led::Read, false);
            self.leds.set(Led::Write, false);
            if reset_requested && self.flash.is_unlocked() {
                self.flash.lock();
                return Tick::ResetDevice;
            }
        }

        match self.state {
            ProtocolState::Idle => self.state_idle(),
            ProtocolState::SetFlashKey => self.state_set_flash_key(),
            ProtocolState::TxPageInfo => self.state_tx_page_info(),
            ProtocolState::ReadPage => self.state_read_page(),
            ProtocolState::TxBlock => self.state_tx_block(),
            ProtocolState::WritePage => self.state_write_page(),
            ProtocolState::RxBlock => self.state_rx_block(),
            ProtocolState::TxSuccess => self.state_response(rsp::SUCCESS),
            ProtocolState::TxInvalid => self.state_response(rsp::INVALID),
        }
        Tick::Continue
    }

    fn take_out_packet(&mut self) -> Option<Packet> {
        let usb = self.usb;
        critical_section::with(|cs| usb.borrow(cs).borrow_mut().take_out_packet(cs))
    }

    fn put_in_packet(&mut self, packet: Packet) -> bool {
        let usb = self.usb;
        critical_section::with(|cs| usb.borrow(cs).borrow_mut().put_in_packet(cs, packet))
    }

    /// Byte address of the current block.
    fn block_addr(&self) -> u32 {
        self.layout.page_addr(self.page) + u32::from(self.block) * EP1_MAX_PACKET as u32
    }

    fn state_idle(&mut self) {
        let Some(packet) = self.take_out_packet() else {
            return;
        };
        self.command = packet;
        self.state = match packet[0] {
            cmd::SET_FLASH_KEY => ProtocolState::SetFlashKey,
            cmd::GET_PAGE_INFO => ProtocolState::TxPageInfo,
            cmd::READ_PAGE => ProtocolState::ReadPage,
            cmd::WRITE_PAGE => ProtocolState::WritePage,
            other => {
                warn!("unknown command {:#x}", other);
                ProtocolState::TxInvalid
            }
        };
    }

    fn state_set_flash_key(&mut self) {
        self.flash.set_key([self.command[1], self.command[2]]);
        self.state = ProtocolState::TxSuccess;
    }

    fn state_tx_page_info(&mut self) {
        let mut packet = [0u8; EP1_MAX_PACKET];
        packet[0] = rsp::SUCCESS;
        packet[1] = self.layout.num_pages;
        packet[2..4].copy_from_slice(&self.layout.page_size.to_le_bytes());
        if self.put_in_packet(packet) {
            self.state = ProtocolState::Idle;
        }
    }

    fn state_read_page(&mut self) {
        self.leds.set(Led::Read, true);
        self.page = self.command[1];
        self.block = 0;
        // Invalid pages still get the full block sequence, with dummy data;
        // the response byte carries the verdict.
        self.valid = self.layout.contains_page(self.page);
        debug!("read page {} (valid={})", self.page, self.valid);
        self.state = ProtocolState::TxBlock;
    }

    fn state_tx_block(&mut self) {
        if self.block == self.layout.blocks_per_page() {
            self.leds.set(Led::Read, false);
            self.state = if self.valid {
                ProtocolState::TxSuccess
            } else {
                ProtocolState::TxInvalid
            };
            return;
        }
        if self.valid {
            let addr = self.block_addr();
            self.flash.read(addr, &mut self.scratch);
        }
        if self.put_in_packet(self.scratch) {
            self.block += 1;
        }
    }

    fn state_write_page(&mut self) {
        self.leds.set(Led::Write, true);
        self.page = self.command[1];
        self.block = 0;
        self.valid = self.layout.contains_page(self.page);
        debug!("write page {} (valid={})", self.page, self.valid);
        if self.valid {
            self.flash.erase_page(self.layout.page_addr(self.page));
        }
        self.state = ProtocolState::RxBlock;
    }

    fn state_rx_block(&mut self) {
        if self.block == self.layout.blocks_per_page() {
            self.leds.set(Led::Write, false);
            self.state = if self.valid {
                ProtocolState::TxSuccess
            } else {
                ProtocolState::TxInvalid
            };
            return;
        }
        if let Some(packet) = self.take_out_packet() {
            if self.valid {
                self.flash.write(self.block_addr(), &packet);
            }
            self.block += 1;
        }
    }

    fn state_response(&mut self, code: u8) {
        let mut packet = [0u8; EP1_MAX_PACKET];
        packet[0] = code;
        if self.put_in_packet(packet) {
            self.state = ProtocolState::Idle;
        }
    }
}
