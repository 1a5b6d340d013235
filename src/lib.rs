//! Full-speed USB device stack for USB0-style (C8051F3xx/EFM8) device
//! cores, plus the bulk flash-programming protocol that runs on top of it.
//!
//! The stack is split along the hardware boundary:
//!
//! - [`regs`] talks to the peripheral through the two-register indirect
//!   window, abstracted by [`UsbPort`].
//! - [`device::UsbDevice`] owns all USB state and services interrupts:
//!   control transfers on EP0 (including the chapter-9 standard requests)
//!   and the single-slot bulk packet mailboxes on EP1.
//! - [`bulk::FlashProgrammer`] is the foreground application: a
//!   command/response protocol for reading and writing remote flash pages
//!   over the bulk pipe, gated by a two-byte interlock key.
//!
//! Interrupt and foreground context share the device through a
//! [`bulk::SharedDevice`] critical-section mutex; the register layer takes
//! the critical-section token as proof of exclusive hardware access.

#![cfg_attr(not(test), no_std)]

// Must come first so the macros are visible to the other modules.
mod fmt;

pub mod bulk;
mod control;
pub mod descriptor;
pub mod device;
pub mod endpoint;
pub mod flash;
pub mod regs;
pub mod setup;

pub use bulk::{FlashProgrammer, Indicators, Led, SharedDevice, Tick};
pub use device::{DeviceState, Packet, UsbDevice};
pub use endpoint::{EpIndex, EpRegistry, EpState};
pub use flash::{BadFlashLayout, FlashLayout, FlashStore, FLASH_KEY};
pub use regs::UsbPort;
pub use setup::SetupPacket;

/// Max packet size of the control endpoint.
pub const EP0_MAX_PACKET: usize = 64;

/// Max packet size of the bulk endpoints; also the protocol block size.
pub const EP1_MAX_PACKET: usize = 64;

/// Bulk IN endpoint address.
pub const IN_EP1_ADDR: u8 = 0x81;

/// Bulk OUT endpoint address.
pub const OUT_EP1_ADDR: u8 = 0x01;
