//! Register map and FIFO transport for USB0-style device cores.
//!
//! The C8051F3xx/EFM8 USB peripheral is reached through a two-register
//! indirect window: an address register with a busy flag and an auto-read
//! mode bit, and a data register. [`UsbPort`] abstracts that window so the
//! rest of the stack is hardware-independent; the free functions below
//! implement the busy-polled access discipline on top of it.
//!
//! The address/data window is shared, non-reentrant hardware state. Every
//! accessor takes a [`CriticalSection`] token: interrupt-context callers
//! already hold one, and foreground callers must enter one (e.g. via
//! `critical_section::with`) for the duration of their register sequence.

use critical_section::CriticalSection;

/// Busy flag in the address register. Set to initiate a read; reads as 1
/// while the peripheral transfers the byte.
pub const BUSY: u8 = 0x80;

/// Auto-increment read mode: each data-register read fetches the next FIFO
/// byte without rewriting the address register.
pub const AUTO_READ: u8 = 0x40;

/// Access to the indirect address/data register pair (USB0ADR/USB0DAT).
///
/// Implementations are expected to be thin volatile accessors over the two
/// special function registers; on a host they can front a software model of
/// the peripheral.
pub trait UsbPort {
    fn addr_write(&mut self, value: u8);
    fn addr_read(&mut self) -> u8;
    fn data_write(&mut self, value: u8);
    fn data_read(&mut self) -> u8;
}

/// Indirect register addresses.
///
/// `E0CSR`/`EINCSR1` and `E0CNT`/`EOUTCNTL` share addresses; the `INDEX`
/// register selects which endpoint's bank is visible.
pub mod addr {
    pub const FADDR: u8 = 0x00;
    pub const POWER: u8 = 0x01;
    pub const IN1INT: u8 = 0x02;
    pub const OUT1INT: u8 = 0x04;
    pub const CMINT: u8 = 0x06;
    pub const IN1IE: u8 = 0x07;
    pub const OUT1IE: u8 = 0x09;
    pub const CMIE: u8 = 0x0b;
    pub const FRAMEL: u8 = 0x0c;
    pub const FRAMEH: u8 = 0x0d;
    pub const INDEX: u8 = 0x0e;
    pub const CLKREC: u8 = 0x0f;
    pub const E0CSR: u8 = 0x11; // INDEX = 0
    pub const EINCSR1: u8 = 0x11; // INDEX = 1
    pub const EINCSR2: u8 = 0x12;
    pub const EOUTCSR1: u8 = 0x14;
    pub const EOUTCSR2: u8 = 0x15;
    pub const E0CNT: u8 = 0x16; // INDEX = 0
    pub const EOUTCNTL: u8 = 0x16; // INDEX = 1
    pub const EOUTCNTH: u8 = 0x17;
    pub const FIFO_EP0: u8 = 0x20;
    pub const FIFO_EP1: u8 = 0x21;
}

/// POWER register bits.
pub mod power {
    pub const SUSPEND_ENABLE: u8 = 0x01;
    pub const SUSPEND_MODE: u8 = 0x02;
    pub const RESUME: u8 = 0x04;
    pub const USB_RESET: u8 = 0x08;
    pub const USB_INHIBIT: u8 = 0x10;
    pub const ISO_UPDATE: u8 = 0x80;
}

/// Common interrupt flags (CMINT, read-to-clear).
pub mod cmint {
    pub const SUSPEND: u8 = 0x01;
    pub const RESUME: u8 = 0x02;
    pub const RESET: u8 = 0x04;
    pub const SOF: u8 = 0x08;
}

/// IN endpoint interrupt flags (IN1INT, read-to-clear).
pub mod in1int {
    pub const EP0: u8 = 0x01;
    pub const IN1: u8 = 0x02;
}

/// OUT endpoint interrupt flags (OUT1INT, read-to-clear).
pub mod out1int {
    pub const OUT1: u8 = 0x02;
}

/// Endpoint 0 control/status bits (E0CSR).
pub mod e0csr {
    /// An OUT (or Setup) packet is waiting in the FIFO.
    pub const OPRDY: u8 = 0x01;
    /// An IN packet has been loaded and is pending transmission.
    pub const INPRDY: u8 = 0x02;
    /// A stall was transmitted for the previous request.
    pub const STSTL: u8 = 0x04;
    /// The current packet completes the data stage.
    pub const DATAEND: u8 = 0x08;
    /// The host ended the setup transaction prematurely.
    pub const SUEND: u8 = 0x10;
    /// Send a stall in response to the current request.
    pub const SDSTL: u8 = 0x20;
    /// Serviced OPRDY: acknowledge consumption of the OUT/Setup packet.
    pub const SOPRDY: u8 = 0x40;
    /// Serviced setup end: acknowledge a SUEND condition.
    pub const SSUEND: u8 = 0x80;
}

/// IN endpoint 1 control/status bits (EINCSR1).
pub mod eincsr1 {
    pub const INPRDY: u8 = 0x01;
    pub const FIFO_NOT_EMPTY: u8 = 0x02;
    pub const UNDERRUN: u8 = 0x04;
    pub const FLUSH: u8 = 0x08;
    pub const SDSTL: u8 = 0x10;
    pub const STSTL: u8 = 0x20;
    pub const CLRDT: u8 = 0x40;
}

/// IN endpoint 1 configuration bits (EINCSR2).
pub mod eincsr2 {
    /// Split the endpoint FIFO into separate IN and OUT halves.
    pub const SPLIT: u8 = 0x04;
    pub const DIRSEL: u8 = 0x20;
    pub const ISO: u8 = 0x40;
}

/// OUT endpoint 1 control/status bits (EOUTCSR1).
pub mod eoutcsr1 {
    pub const OPRDY: u8 = 0x01;
    pub const FIFO_FULL: u8 = 0x02;
    pub const OVERRUN: u8 = 0x04;
    pub const DATA_ERROR: u8 = 0x08;
    pub const FLUSH: u8 = 0x10;
    pub const SDSTL: u8 = 0x20;
    pub const STSTL: u8 = 0x40;
    pub const CLRDT: u8 = 0x80;
}

/// Read one indirect register, polling the busy flag.
pub fn read_register<P: UsbPort>(port: &mut P, _cs: CriticalSection<'_>, reg: u8) -> u8 {
    port.addr_write(BUSY | reg);
    while port.addr_read() & BUSY != 0 {}
    port.data_read()
}

/// Write one indirect register, polling the busy flag.
pub fn write_register<P: UsbPort>(port: &mut P, _cs: CriticalSection<'_>, reg: u8, value: u8) {
    while port.addr_read() & BUSY != 0 {}
    port.addr_write(reg);
    port.data_write(value);
}

/// Unload `buf.len()` bytes from the selected endpoint FIFO.
///
/// Selects the FIFO for auto-increment reading, polls the busy flag before
/// each byte, and clears the auto-read mode afterwards. A zero-length read
/// is a no-op. Blocking is bounded by the peripheral's per-byte transfer
/// time; there is no timeout.
pub fn fifo_read<P: UsbPort>(port: &mut P, _cs: CriticalSection<'_>, fifo: u8, buf: &mut [u8]) {
    if buf.is_empty() {
        return;
    }

    // Set the FIFO address and initiate the first read.
    port.addr_write(BUSY | AUTO_READ | fifo);
    for byte in buf.iter_mut() {
        while port.addr_read() & BUSY != 0 {}
        *byte = port.data_read();
    }

    // Leave auto-read mode.
    port.addr_write(0);
}

/// Load `data` into the selected endpoint FIFO.
///
/// Same busy-poll discipline as [`fifo_read`], write direction. A
/// zero-length write is a no-op.
pub fn fifo_write<P: UsbPort>(port: &mut P, _cs: CriticalSection<'_>, fifo: u8, data: &[u8]) {
    if data.is_empty() {
        return;
    }

    while port.addr_read() & BUSY != 0 {}
    port.addr_write(fifo);
    for byte in data {
        port.data_write(*byte);
        while port.addr_read() & BUSY != 0 {}
    }
}
