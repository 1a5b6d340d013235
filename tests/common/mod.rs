//! Shared test harness: a software model of the USB0 indirect register
//! window plus in-memory flash and indicator recorders.
//!
//! The model implements [`UsbPort`] behind an `Rc<RefCell<..>>` handle so a
//! test keeps a second handle for the host side: queueing Setup packets and
//! OUT data, collecting IN packets, and raising interrupt causes. IN packets
//! are "collected by the host" the moment INPRDY is written, which raises
//! the corresponding transmit-complete interrupt just like the hardware.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::mem;
use std::rc::Rc;

use usb0_bulk::bulk::{Indicators, Led};
use usb0_bulk::flash::{FlashLayout, FlashStore, FLASH_KEY};
use usb0_bulk::regs::{addr, cmint, e0csr, eincsr1, eoutcsr1, in1int, out1int, UsbPort};
use usb0_bulk::{SharedDevice, UsbDevice, EP1_MAX_PACKET};

/// Flash geometry used throughout the tests: 4 pages of 512 bytes.
pub const TEST_LAYOUT: FlashLayout = FlashLayout {
    start: 0x1000,
    page_size: 512,
    num_pages: 4,
};

struct Regs([u8; 0x40]);

impl Default for Regs {
    fn default() -> Self {
        Self([0; 0x40])
    }
}

#[derive(Default)]
struct Model {
    addr: u8,
    index: u8,
    regs: Regs,

    cmint: u8,
    in1int: u8,
    out1int: u8,

    // EP0
    e0csr: u8,
    ep0_read: VecDeque<u8>,
    ep0_staging: Vec<u8>,
    ep0_in_packets: Vec<Vec<u8>>,
    ep0_stalls: usize,

    // EP1 IN
    eincsr1_ststl: bool,
    ep1_in_stalled: bool,
    ep1_staging: Vec<u8>,
    ep1_in_packets: Vec<Vec<u8>>,

    // EP1 OUT
    eoutcsr1_ststl: bool,
    ep1_out_stalled: bool,
    ep1_oprdy: bool,
    ep1_out_cur: VecDeque<u8>,
    ep1_out_count: usize,
    ep1_pending: VecDeque<Vec<u8>>,
    ep1_out_flushes: usize,
}

impl Model {
    fn data_read(&mut self) -> u8 {
        match self.addr & 0x3f {
            addr::FIFO_EP0 => self.ep0_read.pop_front().unwrap_or(0),
            addr::FIFO_EP1 => self.ep1_out_cur.pop_front().unwrap_or(0),
            addr::CMINT => mem::take(&mut self.cmint),
            addr::IN1INT => mem::take(&mut self.in1int),
            addr::OUT1INT => mem::take(&mut self.out1int),
            0x11 if self.index == 0 => self.e0csr,
            0x11 => {
                let mut v = 0;
                if self.eincsr1_ststl {
                    v |= eincsr1::STSTL;
                }
                v
            }
            0x14 => {
                let mut v = 0;
                if self.ep1_oprdy {
                    v |= eoutcsr1::OPRDY;
                }
                if self.eoutcsr1_ststl {
                    v |= eoutcsr1::STSTL;
                }
                v
            }
            0x16 if self.index == 0 => self.ep0_read.len() as u8,
            0x16 => self.ep1_out_count as u8,
            r => self.regs.0[usize::from(r)],
        }
    }

    fn data_write(&mut self, value: u8) {
        match self.addr & 0x3f {
            addr::FIFO_EP0 => self.ep0_staging.push(value),
            addr::FIFO_EP1 => self.ep1_staging.push(value),
            addr::INDEX => self.index = value,
            0x11 if self.index == 0 => self.write_e0csr(value),
            0x11 => self.write_eincsr1(value),
            0x14 => self.write_eoutcsr1(value),
            r => self.regs.0[usize::from(r)] = value,
        }
    }

    fn write_e0csr(&mut self, value: u8) {
        if value == 0 {
            self.e0csr &= !e0csr::STSTL;
            return;
        }
        if value & e0csr::SOPRDY != 0 {
            self.e0csr &= !e0csr::OPRDY;
        }
        if value & e0csr::SSUEND != 0 {
            self.e0csr &= !e0csr::SUEND;
        }
        if value & e0csr::SDSTL != 0 {
            // Hardware sets STSTL once the stall handshake has gone out and
            // reports it with another EP0 interrupt.
            self.ep0_stalls += 1;
            self.e0csr |= e0csr::STSTL;
            self.in1int |= in1int::EP0;
        }
        if value & e0csr::INPRDY != 0 {
            let packet = mem::take(&mut self.ep0_staging);
            self.ep0_in_packets.push(packet);
        }
        if value & (e0csr::INPRDY | e0csr::DATAEND) != 0 {
            // IN transaction or status stage complete.
            self.in1int |= in1int::EP0;
        }
    }

    fn write_eincsr1(&mut self, value: u8) {
        if value == 0 {
            self.eincsr1_ststl = false;
            return;
        }
        if value & eincsr1::FLUSH != 0 {
            self.ep1_staging.clear();
        }
        if value & eincsr1::SDSTL != 0 {
            self.ep1_in_stalled = true;
        }
        if value & eincsr1::CLRDT != 0 {
            self.ep1_in_stalled = false;
            self.eincsr1_ststl = false;
        }
        if value & eincsr1::INPRDY != 0 {
            let packet = mem::take(&mut self.ep1_staging);
            self.ep1_in_packets.push(packet);
            self.in1int |= in1int::IN1;
        }
    }

    fn write_eoutcsr1(&mut self, value: u8) {
        if value == 0 {
            self.eoutcsr1_ststl = false;
            self.clear_out_packet();
            return;
        }
        if value & eoutcsr1::FLUSH != 0 {
            self.ep1_out_flushes += 1;
            self.clear_out_packet();
        }
        if value & eoutcsr1::SDSTL != 0 {
            self.ep1_out_stalled = true;
        }
        if value & eoutcsr1::CLRDT != 0 {
            self.ep1_out_stalled = false;
            self.eoutcsr1_ststl = false;
        }
    }

    fn clear_out_packet(&mut self) {
        self.ep1_oprdy = false;
        self.ep1_out_cur.clear();
        self.ep1_out_count = 0;
        self.load_next_out();
    }

    fn load_next_out(&mut self) {
        if self.ep1_oprdy {
            return;
        }
        if let Some(packet) = self.ep1_pending.pop_front() {
            self.ep1_out_count = packet.len();
            self.ep1_out_cur = packet.into();
            self.ep1_oprdy = true;
            self.out1int |= out1int::OUT1;
        }
    }
}

/// Cloneable handle to the simulated peripheral; one clone goes into the
/// [`UsbDevice`], the test keeps another for host-side access.
#[derive(Clone, Default)]
pub struct SimBus(Rc<RefCell<Model>>);

impl UsbPort for SimBus {
    fn addr_write(&mut self, value: u8) {
        self.0.borrow_mut().addr = value;
    }

    fn addr_read(&mut self) -> u8 {
        // The model transfers bytes instantly, so BUSY never reads back set.
        self.0.borrow().addr & 0x7f
    }

    fn data_write(&mut self, value: u8) {
        self.0.borrow_mut().data_write(value);
    }

    fn data_read(&mut self) -> u8 {
        self.0.borrow_mut().data_read()
    }
}

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a Setup packet and raise the EP0 interrupt.
    pub fn push_setup(&self, raw: [u8; 8]) {
        let mut m = self.0.borrow_mut();
        m.ep0_read.extend(raw);
        m.e0csr |= e0csr::OPRDY;
        m.in1int |= in1int::EP0;
    }

    /// Queue a host OUT packet for bulk endpoint 1.
    pub fn host_out(&self, data: &[u8]) {
        let mut m = self.0.borrow_mut();
        m.ep1_pending.push_back(data.to_vec());
        m.load_next_out();
    }

    /// Drain the EP0 IN packets collected so far.
    pub fn take_ep0_packets(&self) -> Vec<Vec<u8>> {
        mem::take(&mut self.0.borrow_mut().ep0_in_packets)
    }

    /// Drain the bulk IN packets collected so far.
    pub fn take_ep1_in_packets(&self) -> Vec<Vec<u8>> {
        mem::take(&mut self.0.borrow_mut().ep1_in_packets)
    }

    /// Number of EP0 stall handshakes sent since last checked.
    pub fn take_ep0_stalls(&self) -> usize {
        mem::take(&mut self.0.borrow_mut().ep0_stalls)
    }

    pub fn take_out_flushes(&self) -> usize {
        mem::take(&mut self.0.borrow_mut().ep1_out_flushes)
    }

    pub fn ep1_in_stalled(&self) -> bool {
        self.0.borrow().ep1_in_stalled
    }

    pub fn ep1_out_stalled(&self) -> bool {
        self.0.borrow().ep1_out_stalled
    }

    /// Peek a plain register (FADDR, POWER, interrupt enables).
    pub fn reg(&self, reg: u8) -> u8 {
        self.0.borrow().regs.0[usize::from(reg)]
    }

    pub fn raise_bus_reset(&self) {
        self.0.borrow_mut().cmint |= cmint::RESET;
    }

    pub fn raise_suspend(&self) {
        self.0.borrow_mut().cmint |= cmint::SUSPEND;
    }

    pub fn raise_resume(&self) {
        self.0.borrow_mut().cmint |= cmint::RESUME;
    }

    pub fn has_pending_irq(&self) -> bool {
        let m = self.0.borrow();
        m.cmint | m.in1int | m.out1int != 0
    }
}

/// Key-gated in-memory flash.
pub struct MemFlash {
    layout: FlashLayout,
    pub mem: Vec<u8>,
    key: [u8; 2],
    pub erases: usize,
}

impl MemFlash {
    pub fn new(layout: FlashLayout) -> Self {
        let size = usize::from(layout.page_size) * usize::from(layout.num_pages);
        Self {
            layout,
            mem: vec![0xff; size],
            key: [0, 0],
            erases: 0,
        }
    }

    /// Fill a page with a recognizable pattern, bypassing the key gate.
    pub fn preload_page(&mut self, page: u8, seed: u8) {
        let page_size = usize::from(self.layout.page_size);
        let start = usize::from(page) * page_size;
        for (i, byte) in self.mem[start..start + page_size].iter_mut().enumerate() {
            *byte = seed.wrapping_add(i as u8);
        }
    }

    pub fn page(&self, page: u8) -> &[u8] {
        let page_size = usize::from(self.layout.page_size);
        let start = usize::from(page) * page_size;
        &self.mem[start..start + page_size]
    }

    fn offset(&self, addr: u32) -> usize {
        (addr - self.layout.start) as usize
    }
}

impl FlashStore for MemFlash {
    fn set_key(&mut self, key: [u8; 2]) {
        self.key = key;
    }

    fn lock(&mut self) {
        self.key = [0, 0];
    }

    fn is_unlocked(&self) -> bool {
        self.key == FLASH_KEY
    }

    fn erase_page(&mut self, addr: u32) {
        if !self.is_unlocked() {
            return;
        }
        self.erases += 1;
        let start = self.offset(addr);
        let page_size = usize::from(self.layout.page_size);
        self.mem[start..start + page_size].fill(0xff);
    }

    fn write(&mut self, addr: u32, data: &[u8]) {
        if !self.is_unlocked() {
            return;
        }
        let start = self.offset(addr);
        self.mem[start..start + data.len()].copy_from_slice(data);
    }

    fn read(&mut self, addr: u32, buf: &mut [u8]) {
        let start = self.offset(addr);
        buf.copy_from_slice(&self.mem[start..start + buf.len()]);
    }
}

/// Cloneable [`MemFlash`] handle so a test can inspect flash contents after
/// handing the store to a `FlashProgrammer`.
#[derive(Clone)]
pub struct SharedFlash(Rc<RefCell<MemFlash>>);

impl SharedFlash {
    pub fn new(layout: FlashLayout) -> Self {
        Self(Rc::new(RefCell::new(MemFlash::new(layout))))
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut MemFlash) -> R) -> R {
        f(&mut self.0.borrow_mut())
    }
}

impl FlashStore for SharedFlash {
    fn set_key(&mut self, key: [u8; 2]) {
        self.0.borrow_mut().set_key(key);
    }

    fn lock(&mut self) {
        self.0.borrow_mut().lock();
    }

    fn is_unlocked(&self) -> bool {
        self.0.borrow().is_unlocked()
    }

    fn erase_page(&mut self, addr: u32) {
        self.0.borrow_mut().erase_page(addr);
    }

    fn write(&mut self, addr: u32, data: &[u8]) {
        self.0.borrow_mut().write(addr, data);
    }

    fn read(&mut self, addr: u32, buf: &mut [u8]) {
        self.0.borrow_mut().read(addr, buf);
    }
}

#[derive(Default)]
pub struct LedState {
    pub read: bool,
    pub write: bool,
    pub events: Vec<(Led, bool)>,
}

/// Indicator recorder; clones share state with the test.
#[derive(Clone, Default)]
pub struct TestLeds(Rc<RefCell<LedState>>);

impl Indicators for TestLeds {
    fn set(&mut self, led: Led, on: bool) {
        let mut state = self.0.borrow_mut();
        match led {
            Led::Read => state.read = on,
            Led::Write => state.write = on,
        }
        state.events.push((led, on));
    }
}

impl TestLeds {
    pub fn read_on(&self) -> bool {
        self.0.borrow().read
    }

    pub fn write_on(&self) -> bool {
        self.0.borrow().write
    }

    pub fn events(&self) -> Vec<(Led, bool)> {
        self.0.borrow().events.clone()
    }
}

pub fn make_setup(request_type: u8, request: u8, value: u16, index: u16, length: u16) -> [u8; 8] {
    let v = value.to_le_bytes();
    let i = index.to_le_bytes();
    let l = length.to_le_bytes();
    [request_type, request, v[0], v[1], i[0], i[1], l[0], l[1]]
}

/// Build a full-size bulk command packet: command byte plus parameters.
pub fn command_packet(command: u8, params: &[u8]) -> Vec<u8> {
    let mut packet = vec![0u8; EP1_MAX_PACKET];
    packet[0] = command;
    packet[1..1 + params.len()].copy_from_slice(params);
    packet
}

pub fn new_device(bus: &SimBus) -> SharedDevice<SimBus> {
    let usb = SharedDevice::new(RefCell::new(UsbDevice::new(bus.clone())));
    critical_section::with(|cs| usb.borrow(cs).borrow_mut().init(cs));
    usb
}

pub fn poll(usb: &SharedDevice<SimBus>) {
    critical_section::with(|cs| usb.borrow(cs).borrow_mut().poll_interrupts(cs));
}

/// Poll until no interrupt cause remains pending.
pub fn run_until_idle(bus: &SimBus, usb: &SharedDevice<SimBus>) {
    for _ in 0..64 {
        if !bus.has_pending_irq() {
            return;
        }
        poll(usb);
    }
    panic!("usb interrupts did not settle");
}

/// Address and configure the device the way a host would.
pub fn enumerate(bus: &SimBus, usb: &SharedDevice<SimBus>) {
    bus.push_setup(make_setup(0x00, 0x05, 5, 0, 0)); // SET_ADDRESS
    run_until_idle(bus, usb);
    bus.push_setup(make_setup(0x00, 0x09, 1, 0, 0)); // SET_CONFIGURATION
    run_until_idle(bus, usb);
    assert_eq!(bus.take_ep0_stalls(), 0);
}
