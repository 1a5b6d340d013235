//! Device context and interrupt servicing.
//!
//! [`UsbDevice`] owns the register port, the endpoint state registry, the
//! control-transfer state and the two single-slot bulk mailboxes. There is
//! one instance per USB core; callers share it between interrupt and
//! foreground context behind a
//! `embassy_sync::blocking_mutex::CriticalSectionMutex<RefCell<UsbDevice<P>>>`,
//! which also provides the [`CriticalSection`] token the register layer
//! requires.

use critical_section::CriticalSection;

use crate::endpoint::{EpIndex, EpRegistry, EpState};
use crate::fmt::{debug, trace, warn};
use crate::regs::{self, addr, cmint, eincsr1, eincsr2, eoutcsr1, in1int, out1int, power, UsbPort};
use crate::setup::SetupPacket;
use crate::EP1_MAX_PACKET;

/// One bulk packet. Bulk transfers are always full packets; short OUT
/// packets are flushed at the transport layer.
pub type Packet = [u8; EP1_MAX_PACKET];

/// Chapter-9 device state.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceState {
    Default,
    Addressed,
    Configured,
}

/// Progress of an EP0 IN data stage.
///
/// `data` is the full response already truncated to `wLength`; `sent` counts
/// bytes loaded into the FIFO so far.
#[derive(Copy, Clone)]
pub(crate) struct DataStage {
    pub(crate) data: &'static [u8],
    pub(crate) sent: usize,
}

impl DataStage {
    pub(crate) const fn empty() -> Self {
        Self { data: &[], sent: 0 }
    }
}

pub struct UsbDevice<P: UsbPort> {
    pub(crate) port: P,
    pub(crate) state: DeviceState,
    pub(crate) ep: EpRegistry,
    pub(crate) setup: SetupPacket,
    pub(crate) data: DataStage,
    /// Device address accepted by SET_ADDRESS, committed after the status
    /// stage.
    pub(crate) pending_addr: u8,
    in_packet: Option<Packet>,
    out_packet: Option<Packet>,
    async_reset: bool,
    pub(crate) device_reset_requested: bool,
    suspended: bool,
}

impl<P: UsbPort> UsbDevice<P> {
    pub fn new(port: P) -> Self {
        Self {
            port,
            state: DeviceState::Default,
            ep: EpRegistry::new(),
            setup: SetupPacket::zeroed(),
            data: DataStage::empty(),
            pending_addr: 0,
            in_packet: None,
            out_packet: None,
            async_reset: false,
            device_reset_requested: false,
            suspended: false,
        }
    }

    pub(crate) fn reg_read(&mut self, cs: CriticalSection<'_>, reg: u8) -> u8 {
        regs::read_register(&mut self.port, cs, reg)
    }

    pub(crate) fn reg_write(&mut self, cs: CriticalSection<'_>, reg: u8, value: u8) {
        regs::write_register(&mut self.port, cs, reg, value);
    }

    /// Bring the core out of inhibit and enable the interrupt sources this
    /// stack services.
    pub fn init(&mut self, cs: CriticalSection<'_>) {
        self.reg_write(cs, addr::POWER, power::USB_INHIBIT);
        self.reg_write(cs, addr::IN1IE, in1int::EP0 | in1int::IN1);
        self.reg_write(cs, addr::OUT1IE, out1int::OUT1);
        self.reg_write(
            cs,
            addr::CMIE,
            cmint::RESET | cmint::RESUME | cmint::SUSPEND | cmint::SOF,
        );
        self.reg_write(cs, addr::CLKREC, 0x89);
        self.reg_write(cs, addr::POWER, power::SUSPEND_ENABLE);
        debug!("usb core initialized");
    }

    /// Service all pending USB interrupts.
    ///
    /// The three interrupt registers are read-to-clear, so they are latched
    /// up front and every pending source is handled in this pass, in fixed
    /// priority order.
    pub fn poll_interrupts(&mut self, cs: CriticalSection<'_>) {
        let common = self.reg_read(cs, addr::CMINT);
        let in_int = self.reg_read(cs, addr::IN1INT);
        let out_int = self.reg_read(cs, addr::OUT1INT);

        if common & cmint::RESUME != 0 {
            self.bus_resume();
        }
        if common & cmint::RESET != 0 {
            self.bus_reset(cs);
        }
        if in_int & in1int::EP0 != 0 {
            self.handle_ep0(cs);
        }
        if in_int & in1int::IN1 != 0 {
            self.service_in1(cs);
        }
        if out_int & out1int::OUT1 != 0 {
            self.service_out1(cs);
        }
        if common & cmint::SUSPEND != 0 {
            self.bus_suspend();
        }
        if common & cmint::SOF != 0 {
            // Opportunistically keep the bulk FIFOs moving once per frame.
            trace!("sof");
            self.service_in1(cs);
            self.service_out1(cs);
        }
    }

    fn bus_reset(&mut self, cs: CriticalSection<'_>) {
        debug!("bus reset");
        self.state = DeviceState::Default;
        self.ep.reset();
        self.setup = SetupPacket::zeroed();
        self.data = DataStage::empty();
        self.pending_addr = 0;
        self.in_packet = None;
        self.out_packet = None;
        self.suspended = false;
        // Abort any bulk exchange in flight.
        self.async_reset = true;
        // A reset clears the interrupt enables along with everything else.
        self.reg_write(cs, addr::IN1IE, in1int::EP0 | in1int::IN1);
        self.reg_write(cs, addr::OUT1IE, out1int::OUT1);
        self.reg_write(
            cs,
            addr::CMIE,
            cmint::RESET | cmint::RESUME | cmint::SUSPEND | cmint::SOF,
        );
        self.reg_write(cs, addr::POWER, power::SUSPEND_ENABLE);
    }

    fn bus_resume(&mut self) {
        if self.suspended {
            debug!("bus resume");
        }
        self.suspended = false;
    }

    fn bus_suspend(&mut self) {
        debug!("bus suspend");
        self.suspended = true;
    }

    /// IN endpoint 1: if the FIFO is free and a packet is staged, load it.
    pub(crate) fn service_in1(&mut self, cs: CriticalSection<'_>) {
        self.reg_write(cs, addr::INDEX, 1);
        if self.ep.is_halted(EpIndex::In1) {
            // Keep NAK/STALLing while the endpoint is halted.
            self.reg_write(cs, addr::EINCSR1, eincsr1::SDSTL);
            return;
        }
        let csr = self.reg_read(cs, addr::EINCSR1);
        if csr & eincsr1::STSTL != 0 {
            // Clearing a sent stall also resets the data toggle.
            self.reg_write(cs, addr::EINCSR1, eincsr1::CLRDT);
        }
        if csr & eincsr1::INPRDY == 0 {
            if let Some(packet) = self.in_packet.take() {
                regs::fifo_write(&mut self.port, cs, addr::FIFO_EP1, &packet);
                self.reg_write(cs, addr::EINCSR1, eincsr1::INPRDY);
                trace!("in1 packet loaded");
            }
        }
    }

    /// OUT endpoint 1: unload a waiting packet into the mailbox.
    ///
    /// While the mailbox is occupied OPRDY stays asserted and the hardware
    /// NAKs further OUT traffic, so at most one packet is buffered.
    pub(crate) fn service_out1(&mut self, cs: CriticalSection<'_>) {
        self.reg_write(cs, addr::INDEX, 1);
        if self.ep.is_halted(EpIndex::Out1) {
            self.reg_write(cs, addr::EOUTCSR1, eoutcsr1::SDSTL);
            return;
        }
        let csr = self.reg_read(cs, addr::EOUTCSR1);
        if csr & eoutcsr1::STSTL != 0 {
            self.reg_write(cs, addr::EOUTCSR1, eoutcsr1::CLRDT);
        }
        if csr & eoutcsr1::OPRDY != 0 {
            let count = self.reg_read(cs, addr::EOUTCNTL);
            if usize::from(count) != EP1_MAX_PACKET {
                // Protocol packets are always full-size; discard runts.
                warn!("out1 short packet ({} bytes), flushed", count);
                self.reg_write(cs, addr::EOUTCSR1, eoutcsr1::FLUSH);
            } else if self.out_packet.is_none() {
                let mut packet = [0u8; EP1_MAX_PACKET];
                regs::fifo_read(&mut self.port, cs, addr::FIFO_EP1, &mut packet);
                self.out_packet = Some(packet);
                self.reg_write(cs, addr::EOUTCSR1, 0);
                trace!("out1 packet unloaded");
            }
        }
    }

    /// Stage a packet for IN endpoint 1. Returns false while the previous
    /// packet has not been picked up by the host.
    pub fn put_in_packet(&mut self, cs: CriticalSection<'_>, packet: Packet) -> bool {
        if self.in_packet.is_some() {
            return false;
        }
        self.in_packet = Some(packet);
        self.service_in1(cs);
        true
    }

    pub fn in_packet_free(&self) -> bool {
        self.in_packet.is_none()
    }

    /// Take the packet received on OUT endpoint 1, if any. Freeing the
    /// mailbox re-services the endpoint so a packet the hardware was holding
    /// off is unloaded immediately.
    pub fn take_out_packet(&mut self, cs: CriticalSection<'_>) -> Option<Packet> {
        let packet = self.out_packet.take();
        if packet.is_some() {
            self.service_out1(cs);
        }
        packet
    }

    /// Flush both bulk FIFOs and drop any staged packets.
    ///
    /// The double write covers the second half of the split (double-buffered)
    /// FIFO.
    pub fn flush_bulk(&mut self, cs: CriticalSection<'_>) {
        self.in_packet = None;
        self.out_packet = None;
        self.reg_write(cs, addr::INDEX, 1);
        self.reg_write(cs, addr::EINCSR1, eincsr1::FLUSH);
        self.reg_write(cs, addr::EINCSR1, eincsr1::FLUSH);
        self.reg_write(cs, addr::EOUTCSR1, eoutcsr1::FLUSH);
        self.reg_write(cs, addr::EOUTCSR1, eoutcsr1::FLUSH);
        self.reg_write(cs, addr::INDEX, 0);
    }

    /// True once per bus reset or host RST_STATE request; consuming it
    /// obliges the caller to reset the protocol layer.
    pub fn take_async_reset(&mut self) -> bool {
        core::mem::replace(&mut self.async_reset, false)
    }

    pub(crate) fn raise_async_reset(&mut self) {
        self.async_reset = true;
    }

    /// True once after the host asked for a full device reset.
    pub fn take_device_reset_request(&mut self) -> bool {
        core::mem::replace(&mut self.device_reset_requested, false)
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn endpoint_state(&self, ep: EpIndex) -> EpState {
        self.ep.get(ep)
    }

    /// Enter the Configured state: un-halt the bulk endpoints, put IN
    /// endpoint 1 in split mode and reset both data toggles.
    pub(crate) fn enter_configured(&mut self, cs: CriticalSection<'_>) {
        self.state = DeviceState::Configured;
        self.ep.set(EpIndex::In1, EpState::Idle);
        self.ep.set(EpIndex::Out1, EpState::Idle);
        self.reg_write(cs, addr::INDEX, 1);
        self.reg_write(cs, addr::EINCSR2, eincsr2::SPLIT);
        self.reg_write(cs, addr::EINCSR1, eincsr1::CLRDT);
        self.reg_write(cs, addr::EOUTCSR1, eoutcsr1::CLRDT);
        // Prime IN endpoint 1 in case a packet was staged while unconfigured.
        self.service_in1(cs);
        self.reg_write(cs, addr::INDEX, 0);
    }

    /// Leave the Configured state: bulk endpoints halt until the host picks
    /// a configuration again.
    pub(crate) fn leave_configured(&mut self) {
        self.state = DeviceState::Addressed;
        self.ep.set(EpIndex::In1, EpState::Halt);
        self.ep.set(EpIndex::Out1, EpState::Halt);
    }

    /// Host-directed ENDPOINT_HALT set/clear on a bulk endpoint.
    pub(crate) fn set_endpoint_halt(&mut self, cs: CriticalSection<'_>, ep: EpIndex, halt: bool) {
        self.reg_write(cs, addr::INDEX, 1);
        match (ep, halt) {
            (EpIndex::In1, true) => {
                self.reg_write(cs, addr::EINCSR1, eincsr1::SDSTL);
                self.ep.set(EpIndex::In1, EpState::Halt);
            }
            (EpIndex::In1, false) => {
                // Clearing the halt also resets the data toggle.
                self.reg_write(cs, addr::EINCSR1, eincsr1::CLRDT);
                self.ep.set(EpIndex::In1, EpState::Idle);
            }
            (EpIndex::Out1, true) => {
                self.reg_write(cs, addr::EOUTCSR1, eoutcsr1::SDSTL);
                self.ep.set(EpIndex::Out1, EpState::Halt);
            }
            (EpIndex::Out1, false) => {
                self.reg_write(cs, addr::EOUTCSR1, eoutcsr1::CLRDT);
                self.ep.set(EpIndex::Out1, EpState::Idle);
            }
            (EpIndex::Control, _) => {}
        }
        self.reg_write(cs, addr::INDEX, 0);
    }
}
