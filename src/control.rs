//! Control transfer engine and request handlers for endpoint 0.
//!
//! One entry point, [`UsbDevice::handle_ep0`], runs the whole EP0 lifecycle:
//! stall/setup-end recovery, deferred address commit, Setup dispatch and the
//! IN data-stage pump. Handlers validate the Setup packet exhaustively and
//! fall back to a protocol stall for anything this device does not
//! implement.

use critical_section::CriticalSection;

use crate::descriptor::{desc_type, CONFIG_DESC, DEVICE_DESC, MAX_STRING_INDEX, STRING_DESC_TABLE};
use crate::device::{DataStage, DeviceState, UsbDevice};
use crate::endpoint::{EpIndex, EpState};
use crate::fmt::{debug, warn};
use crate::regs::{self, addr, e0csr, UsbPort};
use crate::setup::{Direction, Recipient, RequestKind, SetupPacket, StandardRequest,
                   VendorRequest, FEATURE_ENDPOINT_HALT, SETUP_LEN};
use crate::{EP0_MAX_PACKET, IN_EP1_ADDR, OUT_EP1_ADDR};

// Canned IN data-stage payloads. Every reply this device can give is one of
// these, so the data stage never needs an owned buffer.
static STATUS_OK: [u8; 2] = [0, 0];
static STATUS_HALTED: [u8; 2] = [1, 0];
static BYTE_ZERO: [u8; 1] = [0];
static BYTE_ONE: [u8; 1] = [1];

impl<P: UsbPort> UsbDevice<P> {
    /// Service an endpoint 0 interrupt.
    pub(crate) fn handle_ep0(&mut self, cs: CriticalSection<'_>) {
        self.reg_write(cs, addr::INDEX, 0);
        let csr = self.reg_read(cs, addr::E0CSR);

        // A stall was sent for the previous request; clear it and rearm.
        // The interrupt that reported it carries no new Setup packet, so
        // this pass ends here.
        if csr & e0csr::STSTL != 0 {
            self.reg_write(cs, addr::E0CSR, 0);
            self.ep.set(EpIndex::Control, EpState::Idle);
            self.data = DataStage::empty();
            return;
        }

        // The host cut the transfer short; acknowledge and abandon it.
        if csr & e0csr::SUEND != 0 {
            self.reg_write(cs, addr::E0CSR, e0csr::SSUEND);
            self.ep.set(EpIndex::Control, EpState::Idle);
            self.data = DataStage::empty();
        }

        // SET_ADDRESS status stage done: the new address takes effect now.
        if self.ep.get(EpIndex::Control) == EpState::AddressPending {
            let address = self.pending_addr;
            self.reg_write(cs, addr::FADDR, address);
            self.state = if address == 0 {
                DeviceState::Default
            } else {
                DeviceState::Addressed
            };
            self.ep.set(EpIndex::Control, EpState::Idle);
            debug!("address {} committed", address);
        }

        if csr & e0csr::OPRDY != 0 {
            let mut raw = [0u8; SETUP_LEN];
            regs::fifo_read(&mut self.port, cs, addr::FIFO_EP0, &mut raw);
            self.setup = SetupPacket::parse(&raw);
            self.dispatch_setup(cs);
        }

        // Keep the IN data stage moving whenever the FIFO has room.
        if self.ep.get(EpIndex::Control) == EpState::Transmit {
            let csr = self.reg_read(cs, addr::E0CSR);
            if csr & (e0csr::INPRDY | e0csr::SUEND | e0csr::OPRDY) == 0 {
                self.pump_tx(cs);
            }
        }
    }

    fn dispatch_setup(&mut self, cs: CriticalSection<'_>) {
        match self.setup.kind() {
            RequestKind::Standard => match StandardRequest::from_code(self.setup.request) {
                Some(StandardRequest::GetStatus) => self.get_status(cs),
                Some(StandardRequest::ClearFeature) => self.endpoint_feature(cs, false),
                Some(StandardRequest::SetFeature) => self.endpoint_feature(cs, true),
                Some(StandardRequest::SetAddress) => self.set_address(cs),
                Some(StandardRequest::GetDescriptor) => self.get_descriptor(cs),
                Some(StandardRequest::GetConfiguration) => self.get_configuration(cs),
                Some(StandardRequest::SetConfiguration) => self.set_configuration(cs),
                Some(StandardRequest::GetInterface) => self.get_interface(cs),
                Some(StandardRequest::SetInterface) => self.set_interface(cs),
                None => self.force_stall(cs),
            },
            RequestKind::Vendor => match VendorRequest::from_code(self.setup.request) {
                Some(VendorRequest::ResetState) => self.reset_state(cs),
                None => self.force_stall(cs),
            },
            // No class requests on a vendor-specific interface.
            RequestKind::Class | RequestKind::Reserved => self.force_stall(cs),
        }
    }

    /// Load the next data-stage packet into the EP0 FIFO.
    ///
    /// DATAEND goes out with the packet that exhausts the (already
    /// wLength-truncated) response, so a response that is an exact multiple
    /// of the packet size terminates without a zero-length packet.
    fn pump_tx(&mut self, cs: CriticalSection<'_>) {
        let data = self.data.data;
        let sent = self.data.sent;
        let chunk = (data.len() - sent).min(EP0_MAX_PACKET);
        regs::fifo_write(&mut self.port, cs, addr::FIFO_EP0, &data[sent..sent + chunk]);
        self.data.sent = sent + chunk;
        if self.data.sent == data.len() {
            self.reg_write(cs, addr::E0CSR, e0csr::INPRDY | e0csr::DATAEND);
            self.ep.set(EpIndex::Control, EpState::Idle);
        } else {
            self.reg_write(cs, addr::E0CSR, e0csr::INPRDY);
        }
    }

    /// Stall the request currently on EP0.
    fn force_stall(&mut self, cs: CriticalSection<'_>) {
        warn!(
            "stalling request type {:#x} code {:#x}",
            self.setup.request_type, self.setup.request
        );
        self.reg_write(cs, addr::INDEX, 0);
        self.reg_write(cs, addr::E0CSR, e0csr::SDSTL);
        self.ep.set(EpIndex::Control, EpState::Stall);
    }

    /// Truncate `data` to wLength and queue it as the IN data stage.
    fn set_tx_data(&mut self, data: &'static [u8]) {
        let len = data.len().min(usize::from(self.setup.length));
        self.data = DataStage {
            data: &data[..len],
            sent: 0,
        };
    }

    /// Acknowledge the Setup packet and enter the IN data stage.
    fn start_tx(&mut self, cs: CriticalSection<'_>) {
        if self.ep.get(EpIndex::Control) != EpState::Stall {
            self.ep.set(EpIndex::Control, EpState::Transmit);
            self.reg_write(cs, addr::E0CSR, e0csr::SOPRDY);
        }
    }

    /// Acknowledge a no-data request; the status stage completes it.
    fn finish_status(&mut self, cs: CriticalSection<'_>) {
        if self.ep.get(EpIndex::Control) != EpState::Stall {
            self.reg_write(cs, addr::E0CSR, e0csr::SOPRDY | e0csr::DATAEND);
        }
    }

    /// Map the endpoint address in wIndex to a bulk endpoint.
    fn target_endpoint(&self) -> Option<EpIndex> {
        match self.setup.index_lo() {
            IN_EP1_ADDR => Some(EpIndex::In1),
            OUT_EP1_ADDR => Some(EpIndex::Out1),
            _ => None,
        }
    }

    fn get_status(&mut self, cs: CriticalSection<'_>) {
        let setup = self.setup;
        if setup.direction() != Direction::In || setup.value != 0 || setup.length != 2 {
            self.force_stall(cs);
            self.start_tx(cs);
            return;
        }
        match setup.recipient() {
            Recipient::Device if setup.index == 0 => {
                // Bus powered, no remote wakeup.
                self.set_tx_data(&STATUS_OK);
            }
            Recipient::Interface
                if self.state == DeviceState::Configured && setup.index == 0 =>
            {
                self.set_tx_data(&STATUS_OK);
            }
            Recipient::Endpoint if self.state == DeviceState::Configured => {
                match self.target_endpoint() {
                    Some(ep) if self.ep.is_halted(ep) => self.set_tx_data(&STATUS_HALTED),
                    Some(_) => self.set_tx_data(&STATUS_OK),
                    None => self.force_stall(cs),
                }
            }
            _ => self.force_stall(cs),
        }
        self.start_tx(cs);
    }

    fn endpoint_feature(&mut self, cs: CriticalSection<'_>, halt: bool) {
        let setup = self.setup;
        let valid = setup.direction() == Direction::Out
            && setup.recipient() == Recipient::Endpoint
            && setup.value == FEATURE_ENDPOINT_HALT
            && setup.length == 0
            && self.state == DeviceState::Configured;
        match self.target_endpoint() {
            Some(ep) if valid => {
                debug!("endpoint {:#x} halt={}", setup.index_lo(), halt);
                self.set_endpoint_halt(cs, ep, halt);
            }
            _ => self.force_stall(cs),
        }
        self.finish_status(cs);
    }

    fn set_address(&mut self, cs: CriticalSection<'_>) {
        let setup = self.setup;
        if setup.direction() != Direction::Out
            || setup.recipient() != Recipient::Device
            || setup.index != 0
            || setup.length != 0
            || setup.value > 0x7f
        {
            self.force_stall(cs);
            self.finish_status(cs);
            return;
        }
        // Committed once the status stage completes; replies to the rest of
        // this transfer still use the old address.
        self.pending_addr = setup.value_lo();
        self.ep.set(EpIndex::Control, EpState::AddressPending);
        self.reg_write(cs, addr::E0CSR, e0csr::SOPRDY | e0csr::DATAEND);
    }

    fn get_descriptor(&mut self, cs: CriticalSection<'_>) {
        let setup = self.setup;
        if setup.direction() != Direction::In || setup.recipient() != Recipient::Device {
            self.force_stall(cs);
            self.start_tx(cs);
            return;
        }
        match setup.value_hi() {
            desc_type::DEVICE => self.set_tx_data(bytemuck::bytes_of(&DEVICE_DESC)),
            desc_type::CONFIGURATION if setup.value_lo() == 0 => {
                self.set_tx_data(bytemuck::bytes_of(&CONFIG_DESC));
            }
            desc_type::STRING if setup.value_lo() <= MAX_STRING_INDEX => {
                self.set_tx_data(STRING_DESC_TABLE[usize::from(setup.value_lo())]);
            }
            desc_type::INTERFACE if setup.value_lo() == 0 => {
                self.set_tx_data(bytemuck::bytes_of(&CONFIG_DESC.interface));
            }
            desc_type::ENDPOINT => match setup.value_lo() {
                IN_EP1_ADDR => self.set_tx_data(bytemuck::bytes_of(&CONFIG_DESC.endpoint_in)),
                OUT_EP1_ADDR => self.set_tx_data(bytemuck::bytes_of(&CONFIG_DESC.endpoint_out)),
                _ => self.force_stall(cs),
            },
            _ => self.force_stall(cs),
        }
        self.start_tx(cs);
    }

    fn get_configuration(&mut self, cs: CriticalSection<'_>) {
        let setup = self.setup;
        if setup.direction() != Direction::In
            || setup.recipient() != Recipient::Device
            || setup.value != 0
            || setup.index != 0
            || setup.length != 1
        {
            self.force_stall(cs);
            self.start_tx(cs);
            return;
        }
        match self.state {
            DeviceState::Default => self.force_stall(cs),
            DeviceState::Addressed => self.set_tx_data(&BYTE_ZERO),
            DeviceState::Configured => self.set_tx_data(&BYTE_ONE),
        }
        self.start_tx(cs);
    }

    fn set_configuration(&mut self, cs: CriticalSection<'_>) {
        let setup = self.setup;
        // The device must be addressed before it can be configured.
        if setup.direction() != Direction::Out
            || setup.recipient() != Recipient::Device
            || setup.index != 0
            || setup.length != 0
            || setup.value > 1
            || self.state == DeviceState::Default
        {
            self.force_stall(cs);
        } else if setup.value_lo() == 1 {
            debug!("configured");
            self.enter_configured(cs);
        } else if self.state == DeviceState::Configured {
            debug!("unconfigured");
            self.leave_configured();
        }
        self.finish_status(cs);
    }

    fn get_interface(&mut self, cs: CriticalSection<'_>) {
        let setup = self.setup;
        if setup.direction() != Direction::In
            || setup.recipient() != Recipient::Interface
            || self.state != DeviceState::Configured
            || setup.value != 0
            || setup.index != 0
            || setup.length != 1
        {
            self.force_stall(cs);
            self.start_tx(cs);
            return;
        }
        // Single interface, no alternate settings.
        self.set_tx_data(&BYTE_ZERO);
        self.start_tx(cs);
    }

    fn set_interface(&mut self, cs: CriticalSection<'_>) {
        let setup = self.setup;
        if setup.direction() != Direction::Out
            || setup.recipient() != Recipient::Interface
            || setup.value != 0
            || setup.index != 0
            || setup.length != 0
        {
            self.force_stall(cs);
        }
        self.finish_status(cs);
    }

    /// Vendor RST_STATE: abort the bulk protocol; wValue 1 additionally asks
    /// for a device reset once the flash interface has been relocked.
    fn reset_state(&mut self, cs: CriticalSection<'_>) {
        let setup = self.setup;
        if setup.direction() != Direction::Out || setup.length != 0 || setup.value > 1 {
            self.force_stall(cs);
            self.finish_status(cs);
            return;
        }
        debug!("host reset request (wValue={})", setup.value);
        self.raise_async_reset();
        if setup.value == 1 {
            self.device_reset_requested = true;
        }
        self.finish_status(cs);
    }
}
