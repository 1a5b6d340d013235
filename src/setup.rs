//! Setup packet parsing and request classification.

/// Wire size of a Setup packet.
pub const SETUP_LEN: usize = 8;

/// Standard request codes (USB 2.0 chapter 9).
pub mod request {
    pub const GET_STATUS: u8 = 0x00;
    pub const CLEAR_FEATURE: u8 = 0x01;
    pub const SET_FEATURE: u8 = 0x03;
    pub const SET_ADDRESS: u8 = 0x05;
    pub const GET_DESCRIPTOR: u8 = 0x06;
    pub const GET_CONFIGURATION: u8 = 0x08;
    pub const SET_CONFIGURATION: u8 = 0x09;
    pub const GET_INTERFACE: u8 = 0x0a;
    pub const SET_INTERFACE: u8 = 0x0b;
}

/// Vendor request codes understood by this device.
pub mod vendor_request {
    /// Reset the bulk protocol state machine. `wValue` 1 additionally
    /// requests a device reset if the flash interface was left unlocked.
    pub const RST_STATE: u8 = 0x01;
}

/// Feature selector for SET_FEATURE/CLEAR_FEATURE on an endpoint.
pub const FEATURE_ENDPOINT_HALT: u16 = 0x0000;

const DIRECTION_MASK: u8 = 0x80;
const TYPE_MASK: u8 = 0x60;
const RECIPIENT_MASK: u8 = 0x1f;

/// Transfer direction encoded in `bmRequestType` bit 7.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// Host to device.
    Out,
    /// Device to host.
    In,
}

/// Request type encoded in `bmRequestType` bits 6..5.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RequestKind {
    Standard,
    Class,
    Vendor,
    Reserved,
}

/// Request recipient encoded in `bmRequestType` bits 4..0.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Recipient {
    Device,
    Interface,
    Endpoint,
    Other,
}

/// A parsed 8-byte Setup packet.
///
/// Multi-byte fields are little-endian on the wire and are converted to host
/// order unconditionally at parse time; the packet is immutable afterwards
/// and overwritten wholesale by the next Setup transaction.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SetupPacket {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupPacket {
    pub const fn zeroed() -> Self {
        Self {
            request_type: 0,
            request: 0,
            value: 0,
            index: 0,
            length: 0,
        }
    }

    pub fn parse(raw: &[u8; SETUP_LEN]) -> Self {
        Self {
            request_type: raw[0],
            request: raw[1],
            value: u16::from_le_bytes([raw[2], raw[3]]),
            index: u16::from_le_bytes([raw[4], raw[5]]),
            length: u16::from_le_bytes([raw[6], raw[7]]),
        }
    }

    pub fn direction(&self) -> Direction {
        if self.request_type & DIRECTION_MASK != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }

    pub fn kind(&self) -> RequestKind {
        match self.request_type & TYPE_MASK {
            0x00 => RequestKind::Standard,
            0x20 => RequestKind::Class,
            0x40 => RequestKind::Vendor,
            _ => RequestKind::Reserved,
        }
    }

    pub fn recipient(&self) -> Recipient {
        match self.request_type & RECIPIENT_MASK {
            0x00 => Recipient::Device,
            0x01 => Recipient::Interface,
            0x02 => Recipient::Endpoint,
            _ => Recipient::Other,
        }
    }

    /// Low byte of `wValue` (descriptor index, address, configuration value).
    pub fn value_lo(&self) -> u8 {
        self.value as u8
    }

    /// High byte of `wValue` (descriptor type).
    pub fn value_hi(&self) -> u8 {
        (self.value >> 8) as u8
    }

    /// Low byte of `wIndex` (endpoint address in endpoint-directed requests).
    pub fn index_lo(&self) -> u8 {
        self.index as u8
    }

    pub fn index_hi(&self) -> u8 {
        (self.index >> 8) as u8
    }
}

/// The chapter-9 requests this device implements.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StandardRequest {
    GetStatus,
    ClearFeature,
    SetFeature,
    SetAddress,
    GetDescriptor,
    GetConfiguration,
    SetConfiguration,
    GetInterface,
    SetInterface,
}

impl StandardRequest {
    /// Decode `bRequest`; unrecognized codes fall back to a stall at the
    /// dispatch site.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            request::GET_STATUS => Some(Self::GetStatus),
            request::CLEAR_FEATURE => Some(Self::ClearFeature),
            request::SET_FEATURE => Some(Self::SetFeature),
            request::SET_ADDRESS => Some(Self::SetAddress),
            request::GET_DESCRIPTOR => Some(Self::GetDescriptor),
            request::GET_CONFIGURATION => Some(Self::GetConfiguration),
            request::SET_CONFIGURATION => Some(Self::SetConfiguration),
            request::GET_INTERFACE => Some(Self::GetInterface),
            request::SET_INTERFACE => Some(Self::SetInterface),
            _ => None,
        }
    }
}

/// Vendor-specific requests this device implements.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VendorRequest {
    ResetState,
}

impl VendorRequest {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            vendor_request::RST_STATE => Some(Self::ResetState),
            _ => None,
        }
    }
}
