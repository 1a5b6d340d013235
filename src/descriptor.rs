//! Static USB descriptor tables.
//!
//! Single-configuration device: one vendor-specific interface with a 64-byte
//! bulk IN and bulk OUT endpoint pair. Multi-byte descriptor fields are
//! stored as explicit little-endian byte pairs so the tables are wire-exact
//! on any host.

use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;

use crate::{EP0_MAX_PACKET, EP1_MAX_PACKET, IN_EP1_ADDR, OUT_EP1_ADDR};

/// Descriptor type codes (wValue high byte of GET_DESCRIPTOR).
pub mod desc_type {
    pub const DEVICE: u8 = 0x01;
    pub const CONFIGURATION: u8 = 0x02;
    pub const STRING: u8 = 0x03;
    pub const INTERFACE: u8 = 0x04;
    pub const ENDPOINT: u8 = 0x05;
}

/// Highest valid string descriptor index in [`STRING_DESC_TABLE`].
pub const MAX_STRING_INDEX: u8 = 2;

const fn le16(value: u16) -> [u8; 2] {
    value.to_le_bytes()
}

#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct DeviceDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    pub usb_release: [u8; 2],
    pub device_class: u8,
    pub device_sub_class: u8,
    pub device_protocol: u8,
    pub max_packet_size_0: u8,
    pub vendor_id: [u8; 2],
    pub product_id: [u8; 2],
    pub device_release: [u8; 2],
    pub manufacturer_string: u8,
    pub product_string: u8,
    pub serial_string: u8,
    pub num_configurations: u8,
}

#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct ConfigurationDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    pub total_length: [u8; 2],
    pub num_interfaces: u8,
    pub configuration_value: u8,
    pub configuration_string: u8,
    pub attributes: u8,
    pub max_power: u8,
}

#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct InterfaceDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    pub interface_number: u8,
    pub alternate_setting: u8,
    pub num_endpoints: u8,
    pub interface_class: u8,
    pub interface_sub_class: u8,
    pub interface_protocol: u8,
    pub interface_string: u8,
}

#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct EndpointDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    pub endpoint_address: u8,
    pub attributes: u8,
    pub max_packet_size: [u8; 2],
    pub interval: u8,
}

/// The configuration descriptor and everything returned with it, in the
/// order the host reads them back.
#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct ConfigBundle {
    pub configuration: ConfigurationDescriptor,
    pub interface: InterfaceDescriptor,
    pub endpoint_in: EndpointDescriptor,
    pub endpoint_out: EndpointDescriptor,
}

const_assert_eq!(core::mem::size_of::<DeviceDescriptor>(), 18);
const_assert_eq!(core::mem::size_of::<ConfigurationDescriptor>(), 9);
const_assert_eq!(core::mem::size_of::<InterfaceDescriptor>(), 9);
const_assert_eq!(core::mem::size_of::<EndpointDescriptor>(), 7);
const_assert_eq!(core::mem::size_of::<ConfigBundle>(), 32);

const CONFIG_TOTAL_LEN: u16 = core::mem::size_of::<ConfigBundle>() as u16;

const ATTR_BULK: u8 = 0x02;

pub static DEVICE_DESC: DeviceDescriptor = DeviceDescriptor {
    length: 18,
    descriptor_type: desc_type::DEVICE,
    usb_release: le16(0x0110),
    device_class: 0x00,
    device_sub_class: 0x00,
    device_protocol: 0x00,
    max_packet_size_0: EP0_MAX_PACKET as u8,
    vendor_id: le16(0x10c4),
    product_id: le16(0x8846),
    device_release: le16(0x0100),
    manufacturer_string: 1,
    product_string: 2,
    serial_string: 0,
    num_configurations: 1,
};

pub static CONFIG_DESC: ConfigBundle = ConfigBundle {
    configuration: ConfigurationDescriptor {
        length: 9,
        descriptor_type: desc_type::CONFIGURATION,
        total_length: le16(CONFIG_TOTAL_LEN),
        num_interfaces: 1,
        configuration_value: 1,
        configuration_string: 0,
        attributes: 0x80, // bus powered
        max_power: 0x32,  // 100 mA
    },
    interface: InterfaceDescriptor {
        length: 9,
        descriptor_type: desc_type::INTERFACE,
        interface_number: 0,
        alternate_setting: 0,
        num_endpoints: 2,
        interface_class: 0xff, // vendor specific
        interface_sub_class: 0x00,
        interface_protocol: 0x00,
        interface_string: 0,
    },
    endpoint_in: EndpointDescriptor {
        length: 7,
        descriptor_type: desc_type::ENDPOINT,
        endpoint_address: IN_EP1_ADDR,
        attributes: ATTR_BULK,
        max_packet_size: le16(EP1_MAX_PACKET as u16),
        interval: 0,
    },
    endpoint_out: EndpointDescriptor {
        length: 7,
        descriptor_type: desc_type::ENDPOINT,
        endpoint_address: OUT_EP1_ADDR,
        attributes: ATTR_BULK,
        max_packet_size: le16(EP1_MAX_PACKET as u16),
        interval: 0,
    },
};

/// Build a string descriptor from ASCII at compile time.
///
/// `N` must equal `2 + 2 * ascii.len()` (UTF-16LE payload plus the two-byte
/// header).
const fn string_descriptor<const N: usize>(ascii: &[u8]) -> [u8; N] {
    assert!(N == 2 + 2 * ascii.len());
    let mut out = [0u8; N];
    out[0] = N as u8;
    out[1] = desc_type::STRING;
    let mut i = 0;
    while i < ascii.len() {
        out[2 + 2 * i] = ascii[i];
        i += 1;
    }
    out
}

// String 0 is the language ID table (US English).
static STRING0: [u8; 4] = [4, desc_type::STRING, 0x09, 0x04];
static STRING1: [u8; 42] = string_descriptor(b"Silicon Laboratories");
static STRING2: [u8; 90] = string_descriptor(b"C8051F3xx USB Bulk Flash Programming Example");

pub static STRING_DESC_TABLE: [&[u8]; 3] = [&STRING0, &STRING1, &STRING2];
