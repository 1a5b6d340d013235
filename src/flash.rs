//! Flash storage interface used by the bulk programming protocol.
//!
//! The protocol never touches flash directly; it goes through [`FlashStore`]
//! so the state machine can be exercised against an in-memory model on a
//! host. Implementations gate erase and write on the two-byte interlock key:
//! until the exact key has been presented, destructive operations must be
//! silent no-ops.

/// Two-byte flash interlock key presented by the host with SET_FLASH_KEY.
pub const FLASH_KEY: [u8; 2] = [0xa5, 0xf1];

/// Backing flash array.
///
/// `addr` is an absolute byte address within the layout the programmer was
/// constructed with. Erase and write take effect only while the correct key
/// is loaded; [`FlashStore::lock`] discards it again.
pub trait FlashStore {
    fn set_key(&mut self, key: [u8; 2]);
    /// Discard any loaded key.
    fn lock(&mut self);
    fn is_unlocked(&self) -> bool;
    fn erase_page(&mut self, addr: u32);
    fn write(&mut self, addr: u32, data: &[u8]);
    fn read(&mut self, addr: u32, buf: &mut [u8]);
}

/// The page size cannot back the block protocol (zero, or not a whole
/// number of transfer blocks).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BadFlashLayout;

/// Geometry of the programmable flash region.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlashLayout {
    /// First programmable byte address.
    pub start: u32,
    /// Erase-page size in bytes.
    pub page_size: u16,
    /// Number of programmable pages.
    pub num_pages: u8,
}

impl FlashLayout {
    /// Validate that pages divide evenly into transfer blocks.
    pub const fn new(start: u32, page_size: u16, num_pages: u8) -> Result<Self, BadFlashLayout> {
        if page_size == 0 || page_size % crate::EP1_MAX_PACKET as u16 != 0 {
            return Err(BadFlashLayout);
        }
        Ok(Self {
            start,
            page_size,
            num_pages,
        })
    }
    /// Byte address of page `index` (unchecked; callers validate the index
    /// against `num_pages` first).
    pub fn page_addr(&self, index: u8) -> u32 {
        self.start + u32::from(index) * u32::from(self.page_size)
    }

    pub fn contains_page(&self, index: u8) -> bool {
        index < self.num_pages
    }

    /// Number of 64-byte transfer blocks per page.
    pub fn blocks_per_page(&self) -> u8 {
        (self.page_size / crate::EP1_MAX_PACKET as u16) as u8
    }
}

/// C8051F340 application area: 512-byte pages starting past the reserved
/// boot region.
pub const F340_LAYOUT: FlashLayout = FlashLayout {
    start: 0x1000,
    page_size: 512,
    num_pages: 96,
};
