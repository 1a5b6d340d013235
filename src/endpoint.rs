//! Endpoint state registry.
//!
//! One state cell per hardware endpoint. The control pipe walks
//! Idle/Transmit/Receive/Stall/AddressPending as a transfer progresses; the
//! bulk endpoints only move between Idle and Halt (unconfigured or host-set
//! ENDPOINT_HALT).

/// Lifecycle state of a single endpoint.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EpState {
    /// No transfer in progress.
    Idle,
    /// IN data stage in progress (EP0) or endpoint armed for IN traffic.
    Transmit,
    /// OUT data stage in progress.
    Receive,
    /// Halted; NAKs until re-enabled.
    Halt,
    /// A stall has been requested or sent; cleared on the next Setup.
    Stall,
    /// SET_ADDRESS accepted; the new address is committed after the status
    /// stage completes.
    AddressPending,
}

/// Endpoints tracked by the registry.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EpIndex {
    Control,
    In1,
    Out1,
}

const NUM_ENDPOINTS: usize = 3;

/// Per-endpoint state, indexed by [`EpIndex`].
#[derive(Debug)]
pub struct EpRegistry {
    states: [EpState; NUM_ENDPOINTS],
}

impl EpRegistry {
    /// Power-on state: control pipe idle, bulk endpoints halted until the
    /// host selects a configuration.
    pub const fn new() -> Self {
        Self {
            states: [EpState::Idle, EpState::Halt, EpState::Halt],
        }
    }

    pub fn get(&self, ep: EpIndex) -> EpState {
        self.states[ep as usize]
    }

    pub fn set(&mut self, ep: EpIndex, state: EpState) {
        self.states[ep as usize] = state;
    }

    pub fn is_halted(&self, ep: EpIndex) -> bool {
        self.get(ep) == EpState::Halt
    }

    /// Bus reset: back to the power-on state.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for EpRegistry {
    fn default() -> Self {
        Self::new()
    }
}
