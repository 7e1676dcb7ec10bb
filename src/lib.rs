//! CANopen SDO transfer engine: the client and server halves of the
//! Service Data Object protocol (CiA 301), with expedited and segmented
//! transfers over classic 11-bit CAN frames.

#![no_std]
#[macro_use]
extern crate alloc;

pub mod network;
pub mod objectdictionary;
pub mod sdo;

pub use network::Network;
pub use objectdictionary::{
    AccessType, DataType, Dictionary, Entry, ObjectDictionary, SubEntry, Value,
};
pub use sdo::client::{ParseError, SdoClient, SdoValue};
pub use sdo::errors::{AbortCode, ConfigError, SdoError};
pub use sdo::server::SdoServer;

#[cfg(test)]
extern crate std;

use embedded_can::StandardId;

/// CANopen node id, 1..=127.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NodeId(u8);

impl NodeId {
    pub const fn new(raw: u8) -> Option<NodeId> {
        if raw >= 1 && raw <= 127 {
            Some(NodeId(raw))
        } else {
            None
        }
    }

    pub const fn raw(self) -> u8 {
        self.0
    }

    /// Pre-defined COB-ID of SDO requests towards this node (client to server).
    pub const fn sdo_rx_cobid(self) -> StandardId {
        // SAFETY: 0x600 + 127 fits in 11 bits
        unsafe { StandardId::new_unchecked(0x600 + self.0 as u16) }
    }

    /// Pre-defined COB-ID of SDO responses from this node (server to client).
    pub const fn sdo_tx_cobid(self) -> StandardId {
        // SAFETY: 0x580 + 127 fits in 11 bits
        unsafe { StandardId::new_unchecked(0x580 + self.0 as u16) }
    }
}
