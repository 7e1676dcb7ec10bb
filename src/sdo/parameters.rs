//! SDO communication parameter objects.
//!
//! Both state machines read their peer tables out of the object dictionary:
//! server parameters live at 0x1200..=0x127F, client parameters at
//! 0x1280..=0x12FF. Each entry is a record with sub 1 = COB-ID client to
//! server, sub 2 = COB-ID server to client, sub 3 = peer node id.

use alloc::vec::Vec;
use core::ops::RangeInclusive;

use embedded_can::StandardId;

use crate::objectdictionary::{AccessType, DataType, Dictionary, Entry, SubEntry};
use crate::sdo::errors::ConfigError;
use crate::NodeId;

pub const SERVER_PARAMETERS: RangeInclusive<u16> = 0x1200..=0x127F;
pub const CLIENT_PARAMETERS: RangeInclusive<u16> = 0x1280..=0x12FF;

const COB_ID_INVALID: u32 = 1 << 31;
const COB_ID_DYNAMIC: u32 = 1 << 30;
const COB_ID_FRAME_EXTENDED: u32 = 1 << 29;

const SUB_CLIENT_TO_SERVER: u8 = 1;
const SUB_SERVER_TO_CLIENT: u8 = 2;
const SUB_NODE_ID: u8 = 3;

/// One active SDO connection read out of the dictionary.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct PeerParameters {
    pub node_id: NodeId,
    /// COB-ID of request frames (client to server).
    pub client_to_server: StandardId,
    /// COB-ID of response frames (server to client).
    pub server_to_client: StandardId,
}

/// Resolve one stored COB-ID field.
///
/// `Ok(None)` means the connection is flagged invalid and shall be ignored.
/// Dynamic allocation and 29-bit identifiers are not supported and fail
/// hard.
pub(crate) fn resolve_cob_id(
    index: u16,
    raw: u32,
    node_id: NodeId,
) -> Result<Option<StandardId>, ConfigError> {
    if raw & COB_ID_INVALID != 0 {
        return Ok(None);
    }
    if raw & (COB_ID_DYNAMIC | COB_ID_FRAME_EXTENDED) != 0 {
        return Err(ConfigError::UnsupportedCobId { index, cob_id: raw });
    }
    let mut bits = raw as u16 & StandardId::MAX.as_raw();
    // CiA pre-defined connection set: a base id with a zero low nibble is
    // completed with the peer's node id
    if bits & 0xF == 0 {
        bits |= node_id.raw() as u16;
    }
    // SAFETY: masked to 11 bits above
    Ok(Some(unsafe { StandardId::new_unchecked(bits) }))
}

/// Walk `range` and collect the active SDO connections.
pub(crate) fn scan<D: Dictionary>(
    od: &D,
    range: RangeInclusive<u16>,
) -> Result<Vec<PeerParameters>, ConfigError> {
    let mut peers = Vec::new();
    for index in od.indices_in(range) {
        let Some(entry) = od.get(index) else { continue };
        if entry.sub_number() < 3 {
            log::warn!("SDO parameter {:#06X} is incomplete, skipping", index);
            continue;
        }
        let Some(raw_id) = read_u8(entry, SUB_NODE_ID) else {
            log::warn!("SDO parameter {:#06X} has no node id, skipping", index);
            continue;
        };
        let node_id = NodeId::new(raw_id).ok_or(ConfigError::NodeIdOutOfRange(raw_id))?;
        let (Some(c2s_raw), Some(s2c_raw)) = (
            read_u32(entry, SUB_CLIENT_TO_SERVER),
            read_u32(entry, SUB_SERVER_TO_CLIENT),
        ) else {
            log::warn!("SDO parameter {:#06X} has no COB-IDs, skipping", index);
            continue;
        };
        let (Some(client_to_server), Some(server_to_client)) = (
            resolve_cob_id(index, c2s_raw, node_id)?,
            resolve_cob_id(index, s2c_raw, node_id)?,
        ) else {
            log::debug!("SDO parameter {:#06X} is flagged invalid, skipping", index);
            continue;
        };
        peers.push(PeerParameters {
            node_id,
            client_to_server,
            server_to_client,
        });
    }
    Ok(peers)
}

/// Build a fresh SDO parameter record.
pub(crate) fn parameter_entry(
    index: u16,
    node_id: NodeId,
    client_to_server: u32,
    server_to_client: u32,
) -> Entry {
    Entry::record(
        index,
        vec![
            SubEntry::new(DataType::Unsigned32, AccessType::ReadWrite)
                .with_raw(client_to_server.to_le_bytes().to_vec()),
            SubEntry::new(DataType::Unsigned32, AccessType::ReadWrite)
                .with_raw(server_to_client.to_le_bytes().to_vec()),
            SubEntry::new(DataType::Unsigned8, AccessType::ReadWrite)
                .with_raw(vec![node_id.raw()]),
        ],
    )
}

/// First unused index in `range`, if any.
pub(crate) fn free_index<D: Dictionary>(od: &D, range: RangeInclusive<u16>) -> Option<u16> {
    range.into_iter().find(|&index| od.get(index).is_none())
}

/// Index of the parameter entry describing `node_id`, if present.
pub(crate) fn find_peer_entry<D: Dictionary>(
    od: &D,
    range: RangeInclusive<u16>,
    node_id: NodeId,
) -> Option<u16> {
    od.indices_in(range).into_iter().find(|&index| {
        od.get(index)
            .filter(|entry| entry.sub_number() >= 3)
            .and_then(|entry| read_u8(entry, SUB_NODE_ID))
            == Some(node_id.raw())
    })
}

fn read_u32(entry: &Entry, subindex: u8) -> Option<u32> {
    let sub = entry.sub(subindex).ok()?;
    let bytes: [u8; 4] = sub.raw.as_slice().try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}

fn read_u8(entry: &Entry, subindex: u8) -> Option<u8> {
    match entry.sub(subindex).ok()?.raw.as_slice() {
        &[value] => Some(value),
        _ => None,
    }
}
