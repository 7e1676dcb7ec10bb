use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use embassy_time::{Duration, Instant};
use embedded_can::StandardId;

use crate::network::Network;
use crate::objectdictionary::datatypes::check_limits;
use crate::objectdictionary::{DataType, Dictionary, Value};
use crate::sdo::errors::{AbortCode, ConfigError};
use crate::sdo::frames::{self, Request};
use crate::sdo::parameters::{self, PeerParameters, SERVER_PARAMETERS};
use crate::sdo::DEFAULT_TIMEOUT;
use crate::NodeId;

/// SDO server half of a CANopen device: answers remote clients against
/// the local object dictionary.
///
/// Expedited downloads commit on the initiate frame; segmented downloads
/// collect into a staging buffer and touch the dictionary only once the
/// final segment arrived and passed the access and limit checks.
pub struct SdoServer<'a, N: Network> {
    network: &'a N,
    timeout: Duration,
    clients: BTreeMap<u8, ClientLink>,
}

struct ClientLink {
    cob_rx: StandardId,
    cob_tx: StandardId,
    // last addressed object, echoed into abort frames
    index: u16,
    subindex: u8,
    transfer: TransferState,
    deadline: Option<Instant>,
}

enum TransferState {
    Idle,
    /// Segmented download in progress, payload collects in `buffer`.
    Download {
        buffer: Vec<u8>,
        size: Option<u32>,
        toggle: bool,
    },
    /// Segmented upload in progress, `buffer` drains from the front.
    Upload { buffer: Vec<u8>, toggle: bool },
}

impl ClientLink {
    fn new(params: PeerParameters) -> ClientLink {
        ClientLink {
            cob_rx: params.client_to_server,
            cob_tx: params.server_to_client,
            index: 0,
            subindex: 0,
            transfer: TransferState::Idle,
            deadline: None,
        }
    }

    fn reset(&mut self) {
        self.transfer = TransferState::Idle;
        self.deadline = None;
    }

    fn expired(&self, now: Instant) -> bool {
        !matches!(self.transfer, TransferState::Idle)
            && self.deadline.is_some_and(|deadline| now >= deadline)
    }

    fn handle<D: Dictionary>(
        &mut self,
        od: &mut D,
        timeout: Duration,
        frame: &[u8; 8],
    ) -> Result<Option<[u8; 8]>, AbortCode> {
        match frames::parse_request(frame) {
            Request::UploadInitiate { index, subindex } => {
                self.upload_initiate(od, timeout, index, subindex).map(Some)
            }
            Request::UploadSegment { toggle } => self.upload_segment(timeout, toggle),
            Request::DownloadInitiate {
                index,
                subindex,
                expedited,
                size,
                data,
                len,
            } => self
                .download_initiate(od, timeout, index, subindex, expedited, size, &data[..len])
                .map(Some),
            Request::DownloadSegment {
                toggle,
                data,
                len,
                last,
            } => self.download_segment(od, timeout, toggle, &data[..len], last),
            Request::Abort {
                index,
                subindex,
                code,
            } => {
                log::debug!("SDO client aborted {:#06X}sub{}: {}", index, subindex, code);
                self.reset();
                Ok(None)
            }
            Request::Unknown { .. } => Err(AbortCode::CommandSpecifierError),
        }
    }

    fn upload_initiate<D: Dictionary>(
        &mut self,
        od: &D,
        timeout: Duration,
        index: u16,
        subindex: u8,
    ) -> Result<[u8; 8], AbortCode> {
        self.index = index;
        self.subindex = subindex;
        self.reset();
        let entry = od.get(index).ok_or(AbortCode::ObjectDoesNotExist)?;
        let sub = entry.sub(subindex)?;
        if !sub.access.is_readable() {
            return Err(AbortCode::WriteOnlyError);
        }
        if sub.raw.is_empty() && sub.data_type == DataType::Domain {
            return Err(AbortCode::NoDataAvailable);
        }
        let data = sub.raw.clone();
        if (1..=4).contains(&data.len()) {
            Ok(frames::upload_expedited_response(index, subindex, &data))
        } else {
            let size = data.len() as u32;
            self.transfer = TransferState::Upload {
                buffer: data,
                toggle: false,
            };
            self.deadline = Some(Instant::now() + timeout);
            Ok(frames::upload_segmented_response(index, subindex, size))
        }
    }

    fn upload_segment(
        &mut self,
        timeout: Duration,
        toggle: bool,
    ) -> Result<Option<[u8; 8]>, AbortCode> {
        let response;
        let done;
        match &mut self.transfer {
            TransferState::Upload {
                buffer,
                toggle: expected,
            } => {
                if toggle != *expected {
                    return Err(AbortCode::ToggleBitNotAlternated);
                }
                let count = buffer.len().min(7);
                let chunk: Vec<u8> = buffer.drain(..count).collect();
                done = buffer.is_empty();
                response = frames::upload_segment_response(toggle, &chunk, done);
                *expected = !*expected;
            }
            // late frame for a transfer that is no longer active
            _ => {
                log::debug!("dropping stray upload segment request");
                return Ok(None);
            }
        }
        if done {
            self.reset();
        } else {
            self.deadline = Some(Instant::now() + timeout);
        }
        Ok(Some(response))
    }

    fn download_initiate<D: Dictionary>(
        &mut self,
        od: &mut D,
        timeout: Duration,
        index: u16,
        subindex: u8,
        expedited: bool,
        size: Option<u32>,
        data: &[u8],
    ) -> Result<[u8; 8], AbortCode> {
        self.index = index;
        self.subindex = subindex;
        self.reset();
        if expedited {
            commit(od, index, subindex, data)?;
        } else {
            // write access is checked up front, the data only commits with
            // the final segment
            let entry = od.get(index).ok_or(AbortCode::ObjectDoesNotExist)?;
            let sub = entry.sub(subindex)?;
            if !sub.access.is_writable() {
                return Err(AbortCode::ReadOnlyError);
            }
            self.transfer = TransferState::Download {
                buffer: Vec::new(),
                size,
                toggle: false,
            };
            self.deadline = Some(Instant::now() + timeout);
        }
        Ok(frames::download_response(index, subindex))
    }

    fn download_segment<D: Dictionary>(
        &mut self,
        od: &mut D,
        timeout: Duration,
        toggle: bool,
        data: &[u8],
        last: bool,
    ) -> Result<Option<[u8; 8]>, AbortCode> {
        let payload;
        match &mut self.transfer {
            TransferState::Download {
                buffer,
                size,
                toggle: expected,
            } => {
                if toggle != *expected {
                    return Err(AbortCode::ToggleBitNotAlternated);
                }
                buffer.extend_from_slice(data);
                if last {
                    if size.is_some_and(|size| size as usize != buffer.len()) {
                        return Err(AbortCode::WrongLength);
                    }
                    payload = Some(core::mem::take(buffer));
                } else {
                    *expected = !*expected;
                    payload = None;
                }
            }
            // late frame for a transfer that is no longer active
            _ => {
                log::debug!("dropping stray download segment");
                return Ok(None);
            }
        }
        if let Some(payload) = payload {
            commit(od, self.index, self.subindex, &payload)?;
            self.reset();
        } else {
            self.deadline = Some(Instant::now() + timeout);
        }
        Ok(Some(frames::download_segment_response(toggle)))
    }
}

/// Validate and store a completed download into the dictionary.
fn commit<D: Dictionary>(
    od: &mut D,
    index: u16,
    subindex: u8,
    data: &[u8],
) -> Result<(), AbortCode> {
    let entry = od.get_mut(index).ok_or(AbortCode::ObjectDoesNotExist)?;
    let sub = entry.sub_mut(subindex)?;
    if !sub.access.is_writable() {
        return Err(AbortCode::ReadOnlyError);
    }
    if let Some(fixed) = sub.data_type.size() {
        if data.len() > fixed {
            return Err(AbortCode::TooLong);
        }
        if data.len() < fixed {
            return Err(AbortCode::TooShort);
        }
    }
    if sub.low_limit.is_some() || sub.high_limit.is_some() {
        let value = Value::from_raw(data, sub.data_type)?;
        check_limits(&value, sub.low_limit.as_ref(), sub.high_limit.as_ref())?;
    }
    sub.raw = data.to_vec();
    Ok(())
}

impl<'a, N: Network> SdoServer<'a, N> {
    pub fn new(network: &'a N) -> SdoServer<'a, N> {
        SdoServer {
            network,
            timeout: DEFAULT_TIMEOUT,
            clients: BTreeMap::new(),
        }
    }

    /// Deadline for stalled segmented transfers.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Register a client connection on the pre-defined COB-ID bases
    /// 0x580/0x600 and persist it as a dictionary parameter entry.
    pub fn add_client<D: Dictionary>(
        &mut self,
        od: &mut D,
        client_id: u8,
    ) -> Result<(), ConfigError> {
        self.add_client_with_cob_ids(od, client_id, 0x580, 0x600)
    }

    /// Like [`add_client`](Self::add_client) with explicit COB-IDs:
    /// `cob_tx` for responses (server to client), `cob_rx` for requests.
    pub fn add_client_with_cob_ids<D: Dictionary>(
        &mut self,
        od: &mut D,
        client_id: u8,
        cob_tx: u32,
        cob_rx: u32,
    ) -> Result<(), ConfigError> {
        let node_id = NodeId::new(client_id).ok_or(ConfigError::NodeIdOutOfRange(client_id))?;
        if self.clients.contains_key(&client_id) {
            return Err(ConfigError::DuplicateNodeId(client_id));
        }
        let index = parameters::free_index(od, SERVER_PARAMETERS).ok_or(ConfigError::DictionaryFull)?;
        let client_to_server = parameters::resolve_cob_id(index, cob_rx, node_id)?;
        let server_to_client = parameters::resolve_cob_id(index, cob_tx, node_id)?;
        od.insert(parameters::parameter_entry(index, node_id, cob_rx, cob_tx));
        if let (Some(client_to_server), Some(server_to_client)) =
            (client_to_server, server_to_client)
        {
            self.clients.insert(
                client_id,
                ClientLink::new(PeerParameters {
                    node_id,
                    client_to_server,
                    server_to_client,
                }),
            );
        }
        Ok(())
    }

    /// Drop the connection to `client_id` and its parameter entry.
    pub fn remove_client<D: Dictionary>(
        &mut self,
        od: &mut D,
        client_id: u8,
    ) -> Result<(), ConfigError> {
        let node_id = NodeId::new(client_id).ok_or(ConfigError::NodeIdOutOfRange(client_id))?;
        let index = parameters::find_peer_entry(od, SERVER_PARAMETERS, node_id)
            .ok_or(ConfigError::UnknownNodeId(client_id))?;
        od.remove(index);
        self.clients.remove(&client_id);
        Ok(())
    }

    /// Rebuild the client table from dictionary entries 0x1200..=0x127F.
    ///
    /// Parameter entries carry no change notification; call this again
    /// after editing them directly. On error the previous table is kept.
    pub fn init<D: Dictionary>(&mut self, od: &D) -> Result<(), ConfigError> {
        let peers = parameters::scan(od, SERVER_PARAMETERS)?;
        self.clients.clear();
        for params in peers {
            let id = params.node_id.raw();
            if self.clients.insert(id, ClientLink::new(params)).is_some() {
                log::warn!("duplicate SDO server parameters for node {}", id);
            }
        }
        log::debug!("SDO server: {} client connection(s)", self.clients.len());
        Ok(())
    }

    /// Feed one inbound CAN frame. Frames not addressed to a known client
    /// connection are ignored.
    pub fn on_message<D: Dictionary>(&mut self, od: &mut D, cob_id: StandardId, data: &[u8]) {
        let Ok(frame) = <&[u8; 8]>::try_from(data) else {
            return;
        };
        let timeout = self.timeout;
        let Some(link) = self.clients.values_mut().find(|link| link.cob_rx == cob_id) else {
            return;
        };
        if link.expired(Instant::now()) {
            log::warn!(
                "SDO transfer for {:#06X}sub{} timed out",
                link.index,
                link.subindex
            );
            let abort =
                frames::abort_frame(link.index, link.subindex, AbortCode::ProtocolTimedOut);
            link.reset();
            self.network.send(link.cob_tx, &abort).ok();
        }
        let response = match link.handle(od, timeout, frame) {
            Ok(Some(response)) => response,
            Ok(None) => return,
            Err(code) => {
                log::warn!(
                    "SDO request for {:#06X}sub{} aborted: {}",
                    link.index,
                    link.subindex,
                    code
                );
                link.reset();
                frames::abort_frame(link.index, link.subindex, code)
            }
        };
        self.network.send(link.cob_tx, &response).ok();
    }

    /// Abort transfers whose deadline has passed. Call periodically;
    /// stalled transfers are otherwise only cleaned up when their client
    /// speaks again.
    pub fn poll_timeouts(&mut self) {
        let now = Instant::now();
        for link in self.clients.values_mut() {
            if link.expired(now) {
                log::warn!(
                    "SDO transfer for {:#06X}sub{} timed out",
                    link.index,
                    link.subindex
                );
                let abort =
                    frames::abort_frame(link.index, link.subindex, AbortCode::ProtocolTimedOut);
                link.reset();
                self.network.send(link.cob_tx, &abort).ok();
            }
        }
    }
}
