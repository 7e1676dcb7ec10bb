use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::cell::Cell;

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::{with_timeout, Duration};
use embedded_can::StandardId;

use crate::network::Network;
use crate::objectdictionary::Dictionary;
use crate::sdo::errors::{AbortCode, ConfigError, SdoError};
use crate::sdo::frames::{self, Response};
use crate::sdo::parameters::{self, PeerParameters, CLIENT_PARAMETERS};
use crate::sdo::DEFAULT_TIMEOUT;
use crate::NodeId;

/// SDO client half of a CANopen device.
///
/// One client talks to up to 128 servers. Transfers to the same server are
/// queued and run one at a time in submission order; transfers to
/// different servers interleave freely. All futures must be driven on a
/// single executor, the internals are built on `NoopRawMutex`.
pub struct SdoClient<'a, N: Network> {
    network: &'a N,
    timeout: Duration,
    servers: BTreeMap<u8, ServerLink>,
}

struct ServerLink {
    cob_tx: StandardId,
    cob_rx: StandardId,
    /// Serializes transfers towards this server.
    queue: Mutex<NoopRawMutex, ()>,
    active: Cell<bool>,
    response: Signal<NoopRawMutex, Response>,
}

impl ServerLink {
    fn new(params: PeerParameters) -> ServerLink {
        ServerLink {
            cob_tx: params.client_to_server,
            cob_rx: params.server_to_client,
            queue: Mutex::new(()),
            active: Cell::new(false),
            response: Signal::new(),
        }
    }
}

/// Marks the link busy for the duration of one transfer, so stray frames
/// outside a transfer are dropped instead of poisoning the next one.
struct ActiveTransfer<'a>(&'a Cell<bool>);

impl<'a> ActiveTransfer<'a> {
    fn begin(link: &'a ServerLink) -> ActiveTransfer<'a> {
        link.response.reset();
        link.active.set(true);
        ActiveTransfer(&link.active)
    }
}

impl Drop for ActiveTransfer<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// State of one in-flight transfer, owned by the future driving it.
struct Transfer<'a, N: Network> {
    network: &'a N,
    link: &'a ServerLink,
    index: u16,
    subindex: u8,
    timeout: Duration,
    toggle: bool,
    buffer: Vec<u8>,
}

impl<'a, N: Network> Transfer<'a, N> {
    /// Send `request` and wait for the next response frame. The deadline
    /// restarts with every exchange; a peer abort comes back as an error
    /// and a timeout aborts the transfer on both ends.
    async fn exchange(&self, request: [u8; 8]) -> Result<Response, SdoError<N::Error>> {
        self.link.response.reset();
        self.network
            .send(self.link.cob_tx, &request)
            .map_err(SdoError::Tx)?;
        match with_timeout(self.timeout, self.link.response.wait()).await {
            Ok(Response::Abort {
                code,
                index,
                subindex,
            }) => {
                log::debug!("SDO abort from server: {}", code);
                Err(SdoError::Abort {
                    code,
                    index,
                    subindex,
                })
            }
            Ok(response) => Ok(response),
            Err(_) => Err(self.abort(AbortCode::ProtocolTimedOut)),
        }
    }

    /// Abort the transfer: notify the server and produce the local error.
    fn abort(&self, code: AbortCode) -> SdoError<N::Error> {
        let frame = frames::abort_frame(self.index, self.subindex, code);
        self.network.send(self.link.cob_tx, &frame).ok();
        SdoError::Abort {
            code,
            index: self.index,
            subindex: self.subindex,
        }
    }

    fn check_echo(&self, index: u16, subindex: u8) -> Result<(), SdoError<N::Error>> {
        if index != self.index || subindex != self.subindex {
            return Err(self.abort(AbortCode::GeneralError));
        }
        Ok(())
    }

    async fn upload_segments(&mut self, size: Option<u32>) -> Result<Vec<u8>, SdoError<N::Error>> {
        loop {
            match self
                .exchange(frames::upload_segment_request(self.toggle))
                .await?
            {
                Response::UploadSegment {
                    toggle,
                    data,
                    len,
                    last,
                } => {
                    if toggle != self.toggle {
                        return Err(self.abort(AbortCode::ToggleBitNotAlternated));
                    }
                    self.buffer.extend_from_slice(&data[..len]);
                    if last {
                        if size.is_some_and(|size| size as usize != self.buffer.len()) {
                            return Err(self.abort(AbortCode::WrongLength));
                        }
                        return Ok(core::mem::take(&mut self.buffer));
                    }
                    self.toggle = !self.toggle;
                }
                _ => return Err(self.abort(AbortCode::CommandSpecifierError)),
            }
        }
    }

    async fn download_segments(&mut self, data: &[u8]) -> Result<(), SdoError<N::Error>> {
        let mut offset = 0;
        loop {
            let end = usize::min(offset + 7, data.len());
            let last = end == data.len();
            let request = frames::download_segment_request(self.toggle, &data[offset..end], last);
            match self.exchange(request).await? {
                Response::DownloadSegmentAck { toggle } if toggle == self.toggle => {}
                Response::DownloadSegmentAck { .. } => {
                    return Err(self.abort(AbortCode::ToggleBitNotAlternated))
                }
                // some servers ack the segment like an initiate
                Response::DownloadAck { .. } => {}
                _ => return Err(self.abort(AbortCode::CommandSpecifierError)),
            }
            if last {
                return Ok(());
            }
            offset = end;
            self.toggle = !self.toggle;
        }
    }
}

impl<'a, N: Network> SdoClient<'a, N> {
    pub fn new(network: &'a N) -> SdoClient<'a, N> {
        SdoClient {
            network,
            timeout: DEFAULT_TIMEOUT,
            servers: BTreeMap::new(),
        }
    }

    /// Default per-transfer timeout, restarted on every response frame.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Register a server connection on the pre-defined COB-ID bases
    /// 0x600/0x580 and persist it as a dictionary parameter entry.
    pub fn add_server<D: Dictionary>(
        &mut self,
        od: &mut D,
        server_id: u8,
    ) -> Result<(), ConfigError> {
        self.add_server_with_cob_ids(od, server_id, 0x600, 0x580)
    }

    /// Like [`add_server`](Self::add_server) with explicit COB-IDs:
    /// `cob_tx` for requests (client to server), `cob_rx` for responses.
    /// Both carry the CiA flag bits; a low nibble of zero is completed
    /// with the server id.
    pub fn add_server_with_cob_ids<D: Dictionary>(
        &mut self,
        od: &mut D,
        server_id: u8,
        cob_tx: u32,
        cob_rx: u32,
    ) -> Result<(), ConfigError> {
        let node_id = NodeId::new(server_id).ok_or(ConfigError::NodeIdOutOfRange(server_id))?;
        if self.servers.contains_key(&server_id) {
            return Err(ConfigError::DuplicateNodeId(server_id));
        }
        let index = parameters::free_index(od, CLIENT_PARAMETERS).ok_or(ConfigError::DictionaryFull)?;
        let client_to_server = parameters::resolve_cob_id(index, cob_tx, node_id)?;
        let server_to_client = parameters::resolve_cob_id(index, cob_rx, node_id)?;
        od.insert(parameters::parameter_entry(index, node_id, cob_tx, cob_rx));
        if let (Some(client_to_server), Some(server_to_client)) =
            (client_to_server, server_to_client)
        {
            self.servers.insert(
                server_id,
                ServerLink::new(PeerParameters {
                    node_id,
                    client_to_server,
                    server_to_client,
                }),
            );
        }
        Ok(())
    }

    /// Drop the connection to `server_id` and its parameter entry.
    pub fn remove_server<D: Dictionary>(
        &mut self,
        od: &mut D,
        server_id: u8,
    ) -> Result<(), ConfigError> {
        let node_id = NodeId::new(server_id).ok_or(ConfigError::NodeIdOutOfRange(server_id))?;
        let index = parameters::find_peer_entry(od, CLIENT_PARAMETERS, node_id)
            .ok_or(ConfigError::UnknownNodeId(server_id))?;
        od.remove(index);
        self.servers.remove(&server_id);
        Ok(())
    }

    /// Rebuild the server table from dictionary entries 0x1280..=0x12FF.
    ///
    /// Parameter entries carry no change notification; call this again
    /// after editing them directly. On error the previous table is kept.
    pub fn init<D: Dictionary>(&mut self, od: &D) -> Result<(), ConfigError> {
        let peers = parameters::scan(od, CLIENT_PARAMETERS)?;
        self.servers.clear();
        for params in peers {
            let id = params.node_id.raw();
            if self.servers.insert(id, ServerLink::new(params)).is_some() {
                log::warn!("duplicate SDO client parameters for node {}", id);
            }
        }
        log::debug!("SDO client: {} server connection(s)", self.servers.len());
        Ok(())
    }

    /// Feed one inbound CAN frame. Frames that do not belong to an active
    /// transfer of this client are ignored.
    pub fn on_message(&self, cob_id: StandardId, data: &[u8]) {
        let Some(link) = self.servers.values().find(|link| link.cob_rx == cob_id) else {
            return;
        };
        if !link.active.get() {
            return;
        }
        let Ok(frame) = <&[u8; 8]>::try_from(data) else {
            return;
        };
        link.response.signal(frames::parse_response(frame));
    }

    /// Read the value of `index`/`subindex` from a remote dictionary.
    pub async fn upload(
        &self,
        server_id: u8,
        index: u16,
        subindex: u8,
    ) -> Result<Vec<u8>, SdoError<N::Error>> {
        self.upload_with_timeout(server_id, index, subindex, self.timeout)
            .await
    }

    pub async fn upload_with_timeout(
        &self,
        server_id: u8,
        index: u16,
        subindex: u8,
        timeout: Duration,
    ) -> Result<Vec<u8>, SdoError<N::Error>> {
        let link = self.link(server_id, index, subindex)?;
        let _queued = link.queue.lock().await;
        let _active = ActiveTransfer::begin(link);
        log::trace!("SDO upload {:#06X}sub{} from node {}", index, subindex, server_id);
        let mut transfer = Transfer {
            network: self.network,
            link,
            index,
            subindex,
            timeout,
            toggle: false,
            buffer: Vec::new(),
        };
        match transfer
            .exchange(frames::upload_request(index, subindex))
            .await?
        {
            Response::UploadExpedited {
                index: ri,
                subindex: rs,
                data,
                len,
            } => {
                transfer.check_echo(ri, rs)?;
                Ok(data[..len].to_vec())
            }
            Response::UploadSegmentedInit {
                index: ri,
                subindex: rs,
                size,
            } => {
                transfer.check_echo(ri, rs)?;
                transfer.upload_segments(size).await
            }
            _ => Err(transfer.abort(AbortCode::CommandSpecifierError)),
        }
    }

    /// Read and decode as `T`.
    pub async fn upload_as<T: SdoValue>(
        &self,
        server_id: u8,
        index: u16,
        subindex: u8,
    ) -> Result<T, SdoError<N::Error>> {
        let raw = self.upload(server_id, index, subindex).await?;
        T::from_bytes(&raw).map_err(|_| SdoError::Abort {
            code: AbortCode::WrongLength,
            index,
            subindex,
        })
    }

    /// Write `data` to `index`/`subindex` of a remote dictionary.
    /// Payloads of one to four bytes go out expedited, anything else is
    /// segmented.
    pub async fn download(
        &self,
        server_id: u8,
        index: u16,
        subindex: u8,
        data: &[u8],
    ) -> Result<(), SdoError<N::Error>> {
        self.download_with_timeout(server_id, index, subindex, data, self.timeout)
            .await
    }

    pub async fn download_with_timeout(
        &self,
        server_id: u8,
        index: u16,
        subindex: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<(), SdoError<N::Error>> {
        let link = self.link(server_id, index, subindex)?;
        let _queued = link.queue.lock().await;
        let _active = ActiveTransfer::begin(link);
        log::trace!(
            "SDO download of {} byte(s) to {:#06X}sub{} on node {}",
            data.len(),
            index,
            subindex,
            server_id
        );
        let mut transfer = Transfer {
            network: self.network,
            link,
            index,
            subindex,
            timeout,
            toggle: false,
            buffer: Vec::new(),
        };
        if (1..=4).contains(&data.len()) {
            match transfer
                .exchange(frames::download_request(index, subindex, data))
                .await?
            {
                Response::DownloadAck {
                    index: ri,
                    subindex: rs,
                } => transfer.check_echo(ri, rs),
                _ => Err(transfer.abort(AbortCode::CommandSpecifierError)),
            }
        } else {
            match transfer
                .exchange(frames::download_init_request(index, subindex, data.len() as u32))
                .await?
            {
                Response::DownloadAck {
                    index: ri,
                    subindex: rs,
                } => transfer.check_echo(ri, rs)?,
                _ => return Err(transfer.abort(AbortCode::CommandSpecifierError)),
            }
            transfer.download_segments(data).await
        }
    }

    /// Encode `value` and write it.
    pub async fn download_as<T: SdoValue>(
        &self,
        server_id: u8,
        index: u16,
        subindex: u8,
        value: T,
    ) -> Result<(), SdoError<N::Error>> {
        self.download(server_id, index, subindex, value.to_bytes().as_ref())
            .await
    }

    fn link(
        &self,
        server_id: u8,
        index: u16,
        subindex: u8,
    ) -> Result<&ServerLink, SdoError<N::Error>> {
        self.servers.get(&server_id).ok_or(SdoError::Abort {
            code: AbortCode::ResourceNotAvailable,
            index,
            subindex,
        })
    }
}

/// Conversion trait for values supported by the typed SDO calls.
pub trait SdoValue: Sized {
    /// `Self` as bytes
    type Bytes: AsRef<[u8]>;
    /// Convert from little endian bytes
    fn from_bytes(bytes: &[u8]) -> Result<Self, ParseError>;
    /// Convert to little endian bytes
    fn to_bytes(self) -> Self::Bytes;
}

pub struct ParseError;

impl From<core::array::TryFromSliceError> for ParseError {
    fn from(_: core::array::TryFromSliceError) -> ParseError {
        ParseError
    }
}

macro_rules! sdo_value {
    ($typ:ty) => {
        impl SdoValue for $typ {
            type Bytes = [u8; core::mem::size_of::<Self>()];
            fn from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
                let bytes: Self::Bytes = bytes.try_into()?;
                Ok(Self::from_le_bytes(bytes))
            }

            fn to_bytes(self) -> Self::Bytes {
                self.to_le_bytes()
            }
        }
    };
}

sdo_value!(u8);
sdo_value!(u16);
sdo_value!(u32);
sdo_value!(i8);
sdo_value!(i16);
sdo_value!(i32);
sdo_value!(f32);

impl SdoValue for bool {
    type Bytes = [u8; 1];
    fn from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        let bytes: [u8; 1] = bytes.try_into()?;
        match bytes[0] {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(ParseError),
        }
    }

    fn to_bytes(self) -> Self::Bytes {
        [self as u8]
    }
}
