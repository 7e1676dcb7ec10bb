//! Client and server driven against each other through mock networks.

use core::cell::{Cell, RefCell};
use std::collections::VecDeque;

use embassy_futures::block_on;
use embassy_futures::join::{join, join3};
use embassy_futures::yield_now;
use embassy_time::Duration;
use embedded_can::StandardId;

use canopen_sdo::{
    AbortCode, AccessType, DataType, Dictionary, Network, NodeId, ObjectDictionary, SdoClient,
    SdoError, SdoServer, SubEntry,
};

#[derive(Default)]
struct MockNetwork {
    queue: RefCell<VecDeque<(u16, [u8; 8])>>,
    log: RefCell<Vec<(u16, [u8; 8])>>,
}

impl MockNetwork {
    fn take(&self) -> Option<(u16, [u8; 8])> {
        self.queue.borrow_mut().pop_front()
    }

    fn frames(&self) -> Vec<[u8; 8]> {
        self.log.borrow().iter().map(|(_, data)| *data).collect()
    }
}

impl Network for MockNetwork {
    type Error = core::convert::Infallible;

    fn send(&self, cob_id: StandardId, data: &[u8; 8]) -> Result<(), Self::Error> {
        self.queue.borrow_mut().push_back((cob_id.as_raw(), *data));
        self.log.borrow_mut().push((cob_id.as_raw(), *data));
        Ok(())
    }
}

const SERVER_ID: u8 = 0x0B;

fn setup_od() -> ObjectDictionary {
    let mut od = ObjectDictionary::new();
    od.add_variable(
        0x2000,
        SubEntry::new(DataType::Unsigned8, AccessType::ReadWrite).with_raw(vec![0x42]),
    );
    od.add_variable(
        0x2001,
        SubEntry::new(DataType::Unsigned32, AccessType::ReadWrite).with_raw(vec![0; 4]),
    );
    od.add_variable(
        0x2002,
        SubEntry::new(DataType::VisibleString, AccessType::ReadWrite),
    );
    od.add_variable(
        0x2003,
        SubEntry::new(DataType::OctetString, AccessType::ReadWrite),
    );
    od
}

/// Runs `$fut` to completion while shuttling frames between the client and
/// a live server.
macro_rules! drive {
    ($client:ident, $client_net:ident, $server:ident, $server_net:ident, $od:ident, $fut:expr) => {{
        let done = Cell::new(false);
        let (result, _) = block_on(join(
            async {
                let result = $fut.await;
                done.set(true);
                result
            },
            async {
                while !done.get() {
                    while let Some((id, data)) = $client_net.take() {
                        $server.on_message(&mut $od, StandardId::new(id).unwrap(), &data);
                    }
                    while let Some((id, data)) = $server_net.take() {
                        $client.on_message(StandardId::new(id).unwrap(), &data);
                    }
                    yield_now().await;
                }
            },
        ));
        result
    }};
}

/// Runs `$fut` against a scripted responder instead of a real server.
macro_rules! drive_scripted {
    ($client:ident, $client_net:ident, $script:ident, $fut:expr) => {{
        let done = Cell::new(false);
        let response_cob = NodeId::new(SERVER_ID).unwrap().sdo_tx_cobid();
        let (result, _) = block_on(join(
            async {
                let result = $fut.await;
                done.set(true);
                result
            },
            async {
                while !done.get() {
                    if $client_net.take().is_some() {
                        if let Some(response) = $script.borrow_mut().pop_front() {
                            $client.on_message(response_cob, &response);
                        }
                    }
                    yield_now().await;
                }
            },
        ));
        result
    }};
}

#[test]
fn expedited_upload() {
    let client_net = MockNetwork::default();
    let server_net = MockNetwork::default();
    let mut od = setup_od();
    let mut client_od = ObjectDictionary::new();

    let mut client = SdoClient::new(&client_net);
    client.add_server(&mut client_od, SERVER_ID).unwrap();
    let mut server = SdoServer::new(&server_net);
    server.add_client(&mut od, SERVER_ID).unwrap();

    let result = drive!(
        client,
        client_net,
        server,
        server_net,
        od,
        client.upload(SERVER_ID, 0x2000, 0)
    );
    assert_eq!(result.unwrap(), vec![0x42]);

    assert_eq!(
        client_net.log.borrow().as_slice(),
        [(0x60B, [0x40, 0x00, 0x20, 0x00, 0, 0, 0, 0])]
    );
    assert_eq!(
        server_net.log.borrow().as_slice(),
        [(0x58B, [0x4F, 0x00, 0x20, 0x00, 0x42, 0, 0, 0])]
    );
}

#[test]
fn expedited_download() {
    let client_net = MockNetwork::default();
    let server_net = MockNetwork::default();
    let mut od = setup_od();
    let mut client_od = ObjectDictionary::new();

    let mut client = SdoClient::new(&client_net);
    client.add_server(&mut client_od, SERVER_ID).unwrap();
    let mut server = SdoServer::new(&server_net);
    server.add_client(&mut od, SERVER_ID).unwrap();

    let result = drive!(
        client,
        client_net,
        server,
        server_net,
        od,
        client.download(SERVER_ID, 0x2001, 0, &[0xDE, 0xAD, 0xBE, 0xEF])
    );
    result.unwrap();

    assert_eq!(
        client_net.frames(),
        [[0x23, 0x01, 0x20, 0x00, 0xDE, 0xAD, 0xBE, 0xEF]]
    );
    assert_eq!(server_net.frames(), [[0x60, 0x01, 0x20, 0x00, 0, 0, 0, 0]]);
    assert_eq!(
        od.get(0x2001).unwrap().sub(0).unwrap().raw,
        [0xDE, 0xAD, 0xBE, 0xEF]
    );
}

#[test]
fn segmented_download() {
    let client_net = MockNetwork::default();
    let server_net = MockNetwork::default();
    let mut od = setup_od();
    let mut client_od = ObjectDictionary::new();

    let mut client = SdoClient::new(&client_net);
    client.add_server(&mut client_od, SERVER_ID).unwrap();
    let mut server = SdoServer::new(&server_net);
    server.add_client(&mut od, SERVER_ID).unwrap();

    let result = drive!(
        client,
        client_net,
        server,
        server_net,
        od,
        client.download(SERVER_ID, 0x2002, 0, b"HelloWorld")
    );
    result.unwrap();

    assert_eq!(
        client_net.frames(),
        [
            [0x21, 0x02, 0x20, 0x00, 0x0A, 0, 0, 0],
            [0x00, b'H', b'e', b'l', b'l', b'o', b'W', b'o'],
            [0x19, b'r', b'l', b'd', 0, 0, 0, 0],
        ]
    );
    assert_eq!(
        server_net.frames(),
        [
            [0x60, 0x02, 0x20, 0x00, 0, 0, 0, 0],
            [0x20, 0, 0, 0, 0, 0, 0, 0],
            [0x30, 0, 0, 0, 0, 0, 0, 0],
        ]
    );
    assert_eq!(od.get(0x2002).unwrap().sub(0).unwrap().raw, b"HelloWorld");
}

#[test]
fn segmented_upload() {
    let client_net = MockNetwork::default();
    let server_net = MockNetwork::default();
    let mut od = setup_od();
    od.get_mut(0x2002).unwrap().sub_mut(0).unwrap().raw = b"A long string".to_vec();
    let mut client_od = ObjectDictionary::new();

    let mut client = SdoClient::new(&client_net);
    client.add_server(&mut client_od, SERVER_ID).unwrap();
    let mut server = SdoServer::new(&server_net);
    server.add_client(&mut od, SERVER_ID).unwrap();

    let result = drive!(
        client,
        client_net,
        server,
        server_net,
        od,
        client.upload(SERVER_ID, 0x2002, 0)
    );
    assert_eq!(result.unwrap(), b"A long string");

    // segment requests alternate the toggle bit starting at zero
    assert_eq!(
        client_net.frames(),
        [
            [0x40, 0x02, 0x20, 0x00, 0, 0, 0, 0],
            [0x60, 0, 0, 0, 0, 0, 0, 0],
            [0x70, 0, 0, 0, 0, 0, 0, 0],
        ]
    );
}

#[test]
fn typed_roundtrip() {
    let client_net = MockNetwork::default();
    let server_net = MockNetwork::default();
    let mut od = setup_od();
    let mut client_od = ObjectDictionary::new();

    let mut client = SdoClient::new(&client_net);
    client.add_server(&mut client_od, SERVER_ID).unwrap();
    let mut server = SdoServer::new(&server_net);
    server.add_client(&mut od, SERVER_ID).unwrap();

    drive!(
        client,
        client_net,
        server,
        server_net,
        od,
        client.download_as::<u32>(SERVER_ID, 0x2001, 0, 0xCAFE_F00D)
    )
    .unwrap();
    let value = drive!(
        client,
        client_net,
        server,
        server_net,
        od,
        client.upload_as::<u32>(SERVER_ID, 0x2001, 0)
    )
    .unwrap();
    assert_eq!(value, 0xCAFE_F00D);
}

#[test]
fn empty_payload_goes_segmented() {
    let client_net = MockNetwork::default();
    let server_net = MockNetwork::default();
    let mut od = setup_od();
    od.get_mut(0x2003).unwrap().sub_mut(0).unwrap().raw = vec![1, 2, 3];
    let mut client_od = ObjectDictionary::new();

    let mut client = SdoClient::new(&client_net);
    client.add_server(&mut client_od, SERVER_ID).unwrap();
    let mut server = SdoServer::new(&server_net);
    server.add_client(&mut od, SERVER_ID).unwrap();

    drive!(
        client,
        client_net,
        server,
        server_net,
        od,
        client.download(SERVER_ID, 0x2003, 0, &[])
    )
    .unwrap();
    assert_eq!(od.get(0x2003).unwrap().sub(0).unwrap().raw, Vec::<u8>::new());

    // announce of zero bytes, then a single empty final segment
    assert_eq!(
        client_net.frames(),
        [
            [0x21, 0x03, 0x20, 0x00, 0, 0, 0, 0],
            [0x0F, 0, 0, 0, 0, 0, 0, 0],
        ]
    );

    let value = drive!(
        client,
        client_net,
        server,
        server_net,
        od,
        client.upload(SERVER_ID, 0x2003, 0)
    )
    .unwrap();
    assert_eq!(value, Vec::<u8>::new());
}

#[test]
fn transfers_to_one_server_are_fifo() {
    let client_net = MockNetwork::default();
    let server_net = MockNetwork::default();
    let mut od = setup_od();
    let mut client_od = ObjectDictionary::new();

    let mut client = SdoClient::new(&client_net);
    client.add_server(&mut client_od, SERVER_ID).unwrap();
    let mut server = SdoServer::new(&server_net);
    server.add_client(&mut od, SERVER_ID).unwrap();

    let order = RefCell::new(Vec::new());
    let done = Cell::new(false);
    block_on(join3(
        async {
            client
                .download(SERVER_ID, 0x2002, 0, b"first transfer payload")
                .await
                .unwrap();
            order.borrow_mut().push("a");
        },
        async {
            client.download(SERVER_ID, 0x2001, 0, &[1, 2, 3, 4]).await.unwrap();
            order.borrow_mut().push("b");
            done.set(true);
        },
        async {
            while !done.get() {
                while let Some((id, data)) = client_net.take() {
                    server.on_message(&mut od, StandardId::new(id).unwrap(), &data);
                }
                while let Some((id, data)) = server_net.take() {
                    client.on_message(StandardId::new(id).unwrap(), &data);
                }
                yield_now().await;
            }
        },
    ));
    assert_eq!(*order.borrow(), ["a", "b"]);

    // the second transfer never cut into the first: its single expedited
    // frame is the last request on the wire
    let frames = client_net.frames();
    assert_eq!(frames[0], [0x21, 0x02, 0x20, 0x00, 0x16, 0, 0, 0]);
    assert_eq!(frames.last().unwrap(), &[0x23, 0x01, 0x20, 0x00, 1, 2, 3, 4]);
}

#[test]
fn peer_abort_rejects_future() {
    let client_net = MockNetwork::default();
    let server_net = MockNetwork::default();
    let mut od = setup_od();
    od.add_variable(
        0x2008,
        SubEntry::new(DataType::Unsigned8, AccessType::ReadOnly).with_raw(vec![0]),
    );
    let mut client_od = ObjectDictionary::new();

    let mut client = SdoClient::new(&client_net);
    client.add_server(&mut client_od, SERVER_ID).unwrap();
    let mut server = SdoServer::new(&server_net);
    server.add_client(&mut od, SERVER_ID).unwrap();

    let result = drive!(
        client,
        client_net,
        server,
        server_net,
        od,
        client.download(SERVER_ID, 0x2008, 0, &[1])
    );
    assert_eq!(
        result,
        Err(SdoError::Abort {
            code: AbortCode::ReadOnlyError,
            index: 0x2008,
            subindex: 0,
        })
    );
    // the client does not answer a peer abort
    assert_eq!(client_net.frames().len(), 1);
}

#[test]
fn toggle_violation_aborts_with_frame() {
    let client_net = MockNetwork::default();
    let mut client_od = ObjectDictionary::new();
    let mut client = SdoClient::new(&client_net);
    client.add_server(&mut client_od, SERVER_ID).unwrap();

    // ack the initiate, then answer the first segment with toggle set
    let script: RefCell<VecDeque<[u8; 8]>> = RefCell::new(VecDeque::from([
        [0x60, 0x02, 0x20, 0x00, 0, 0, 0, 0],
        [0x30, 0, 0, 0, 0, 0, 0, 0],
    ]));
    let result = drive_scripted!(
        client,
        client_net,
        script,
        client.download(SERVER_ID, 0x2002, 0, b"HelloWorld")
    );
    assert_eq!(
        result,
        Err(SdoError::Abort {
            code: AbortCode::ToggleBitNotAlternated,
            index: 0x2002,
            subindex: 0,
        })
    );
    assert_eq!(
        client_net.frames().last().unwrap(),
        &[0x80, 0x02, 0x20, 0x00, 0x00, 0x00, 0x03, 0x05]
    );
}

#[test]
fn unanswered_request_times_out() {
    let client_net = MockNetwork::default();
    let mut client_od = ObjectDictionary::new();
    let mut client = SdoClient::new(&client_net);
    client.add_server(&mut client_od, SERVER_ID).unwrap();

    // seg-init response, then silence
    let script: RefCell<VecDeque<[u8; 8]>> = RefCell::new(VecDeque::from([[
        0x41, 0x02, 0x20, 0x00, 0x0A, 0, 0, 0,
    ]]));
    let result = drive_scripted!(
        client,
        client_net,
        script,
        client.upload_with_timeout(SERVER_ID, 0x2002, 0, Duration::from_millis(50))
    );
    assert_eq!(
        result,
        Err(SdoError::Abort {
            code: AbortCode::ProtocolTimedOut,
            index: 0x2002,
            subindex: 0,
        })
    );
    assert_eq!(
        client_net.frames().last().unwrap(),
        &[0x80, 0x02, 0x20, 0x00, 0x00, 0x00, 0x04, 0x05]
    );
}

#[test]
fn unknown_server_is_rejected() {
    let client_net = MockNetwork::default();
    let client = SdoClient::new(&client_net);
    let result = block_on(client.upload(0x22, 0x2000, 0));
    assert_eq!(
        result,
        Err(SdoError::Abort {
            code: AbortCode::ResourceNotAvailable,
            index: 0x2000,
            subindex: 0,
        })
    );
    assert!(client_net.frames().is_empty());
}

#[test]
fn init_scans_parameter_entries() {
    let client_net = MockNetwork::default();
    let server_net = MockNetwork::default();
    let mut od = setup_od();
    let mut client_od = ObjectDictionary::new();

    // populate the parameter entry with one client, scan it with another
    let mut setup_client = SdoClient::new(&client_net);
    setup_client.add_server(&mut client_od, SERVER_ID).unwrap();

    let mut client = SdoClient::new(&client_net);
    client.init(&client_od).unwrap();
    let mut server = SdoServer::new(&server_net);
    server.add_client(&mut od, SERVER_ID).unwrap();

    let result = drive!(
        client,
        client_net,
        server,
        server_net,
        od,
        client.upload(SERVER_ID, 0x2000, 0)
    );
    assert_eq!(result.unwrap(), vec![0x42]);
}

#[test]
fn server_init_scans_parameter_entries() {
    let client_net = MockNetwork::default();
    let server_net = MockNetwork::default();
    let mut od = setup_od();
    let mut client_od = ObjectDictionary::new();

    let mut client = SdoClient::new(&client_net);
    client.add_server(&mut client_od, SERVER_ID).unwrap();

    let mut setup_server = SdoServer::new(&server_net);
    setup_server.add_client(&mut od, SERVER_ID).unwrap();
    let mut server = SdoServer::new(&server_net);
    server.init(&od).unwrap();

    let result = drive!(
        client,
        client_net,
        server,
        server_net,
        od,
        client.upload(SERVER_ID, 0x2000, 0)
    );
    assert_eq!(result.unwrap(), vec![0x42]);
}

#[test]
fn configuration_errors() {
    use canopen_sdo::ConfigError;

    let client_net = MockNetwork::default();
    let mut client_od = ObjectDictionary::new();
    let mut client = SdoClient::new(&client_net);

    assert_eq!(
        client.add_server(&mut client_od, 0),
        Err(ConfigError::NodeIdOutOfRange(0))
    );
    assert_eq!(
        client.add_server(&mut client_od, 200),
        Err(ConfigError::NodeIdOutOfRange(200))
    );

    client.add_server(&mut client_od, SERVER_ID).unwrap();
    assert_eq!(
        client.add_server(&mut client_od, SERVER_ID),
        Err(ConfigError::DuplicateNodeId(SERVER_ID))
    );

    assert_eq!(
        client.remove_server(&mut client_od, 0x22),
        Err(ConfigError::UnknownNodeId(0x22))
    );
    client.remove_server(&mut client_od, SERVER_ID).unwrap();
    assert!(client_od.indices_in(0x1280..=0x12FF).is_empty());

    let result = block_on(client.upload(SERVER_ID, 0x2000, 0));
    assert_eq!(result.unwrap_err().abort_code(), Some(AbortCode::ResourceNotAvailable));
}

#[test]
fn init_refuses_extended_and_dynamic_cob_ids() {
    use canopen_sdo::ConfigError;

    let client_net = MockNetwork::default();
    let mut client_od = ObjectDictionary::new();
    let mut client = SdoClient::new(&client_net);
    assert_eq!(
        client.add_server_with_cob_ids(&mut client_od, SERVER_ID, (1 << 29) | 0x600, 0x580),
        Err(ConfigError::UnsupportedCobId {
            index: 0x1280,
            cob_id: (1 << 29) | 0x600,
        })
    );
    assert_eq!(
        client.add_server_with_cob_ids(&mut client_od, SERVER_ID, (1 << 30) | 0x600, 0x580),
        Err(ConfigError::UnsupportedCobId {
            index: 0x1280,
            cob_id: (1 << 30) | 0x600,
        })
    );
    // a failed add leaves the dictionary untouched
    assert!(client_od.indices_in(0x1280..=0x12FF).is_empty());
}

#[test]
fn invalid_cob_id_writes_entry_but_stays_inactive() {
    let client_net = MockNetwork::default();
    let mut client_od = ObjectDictionary::new();
    let mut client = SdoClient::new(&client_net);
    client
        .add_server_with_cob_ids(&mut client_od, SERVER_ID, (1 << 31) | 0x600, 0x580)
        .unwrap();
    // the parameter entry exists, but no connection is active
    assert_eq!(client_od.indices_in(0x1280..=0x12FF), [0x1280]);
    let result = block_on(client.upload(SERVER_ID, 0x2000, 0));
    assert_eq!(result.unwrap_err().abort_code(), Some(AbortCode::ResourceNotAvailable));
}
