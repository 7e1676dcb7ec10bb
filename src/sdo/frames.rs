//! Pure builders and parsers for the 8-byte SDO frames.
//!
//! Multi-byte fields are little-endian, unused bytes are zero-filled.

use super::*;
use crate::sdo::errors::AbortCode;

const fn toggle_flag(toggle: bool) -> u8 {
    if toggle {
        TOGGLE_BIT
    } else {
        0
    }
}

fn put_multiplexer(frame: &mut [u8; 8], index: u16, subindex: u8) {
    frame[1..3].copy_from_slice(&index.to_le_bytes());
    frame[3] = subindex;
}

fn multiplexer(frame: &[u8; 8]) -> (u16, u8) {
    (u16::from_le_bytes([frame[1], frame[2]]), frame[3])
}

fn abort_code(frame: &[u8; 8]) -> AbortCode {
    AbortCode::from_code(u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]))
}

/// Client to server: initiate upload of `index`/`subindex`.
pub fn upload_request(index: u16, subindex: u8) -> [u8; 8] {
    let mut frame = [0; 8];
    frame[0] = REQUEST_UPLOAD;
    put_multiplexer(&mut frame, index, subindex);
    frame
}

/// Client to server: request the next upload segment.
pub fn upload_segment_request(toggle: bool) -> [u8; 8] {
    let mut frame = [0; 8];
    frame[0] = REQUEST_SEGMENT_UPLOAD | toggle_flag(toggle);
    frame
}

/// Client to server: expedited download of 1..=4 bytes, size indicated.
pub fn download_request(index: u16, subindex: u8, data: &[u8]) -> [u8; 8] {
    debug_assert!((1..=4).contains(&data.len()));
    let mut frame = [0; 8];
    frame[0] = REQUEST_DOWNLOAD | EXPEDITED | SIZE_SPECIFIED | (((4 - data.len()) as u8) << 2);
    put_multiplexer(&mut frame, index, subindex);
    frame[4..4 + data.len()].copy_from_slice(data);
    frame
}

/// Client to server: initiate a segmented download of `size` bytes.
pub fn download_init_request(index: u16, subindex: u8, size: u32) -> [u8; 8] {
    let mut frame = [0; 8];
    frame[0] = REQUEST_DOWNLOAD | SIZE_SPECIFIED;
    put_multiplexer(&mut frame, index, subindex);
    frame[4..8].copy_from_slice(&size.to_le_bytes());
    frame
}

/// Client to server: one download segment of up to 7 bytes.
pub fn download_segment_request(toggle: bool, data: &[u8], last: bool) -> [u8; 8] {
    debug_assert!(data.len() <= 7);
    let mut frame = [0; 8];
    frame[0] = REQUEST_SEGMENT_DOWNLOAD
        | toggle_flag(toggle)
        | (((7 - data.len()) as u8) << 1)
        | if last { NO_MORE_DATA } else { 0 };
    frame[1..1 + data.len()].copy_from_slice(data);
    frame
}

/// Abort frame, sent by either side.
pub fn abort_frame(index: u16, subindex: u8, code: AbortCode) -> [u8; 8] {
    let mut frame = [0; 8];
    frame[0] = RESPONSE_ABORTED;
    put_multiplexer(&mut frame, index, subindex);
    frame[4..8].copy_from_slice(&code.code().to_le_bytes());
    frame
}

/// Server to client: expedited upload response carrying 1..=4 bytes.
pub fn upload_expedited_response(index: u16, subindex: u8, data: &[u8]) -> [u8; 8] {
    debug_assert!((1..=4).contains(&data.len()));
    let mut frame = [0; 8];
    frame[0] = RESPONSE_UPLOAD | EXPEDITED | SIZE_SPECIFIED | (((4 - data.len()) as u8) << 2);
    put_multiplexer(&mut frame, index, subindex);
    frame[4..4 + data.len()].copy_from_slice(data);
    frame
}

/// Server to client: segmented upload response announcing `size` bytes.
pub fn upload_segmented_response(index: u16, subindex: u8, size: u32) -> [u8; 8] {
    let mut frame = [0; 8];
    frame[0] = RESPONSE_UPLOAD | SIZE_SPECIFIED;
    put_multiplexer(&mut frame, index, subindex);
    frame[4..8].copy_from_slice(&size.to_le_bytes());
    frame
}

/// Server to client: one upload segment of up to 7 bytes.
pub fn upload_segment_response(toggle: bool, data: &[u8], last: bool) -> [u8; 8] {
    debug_assert!(data.len() <= 7);
    let mut frame = [0; 8];
    frame[0] = RESPONSE_SEGMENT_UPLOAD
        | toggle_flag(toggle)
        | (((7 - data.len()) as u8) << 1)
        | if last { NO_MORE_DATA } else { 0 };
    frame[1..1 + data.len()].copy_from_slice(data);
    frame
}

/// Server to client: download initiate acknowledgment.
pub fn download_response(index: u16, subindex: u8) -> [u8; 8] {
    let mut frame = [0; 8];
    frame[0] = RESPONSE_DOWNLOAD;
    put_multiplexer(&mut frame, index, subindex);
    frame
}

/// Server to client: download segment acknowledgment.
pub fn download_segment_response(toggle: bool) -> [u8; 8] {
    let mut frame = [0; 8];
    frame[0] = RESPONSE_SEGMENT_DOWNLOAD | toggle_flag(toggle);
    frame
}

/// A decoded client request, as seen by the server.
#[derive(Debug, PartialEq, Eq)]
pub enum Request {
    UploadInitiate {
        index: u16,
        subindex: u8,
    },
    UploadSegment {
        toggle: bool,
    },
    DownloadInitiate {
        index: u16,
        subindex: u8,
        expedited: bool,
        /// Announced total for segmented downloads.
        size: Option<u32>,
        data: [u8; 4],
        len: usize,
    },
    DownloadSegment {
        toggle: bool,
        data: [u8; 7],
        len: usize,
        last: bool,
    },
    Abort {
        index: u16,
        subindex: u8,
        code: AbortCode,
    },
    Unknown {
        ccs: u8,
    },
}

pub fn parse_request(frame: &[u8; 8]) -> Request {
    let command = frame[0];
    let (index, subindex) = multiplexer(frame);
    match command & COMMAND_SPECIFIER_MASK {
        REQUEST_UPLOAD => Request::UploadInitiate { index, subindex },
        REQUEST_SEGMENT_UPLOAD => Request::UploadSegment {
            toggle: command & TOGGLE_BIT != 0,
        },
        REQUEST_DOWNLOAD => {
            if command & EXPEDITED != 0 {
                // without the size bit all four payload bytes count
                let len = if command & SIZE_SPECIFIED != 0 {
                    4 - ((command >> 2) & 0x3) as usize
                } else {
                    4
                };
                let mut data = [0; 4];
                data[..len].copy_from_slice(&frame[4..4 + len]);
                Request::DownloadInitiate {
                    index,
                    subindex,
                    expedited: true,
                    size: None,
                    data,
                    len,
                }
            } else {
                let size = (command & SIZE_SPECIFIED != 0)
                    .then(|| u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]));
                Request::DownloadInitiate {
                    index,
                    subindex,
                    expedited: false,
                    size,
                    data: [0; 4],
                    len: 0,
                }
            }
        }
        REQUEST_SEGMENT_DOWNLOAD => {
            let len = 7 - ((command >> 1) & 0x7) as usize;
            let mut data = [0; 7];
            data[..len].copy_from_slice(&frame[1..1 + len]);
            Request::DownloadSegment {
                toggle: command & TOGGLE_BIT != 0,
                data,
                len,
                last: command & NO_MORE_DATA != 0,
            }
        }
        REQUEST_ABORTED => Request::Abort {
            index,
            subindex,
            code: abort_code(frame),
        },
        ccs => Request::Unknown { ccs },
    }
}

/// A decoded server response, as seen by the client.
#[derive(Debug, PartialEq, Eq)]
pub enum Response {
    UploadExpedited {
        index: u16,
        subindex: u8,
        data: [u8; 4],
        len: usize,
    },
    UploadSegmentedInit {
        index: u16,
        subindex: u8,
        size: Option<u32>,
    },
    UploadSegment {
        toggle: bool,
        data: [u8; 7],
        len: usize,
        last: bool,
    },
    DownloadAck {
        index: u16,
        subindex: u8,
    },
    DownloadSegmentAck {
        toggle: bool,
    },
    Abort {
        index: u16,
        subindex: u8,
        code: AbortCode,
    },
    Unknown {
        scs: u8,
    },
}

pub fn parse_response(frame: &[u8; 8]) -> Response {
    let command = frame[0];
    let (index, subindex) = multiplexer(frame);
    match command & COMMAND_SPECIFIER_MASK {
        RESPONSE_UPLOAD => {
            if command & EXPEDITED != 0 {
                let len = if command & SIZE_SPECIFIED != 0 {
                    4 - ((command >> 2) & 0x3) as usize
                } else {
                    4
                };
                let mut data = [0; 4];
                data[..len].copy_from_slice(&frame[4..4 + len]);
                Response::UploadExpedited {
                    index,
                    subindex,
                    data,
                    len,
                }
            } else {
                let size = (command & SIZE_SPECIFIED != 0)
                    .then(|| u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]));
                Response::UploadSegmentedInit {
                    index,
                    subindex,
                    size,
                }
            }
        }
        RESPONSE_SEGMENT_UPLOAD => {
            let len = 7 - ((command >> 1) & 0x7) as usize;
            let mut data = [0; 7];
            data[..len].copy_from_slice(&frame[1..1 + len]);
            Response::UploadSegment {
                toggle: command & TOGGLE_BIT != 0,
                data,
                len,
                last: command & NO_MORE_DATA != 0,
            }
        }
        RESPONSE_DOWNLOAD => Response::DownloadAck { index, subindex },
        RESPONSE_SEGMENT_DOWNLOAD => Response::DownloadSegmentAck {
            toggle: command & TOGGLE_BIT != 0,
        },
        RESPONSE_ABORTED => Response::Abort {
            index,
            subindex,
            code: abort_code(frame),
        },
        scs => Response::Unknown { scs },
    }
}
