pub mod client;
pub mod errors;
pub mod frames;
pub mod parameters;
pub mod server;

pub use client::{SdoClient, SdoValue};
pub use errors::{AbortCode, ConfigError, SdoError};
pub use server::SdoServer;

use embassy_time::Duration;

/// Per-transfer timeout unless overridden, restarted on every response.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30);

// Command specifiers, bits 7..5 of the command byte.
pub(crate) const REQUEST_SEGMENT_DOWNLOAD: u8 = 0 << 5;
pub(crate) const REQUEST_DOWNLOAD: u8 = 1 << 5;
pub(crate) const REQUEST_UPLOAD: u8 = 2 << 5;
pub(crate) const REQUEST_SEGMENT_UPLOAD: u8 = 3 << 5;
pub(crate) const REQUEST_ABORTED: u8 = 4 << 5;

pub(crate) const RESPONSE_SEGMENT_UPLOAD: u8 = 0 << 5;
pub(crate) const RESPONSE_SEGMENT_DOWNLOAD: u8 = 1 << 5;
pub(crate) const RESPONSE_UPLOAD: u8 = 2 << 5;
pub(crate) const RESPONSE_DOWNLOAD: u8 = 3 << 5;
pub(crate) const RESPONSE_ABORTED: u8 = 4 << 5;

pub(crate) const COMMAND_SPECIFIER_MASK: u8 = 0b1110_0000;

// Flag bits shared by initiate and segment frames.
pub(crate) const EXPEDITED: u8 = 0x02;
pub(crate) const SIZE_SPECIFIED: u8 = 0x01;
pub(crate) const TOGGLE_BIT: u8 = 0x10;
pub(crate) const NO_MORE_DATA: u8 = 0x01;
