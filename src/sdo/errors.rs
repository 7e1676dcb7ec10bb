use core::fmt;

/// CiA 301 SDO abort codes.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AbortCode {
    ToggleBitNotAlternated,
    ProtocolTimedOut,
    CommandSpecifierError,
    OutOfMemory,
    UnsupportedAccess,
    WriteOnlyError,
    ReadOnlyError,
    ObjectDoesNotExist,
    WrongLength,
    TooLong,
    TooShort,
    SubindexDoesNotExist,
    InvalidValue,
    ValueTooHigh,
    ValueTooLow,
    MaxLessThanMin,
    ResourceNotAvailable,
    GeneralError,
    TransferOrStorageError,
    LocalControlError,
    DeviceStateError,
    DictionaryError,
    NoDataAvailable,
    /// Inbound code outside the table, preserved as received.
    Unknown(u32),
}

const TOGGLE_BIT_NOT_ALTERNATED: u32 = 0x0503_0000;
const SDO_PROTOCOL_TIMED_OUT: u32 = 0x0504_0000;
const COMMAND_SPECIFIER_ERROR: u32 = 0x0504_0001;
const OUT_OF_MEMORY: u32 = 0x0504_0005;
const UNSUPPORTED_ACCESS: u32 = 0x0601_0000;
const WRITE_ONLY_ERROR: u32 = 0x0601_0001;
const READ_ONLY_ERROR: u32 = 0x0601_0002;
const OBJECT_DOES_NOT_EXIST: u32 = 0x0602_0000;
const WRONG_LENGTH: u32 = 0x0607_0010;
const TOO_LONG: u32 = 0x0607_0012;
const TOO_SHORT: u32 = 0x0607_0013;
const SUBINDEX_DOES_NOT_EXIST: u32 = 0x0609_0011;
const INVALID_VALUE: u32 = 0x0609_0030;
const VALUE_TOO_HIGH: u32 = 0x0609_0031;
const VALUE_TOO_LOW: u32 = 0x0609_0032;
const MAX_LESS_THAN_MIN: u32 = 0x0609_0036;
const RESOURCE_NOT_AVAILABLE: u32 = 0x060A_0023;
const GENERAL_ERROR: u32 = 0x0800_0000;
const TRANSFER_OR_STORAGE_ERROR: u32 = 0x0800_0020;
const LOCAL_CONTROL_ERROR: u32 = 0x0800_0021;
const DEVICE_STATE_ERROR: u32 = 0x0800_0022;
const DICTIONARY_ERROR: u32 = 0x0800_0023;
const NO_DATA_AVAILABLE: u32 = 0x0800_0024;

impl AbortCode {
    pub const fn code(self) -> u32 {
        match self {
            AbortCode::ToggleBitNotAlternated => TOGGLE_BIT_NOT_ALTERNATED,
            AbortCode::ProtocolTimedOut => SDO_PROTOCOL_TIMED_OUT,
            AbortCode::CommandSpecifierError => COMMAND_SPECIFIER_ERROR,
            AbortCode::OutOfMemory => OUT_OF_MEMORY,
            AbortCode::UnsupportedAccess => UNSUPPORTED_ACCESS,
            AbortCode::WriteOnlyError => WRITE_ONLY_ERROR,
            AbortCode::ReadOnlyError => READ_ONLY_ERROR,
            AbortCode::ObjectDoesNotExist => OBJECT_DOES_NOT_EXIST,
            AbortCode::WrongLength => WRONG_LENGTH,
            AbortCode::TooLong => TOO_LONG,
            AbortCode::TooShort => TOO_SHORT,
            AbortCode::SubindexDoesNotExist => SUBINDEX_DOES_NOT_EXIST,
            AbortCode::InvalidValue => INVALID_VALUE,
            AbortCode::ValueTooHigh => VALUE_TOO_HIGH,
            AbortCode::ValueTooLow => VALUE_TOO_LOW,
            AbortCode::MaxLessThanMin => MAX_LESS_THAN_MIN,
            AbortCode::ResourceNotAvailable => RESOURCE_NOT_AVAILABLE,
            AbortCode::GeneralError => GENERAL_ERROR,
            AbortCode::TransferOrStorageError => TRANSFER_OR_STORAGE_ERROR,
            AbortCode::LocalControlError => LOCAL_CONTROL_ERROR,
            AbortCode::DeviceStateError => DEVICE_STATE_ERROR,
            AbortCode::DictionaryError => DICTIONARY_ERROR,
            AbortCode::NoDataAvailable => NO_DATA_AVAILABLE,
            AbortCode::Unknown(code) => code,
        }
    }

    pub const fn from_code(code: u32) -> AbortCode {
        match code {
            TOGGLE_BIT_NOT_ALTERNATED => AbortCode::ToggleBitNotAlternated,
            SDO_PROTOCOL_TIMED_OUT => AbortCode::ProtocolTimedOut,
            COMMAND_SPECIFIER_ERROR => AbortCode::CommandSpecifierError,
            OUT_OF_MEMORY => AbortCode::OutOfMemory,
            UNSUPPORTED_ACCESS => AbortCode::UnsupportedAccess,
            WRITE_ONLY_ERROR => AbortCode::WriteOnlyError,
            READ_ONLY_ERROR => AbortCode::ReadOnlyError,
            OBJECT_DOES_NOT_EXIST => AbortCode::ObjectDoesNotExist,
            WRONG_LENGTH => AbortCode::WrongLength,
            TOO_LONG => AbortCode::TooLong,
            TOO_SHORT => AbortCode::TooShort,
            SUBINDEX_DOES_NOT_EXIST => AbortCode::SubindexDoesNotExist,
            INVALID_VALUE => AbortCode::InvalidValue,
            VALUE_TOO_HIGH => AbortCode::ValueTooHigh,
            VALUE_TOO_LOW => AbortCode::ValueTooLow,
            MAX_LESS_THAN_MIN => AbortCode::MaxLessThanMin,
            RESOURCE_NOT_AVAILABLE => AbortCode::ResourceNotAvailable,
            GENERAL_ERROR => AbortCode::GeneralError,
            TRANSFER_OR_STORAGE_ERROR => AbortCode::TransferOrStorageError,
            LOCAL_CONTROL_ERROR => AbortCode::LocalControlError,
            DEVICE_STATE_ERROR => AbortCode::DeviceStateError,
            DICTIONARY_ERROR => AbortCode::DictionaryError,
            NO_DATA_AVAILABLE => AbortCode::NoDataAvailable,
            other => AbortCode::Unknown(other),
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            AbortCode::ToggleBitNotAlternated => "Toggle bit not alternated",
            AbortCode::ProtocolTimedOut => "SDO protocol timed out",
            AbortCode::CommandSpecifierError => {
                "Client/server command specifier not valid or unknown"
            }
            AbortCode::OutOfMemory => "Out of memory",
            AbortCode::UnsupportedAccess => "Unsupported access to an object",
            AbortCode::WriteOnlyError => "Attempt to read a write only object",
            AbortCode::ReadOnlyError => "Attempt to write a read only object",
            AbortCode::ObjectDoesNotExist => "Object does not exist in the object dictionary",
            AbortCode::WrongLength => {
                "Data type does not match, length of service parameter does not match"
            }
            AbortCode::TooLong => "Data type does not match, length of service parameter too high",
            AbortCode::TooShort => "Data type does not match, length of service parameter too low",
            AbortCode::SubindexDoesNotExist => "Subindex does not exist",
            AbortCode::InvalidValue => "Invalid value for parameter",
            AbortCode::ValueTooHigh => "Value of parameter written too high",
            AbortCode::ValueTooLow => "Value of parameter written too low",
            AbortCode::MaxLessThanMin => "Maximum value is less than minimum value",
            AbortCode::ResourceNotAvailable => "Resource not available: SDO connection",
            AbortCode::GeneralError => "General error",
            AbortCode::TransferOrStorageError => {
                "Data cannot be transferred or stored to the application"
            }
            AbortCode::LocalControlError => {
                "Data can not be transferred or stored to the application because of local control"
            }
            AbortCode::DeviceStateError => {
                "Data can not be transferred or stored to the application because of the present device state"
            }
            AbortCode::DictionaryError => {
                "Object dictionary dynamic generation fails or no object dictionary is present"
            }
            AbortCode::NoDataAvailable => "No data available",
            AbortCode::Unknown(_) => "Unknown error",
        }
    }
}

impl From<u32> for AbortCode {
    fn from(code: u32) -> AbortCode {
        AbortCode::from_code(code)
    }
}

impl From<AbortCode> for u32 {
    fn from(code: AbortCode) -> u32 {
        code.code()
    }
}

impl fmt::Display for AbortCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Code 0x{:08X}, {}", self.code(), self.description())
    }
}

/// Failure of a single SDO transfer.
#[derive(Debug, PartialEq)]
pub enum SdoError<E> {
    /// The transfer was aborted, by the peer or locally.
    Abort {
        code: AbortCode,
        index: u16,
        subindex: u8,
    },
    /// The transport rejected an outgoing frame; the bus is presumed down.
    Tx(E),
}

impl<E> SdoError<E> {
    pub fn abort_code(&self) -> Option<AbortCode> {
        match self {
            SdoError::Abort { code, .. } => Some(*code),
            SdoError::Tx(_) => None,
        }
    }
}

impl<E: fmt::Debug> fmt::Display for SdoError<E> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SdoError::Abort {
                code,
                index,
                subindex,
            } => write!(
                f,
                "SDO transfer of {:#06X}sub{} aborted: {}",
                index, subindex, code
            ),
            SdoError::Tx(error) => write!(f, "CAN transmit failed: {:?}", error),
        }
    }
}

#[cfg(feature = "defmt")]
impl<E: defmt::Format> defmt::Format for SdoError<E> {
    fn format(&self, f: defmt::Formatter) {
        match self {
            SdoError::Abort {
                code,
                index,
                subindex,
            } => defmt::write!(
                f,
                "SDO transfer of 0x{:04X}sub{} aborted: 0x{:08X}",
                index,
                subindex,
                code.code()
            ),
            SdoError::Tx(error) => defmt::write!(f, "CAN transmit failed: {}", error),
        }
    }
}

/// Synchronous configuration failure from `add_*`, `remove_*` or `init`.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    NodeIdOutOfRange(u8),
    DuplicateNodeId(u8),
    UnknownNodeId(u8),
    /// Extended (bit 29) or dynamically allocated (bit 30) COB-ID.
    UnsupportedCobId { index: u16, cob_id: u32 },
    /// No free SDO parameter entry left in the dictionary range.
    DictionaryFull,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::NodeIdOutOfRange(id) => write!(f, "node id {} outside 1..=127", id),
            ConfigError::DuplicateNodeId(id) => write!(f, "node id {} already configured", id),
            ConfigError::UnknownNodeId(id) => write!(f, "node id {} not configured", id),
            ConfigError::UnsupportedCobId { index, cob_id } => write!(
                f,
                "SDO parameter {:#06X} holds unsupported COB-ID {:#010X}",
                index, cob_id
            ),
            ConfigError::DictionaryFull => write!(f, "no free SDO parameter entry"),
        }
    }
}
