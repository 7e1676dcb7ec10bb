use embedded_can::StandardId;

/// CAN transport consumed by the SDO state machines.
///
/// `send` is a fire-and-forget enqueue of a classic data frame and must be
/// callable from the task that drives the state machines. An `Err` means
/// the frame could not be handed to the bus at all; the caller treats the
/// bus as down and fails the active transfer without further traffic.
///
/// Inbound frames are delivered by the application calling the respective
/// `on_message` of the client and server, so both can subscribe to the
/// same stream.
pub trait Network {
    type Error: core::fmt::Debug;

    fn send(&self, cob_id: StandardId, data: &[u8; 8]) -> Result<(), Self::Error>;
}
