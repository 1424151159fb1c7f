//! Error definitions shared across library modules.
//! Each type models a specific failure scenario: CAN identifier
//! construction, address claiming, transport sessions, and the router.
use thiserror_no_std::Error;

#[derive(Error, Debug)]
/// Errors that can occur while building a 29-bit CAN identifier.
pub enum CanIdBuildError {
    /// Provided parameters do not produce a valid identifier.
    #[error("Invalid data")]
    InvalidData,
    /// The destination address violates protocol constraints.
    #[error("Invalid destination")]
    InvalidDestination,
    /// Attempt to build a broadcast message (PDU2) with PF < 240.
    #[error("Invalid for broadcast message: PF is too low")]
    InvalidForBroadcast,
    /// Attempt to send an addressed message (PDU1) with PF ≥ 240.
    #[error("Invalid for addressed message: PF is too high: {pgn}")]
    InvalidForFocusedMessage { pgn: u8 },
    /// In PDU1 the lower 8 bits of the PGN must remain zero.
    #[error("PDU1 PGNs require PS = 0")]
    PsFocusMessageMustBeNull,
    /// No payload available to build the frame.
    #[error("Payload is empty: unable to build")]
    EmptyPayload,
}

#[derive(Error, Debug)]
/// Errors encountered while claiming or defending an address.
pub enum ClaimError {
    /// Another node claimed the same address with a higher-priority NAME
    /// and this control function is not self-configurable.
    #[error("network conflict, address lost and not self-configurable")]
    NetworkConflict,

    /// Every address in the self-configurable range is already taken.
    #[error("no address available in the self-configurable range")]
    NoAddressAvailable,

    /// The received frame does not match the expected format.
    #[error("invalid incoming address-claim frame")]
    InvalidIncomingFrame,

    /// Unable to build the CAN identifier for a claim frame.
    #[error(transparent)]
    BuildErr(#[from] CanIdBuildError),
}

/// Reasons a transport session was aborted, carried on the wire in the
/// Connection Abort control byte for both classic TP and ETP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum TransportAbortReason {
    AlreadyInProgress = 1,
    NoResources = 2,
    Timeout = 3,
    CtsWhileSending = 4,
    MaxRetransmits = 5,
    UnexpectedDataTransfer = 6,
    BadSequenceNumber = 7,
    DuplicateSequenceNumber = 8,
    TotalSizeTooBig = 9,
}

impl TransportAbortReason {
    /// Decode the abort reason carried in a Connection Abort control byte.
    /// Unknown codes map to `NoResources`, a generic resource-failure
    /// fallback.
    pub fn from_wire(code: u8) -> Self {
        match code {
            1 => Self::AlreadyInProgress,
            2 => Self::NoResources,
            3 => Self::Timeout,
            4 => Self::CtsWhileSending,
            5 => Self::MaxRetransmits,
            6 => Self::UnexpectedDataTransfer,
            7 => Self::BadSequenceNumber,
            8 => Self::DuplicateSequenceNumber,
            _ => Self::NoResources,
        }
    }
}

/// Fixed-capacity textual snapshot of an `Endpoint::Error`, captured at
/// the point of failure. `CoreError` is shared by code that has no
/// endpoint type in scope (the transport engines build frames without
/// ever touching an `Endpoint`), so it can't carry the error generically;
/// this stores its `Debug` rendering instead.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EndpointErrorDetail {
    buf: [u8; 48],
    len: usize,
}

impl EndpointErrorDetail {
    pub fn capture<E: core::fmt::Debug>(err: &E) -> Self {
        use core::fmt::Write;

        struct Cursor<'a> {
            buf: &'a mut [u8],
            len: usize,
        }
        impl<'a> Write for Cursor<'a> {
            fn write_str(&mut self, s: &str) -> core::fmt::Result {
                let space = self.buf.len() - self.len;
                let n = s.len().min(space);
                self.buf[self.len..self.len + n].copy_from_slice(&s.as_bytes()[..n]);
                self.len += n;
                Ok(())
            }
        }

        let mut buf = [0u8; 48];
        let len = {
            let mut cursor = Cursor { buf: &mut buf, len: 0 };
            let _ = write!(cursor, "{:?}", err);
            cursor.len
        };
        Self { buf, len }
    }

    pub fn as_str(&self) -> &str {
        core::str::from_utf8(&self.buf[..self.len]).unwrap_or("<endpoint error>")
    }
}

impl core::fmt::Display for EndpointErrorDetail {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the transport engines (classic TP, ETP, fast packet)
/// and by the network router that drives them.
#[derive(Error, Debug)]
pub enum CoreError {
    /// This control function has no claimed address yet.
    #[error("control function has no claimed address")]
    NotConnected,

    /// Attempted to send from or to the null address.
    #[error("invalid address: NULL_ADDRESS cannot send or receive application data")]
    InvalidAddress,

    /// PGN is out of range or forbidden for the requested operation
    /// (e.g. broadcasting a PGN that requires a destination).
    #[error("invalid PGN for this operation")]
    InvalidPGN,

    /// Payload exceeds the maximum size for the selected transport.
    #[error("payload too large for the selected transport")]
    PayloadTooLarge,

    /// A transport session already exists for this `(source, destination, PGN)`.
    #[error("transport session already in progress")]
    AlreadyInProgress,

    /// Transport session exceeded one of its timers, or a request went
    /// unanswered within its response window.
    #[error("transport session timed out")]
    Timeout,

    /// The peer or the host aborted a transport session.
    #[error("transport session aborted: {0:?}")]
    Aborted(TransportAbortReason),

    /// Operation not allowed in the current state (e.g. sending before
    /// the address claim completed).
    #[error("invalid state for this operation")]
    InvalidState,

    /// Error propagated from the underlying `Endpoint`.
    #[error("endpoint error: {0}")]
    EndpointError(EndpointErrorDetail),

    /// Unable to build the CAN identifier for an outbound frame.
    #[error(transparent)]
    BuildErr(#[from] CanIdBuildError),

    /// Underlying address-claim failure.
    #[error(transparent)]
    Claim(#[from] ClaimError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct FakeDriverError;

    #[test]
    fn endpoint_error_detail_captures_debug_rendering() {
        let detail = EndpointErrorDetail::capture(&FakeDriverError);
        assert_eq!(detail.as_str(), "FakeDriverError");
    }

    #[test]
    fn endpoint_error_detail_truncates_long_messages() {
        struct LongError;
        impl core::fmt::Debug for LongError {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", "x".repeat(100))
            }
        }
        let detail = EndpointErrorDetail::capture(&LongError);
        assert_eq!(detail.as_str().len(), 48);
    }
}
