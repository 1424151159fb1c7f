//! ISO Acknowledgement (PGN 59392) codec. A thin frame builder/parser, not
//! a state machine: the router neither sends nor auto-parses these — the
//! application decides when a request it received warrants a positive or
//! negative acknowledgement.
use crate::core::{ack, BROADCAST_ADDRESS, PGN_ACKNOWLEDGEMENT, PRIORITY_ACK};
use crate::error::CanIdBuildError;
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::can_id::CanId;

/// One ISO Acknowledgement: `control` is one of [`ack::ACK`], [`ack::NAK`],
/// [`ack::ACCESS_DENIED`], [`ack::CANNOT_RESPOND`]; `destination` is the
/// address of the control function being acknowledged, carried in the
/// payload rather than the CAN identifier (the frame itself is always
/// broadcast, per PDU1's PS=0 requirement for PGN 59392).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acknowledgement {
    pub control: u8,
    pub group_function: u8,
    pub destination: u8,
    pub pgn: u32,
}

impl Acknowledgement {
    pub const fn new(control: u8, group_function: u8, destination: u8, pgn: u32) -> Self {
        Self {
            control,
            group_function,
            destination,
            pgn,
        }
    }

    pub const fn positive(destination: u8, pgn: u32) -> Self {
        Self::new(ack::ACK, 0, destination, pgn)
    }

    pub const fn negative(destination: u8, pgn: u32) -> Self {
        Self::new(ack::NAK, 0, destination, pgn)
    }

    pub const fn access_denied(destination: u8, pgn: u32) -> Self {
        Self::new(ack::ACCESS_DENIED, 0, destination, pgn)
    }

    pub const fn cannot_respond(destination: u8, pgn: u32) -> Self {
        Self::new(ack::CANNOT_RESPOND, 0, destination, pgn)
    }

    /// Build the 8-byte CAN frame, sourced from `source_address`.
    pub fn to_frame(&self, source_address: u8) -> Result<CanFrame, CanIdBuildError> {
        let id = CanId::builder(PGN_ACKNOWLEDGEMENT, source_address)
            .to_destination(BROADCAST_ADDRESS)
            .with_priority(PRIORITY_ACK)
            .build()?;
        let pgn_bytes = self.pgn.to_le_bytes();
        let data = [
            self.control,
            self.group_function,
            0xFF,
            0xFF,
            self.destination,
            pgn_bytes[0],
            pgn_bytes[1],
            pgn_bytes[2],
        ];
        Ok(CanFrame { id, data, len: 8 })
    }

    /// Parse an inbound frame, if it's an Acknowledgement with a full
    /// 8-byte payload.
    pub fn from_frame(frame: &CanFrame) -> Option<Self> {
        if frame.id.pgn() != PGN_ACKNOWLEDGEMENT || frame.len < 8 {
            return None;
        }
        let pgn = u32::from_le_bytes([frame.data[5], frame.data[6], frame.data[7], 0]);
        Some(Self {
            control: frame.data[0],
            group_function: frame.data[1],
            destination: frame.data[4],
            pgn,
        })
    }
}
