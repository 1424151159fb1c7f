//! Shared constants used throughout the address-claim, transport, and
//! router modules: reserved addresses, well-known control PGNs, and the
//! CAN priority range.

/// Address reserved for "null" (a control function that failed to claim
/// and is not self-configurable uses this as its apparent source).
pub const NULL_ADDRESS: u8 = 0xFE;
/// Global destination address (broadcast).
pub const BROADCAST_ADDRESS: u8 = 0xFF;

/// First address of the self-configurable ("arbitrary") address range.
pub const ARBITRARY_ADDRESS_RANGE_START: u8 = 0x80;
/// Last address of the self-configurable ("arbitrary") address range.
pub const ARBITRARY_ADDRESS_RANGE_END: u8 = 0xFD;

/// Default J1939/NMEA 2000 priority for network-management traffic.
pub const PRIORITY_NETWORK_MANAGEMENT: u8 = 6;
/// Default priority for request/acknowledgement traffic.
pub const PRIORITY_ACK: u8 = 6;

/// PGN 59904 — ISO Request. Used to solicit a PGN from another CF,
/// including requesting Address Claim during network discovery.
pub const PGN_REQUEST: u32 = 59904;
/// PGN 60928 — ISO Address Claim.
pub const PGN_ADDRESS_CLAIMED: u32 = 60928;
/// PGN 65240 — ISO Commanded Address.
pub const PGN_COMMANDED_ADDRESS: u32 = 65240;
/// PGN 59392 — ISO Acknowledgement.
pub const PGN_ACKNOWLEDGEMENT: u32 = 59392;
/// PGN 65226 — Fast Packet DM1 (Active Diagnostic Trouble Codes), not
/// implemented here but reserved as a well-known constant for callers.
pub const PGN_DM1: u32 = 65226;

/// Classic Transport Protocol — connection management (BAM/RTS/CTS/EOMA/Abort).
pub const PGN_TP_CM: u32 = 0xEC00;
/// Classic Transport Protocol — data transfer.
pub const PGN_TP_DT: u32 = 0xEB00;
/// Extended Transport Protocol — connection management.
pub const PGN_ETP_CM: u32 = 0xC800;
/// Extended Transport Protocol — data transfer.
pub const PGN_ETP_DT: u32 = 0xC700;

/// J1939-73 Heartbeat PGN. Left for the integrating application to
/// register with the router; not hard-wired into any engine here.
pub const PGN_HEARTBEAT: u32 = 0xFEBF;

/// Acknowledgement control byte values carried in the first data byte of
/// PGN 59392 (ISO Acknowledgement).
pub mod ack {
    pub const ACK: u8 = 0;
    pub const NAK: u8 = 1;
    pub const ACCESS_DENIED: u8 = 2;
    pub const CANNOT_RESPOND: u8 = 3;
}
