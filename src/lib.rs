//! `ag-iso-core`: primitives and protocol engines required to run an
//! ISO 11783 / SAE J1939 / NMEA 2000 control function in a `no_std`
//! environment. The crate exposes the identifier/frame model, the
//! synchronous address-claim state machine, the three segmentation
//! transports (classic TP, extended ETP, NMEA 2000 fast packet), the
//! network router, the J1939-73 heartbeat supervisor, and the safety
//! policy engine. Everything is driven by a host calling `update`
//! with an elapsed-time delta; there is no internal locking, threading,
//! or async runtime.
#![no_std]

/// Small shared constants (null/broadcast addresses, well-known PGNs,
/// priority helpers).
pub mod core;
/// Domain errors raised by the identifier codec, address claimer,
/// transport engines, and router.
pub mod error;
/// J1939-73 heartbeat producer/consumer state machines.
pub mod heartbeat;
/// Protocol logic: identifiers, frames, control functions, address
/// claiming, transport engines, and the network router.
pub mod protocol;
/// Freshness-driven safety policy engine (Normal/Degraded/Emergency).
pub mod safety;
