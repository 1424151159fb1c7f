//! Extended Transport Protocol (ISO 11783-3 / SAE J1939-21): the
//! connection-mode-only analogue of [`classic`](super::classic) for
//! payloads too large for classic TP (1785 bytes) up to 117,440,505
//! bytes. Control traffic rides PGN 0xC800, data frames ride PGN
//! 0xC700; DT frames carry a 3-byte packet offset instead of a 1-byte
//! sequence number.
//!
//! Grounded on the same `tp_test`/`tp_timer_test` shape classic TP
//! uses (the reference C++ test suite's `etp_test` drives an
//! equivalent connection-mode state machine); this engine shares no
//! state with [`classic::ClassicTransport`](super::classic::ClassicTransport).
//!
//! `no_std` has no heap, so a session's reassembly buffer is bounded by
//! the `MAX_BYTES` const generic rather than the wire format's
//! theoretical maximum — callers needing multi-megabyte transfers pick
//! a large enough `MAX_BYTES` for their platform's RAM budget.
use crate::core::{BROADCAST_ADDRESS, PGN_ETP_CM, PGN_ETP_DT, PRIORITY_NETWORK_MANAGEMENT};
use crate::error::{CoreError, TransportAbortReason};
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::can_id::CanId;
use crate::protocol::transport::classic::{
    TpSessionState, MAX_PACKETS_PER_CTS, TP_TIMEOUT_T1_MS, TP_TIMEOUT_T3_MS, TP_TIMEOUT_T4_MS,
};

/// Theoretical ceiling implied by the 4-byte wire size field; real
/// sessions are bounded by a much smaller `MAX_BYTES`.
pub const ETP_WIRE_MAX_BYTES: u32 = 117_440_505;

pub mod etp_cm {
    pub const RTS: u8 = 0x14;
    pub const CTS: u8 = 0x15;
    pub const DPO: u8 = 0x16;
    pub const EOMA: u8 = 0x17;
    pub const ABORT: u8 = 0xFF;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EtpSessionKey {
    pub source: u8,
    pub destination: u8,
    pub pgn: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Outbound,
    Inbound,
}

struct Session<const MAX_BYTES: usize> {
    key: EtpSessionKey,
    state: TpSessionState,
    direction: Direction,
    buffer: [u8; MAX_BYTES],
    total_size: usize,
    total_packets: u32,
    /// Offset (1-based packet index) of the next packet to send/receive.
    next_packet: u32,
    window_end: u32,
    bytes_transferred: usize,
    timer_ms: u32,
}

impl<const MAX_BYTES: usize> Session<MAX_BYTES> {
    const fn empty() -> Self {
        Self {
            key: EtpSessionKey {
                source: 0,
                destination: 0,
                pgn: 0,
            },
            state: TpSessionState::Idle,
            direction: Direction::Outbound,
            buffer: [0; MAX_BYTES],
            total_size: 0,
            total_packets: 0,
            next_packet: 1,
            window_end: 0,
            bytes_transferred: 0,
            timer_ms: 0,
        }
    }

    fn in_use(&self) -> bool {
        self.state != TpSessionState::Idle
    }
}

pub enum EtpEvent {
    Progress,
    Ignored,
    MessageComplete { key: EtpSessionKey, len: usize },
    Aborted {
        key: EtpSessionKey,
        reason: TransportAbortReason,
    },
}

pub struct EtpFrames {
    frames: [Option<CanFrame>; MAX_PACKETS_PER_CTS as usize + 1],
    len: usize,
}

impl EtpFrames {
    fn new() -> Self {
        const NONE: Option<CanFrame> = None;
        Self {
            frames: [NONE; MAX_PACKETS_PER_CTS as usize + 1],
            len: 0,
        }
    }

    fn push(&mut self, frame: CanFrame) {
        if self.len < self.frames.len() {
            self.frames[self.len] = Some(frame);
            self.len += 1;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn iter(&self) -> impl Iterator<Item = &CanFrame> {
        self.frames[..self.len].iter().filter_map(|f| f.as_ref())
    }
}

fn build_frame(pgn: u32, source: u8, destination: u8, data: [u8; 8]) -> Result<CanFrame, CoreError> {
    let id = CanId::builder(pgn, source)
        .with_priority(PRIORITY_NETWORK_MANAGEMENT)
        .to_destination(destination)
        .build()?;
    Ok(CanFrame { id, data, len: 8 })
}

fn cm_rts(total_size: usize, pgn: u32, source: u8, destination: u8) -> Result<CanFrame, CoreError> {
    let size_bytes = (total_size as u32).to_le_bytes();
    let pgn_bytes = pgn.to_le_bytes();
    let data = [
        etp_cm::RTS,
        size_bytes[0],
        size_bytes[1],
        size_bytes[2],
        size_bytes[3],
        pgn_bytes[0],
        pgn_bytes[1],
        pgn_bytes[2],
    ];
    build_frame(PGN_ETP_CM, source, destination, data)
}

fn cm_cts(num_packets: u8, next_packet: u32, pgn: u32, source: u8, destination: u8) -> Result<CanFrame, CoreError> {
    let offset = next_packet.to_le_bytes();
    let pgn_bytes = pgn.to_le_bytes();
    let data = [
        etp_cm::CTS,
        num_packets,
        offset[0],
        offset[1],
        offset[2],
        pgn_bytes[0],
        pgn_bytes[1],
        pgn_bytes[2],
    ];
    build_frame(PGN_ETP_CM, source, destination, data)
}

fn cm_dpo(num_packets: u8, packet_offset: u32, pgn: u32, source: u8, destination: u8) -> Result<CanFrame, CoreError> {
    let offset = packet_offset.to_le_bytes();
    let pgn_bytes = pgn.to_le_bytes();
    let data = [
        etp_cm::DPO,
        num_packets,
        offset[0],
        offset[1],
        offset[2],
        pgn_bytes[0],
        pgn_bytes[1],
        pgn_bytes[2],
    ];
    build_frame(PGN_ETP_CM, source, destination, data)
}

fn cm_eoma(total_size: usize, pgn: u32, source: u8, destination: u8) -> Result<CanFrame, CoreError> {
    let size_bytes = (total_size as u32).to_le_bytes();
    let pgn_bytes = pgn.to_le_bytes();
    let data = [
        etp_cm::EOMA,
        size_bytes[0],
        size_bytes[1],
        size_bytes[2],
        size_bytes[3],
        pgn_bytes[0],
        pgn_bytes[1],
        pgn_bytes[2],
    ];
    build_frame(PGN_ETP_CM, source, destination, data)
}

fn abort_frame(pgn: u32, source: u8, destination: u8, reason: TransportAbortReason) -> Result<CanFrame, CoreError> {
    let pgn_bytes = pgn.to_le_bytes();
    let data = [
        etp_cm::ABORT,
        reason as u8,
        0xFF,
        0xFF,
        0xFF,
        pgn_bytes[0],
        pgn_bytes[1],
        pgn_bytes[2],
    ];
    build_frame(PGN_ETP_CM, source, destination, data)
}

/// Extended Transport Protocol engine. `MAX_BYTES` bounds the
/// per-session reassembly/send buffer; `MAX_SESSIONS` bounds how many
/// transfers run concurrently.
pub struct ExtendedTransport<const MAX_BYTES: usize, const MAX_SESSIONS: usize> {
    sessions: [Session<MAX_BYTES>; MAX_SESSIONS],
}

impl<const MAX_BYTES: usize, const MAX_SESSIONS: usize> Default
    for ExtendedTransport<MAX_BYTES, MAX_SESSIONS>
{
    fn default() -> Self {
        Self::new()
    }
}

impl<const MAX_BYTES: usize, const MAX_SESSIONS: usize> ExtendedTransport<MAX_BYTES, MAX_SESSIONS> {
    const EMPTY_SESSION: Session<MAX_BYTES> = Session::empty();

    pub const fn new() -> Self {
        Self {
            sessions: [Self::EMPTY_SESSION; MAX_SESSIONS],
        }
    }

    fn find_slot(&self, key: EtpSessionKey) -> Option<usize> {
        self.sessions
            .iter()
            .position(|s| s.in_use() && s.key == key)
    }

    fn free_slot(&self) -> Option<usize> {
        self.sessions.iter().position(|s| !s.in_use())
    }

    /// Begin sending `data` (must not fit in classic TP: callers route
    /// payloads > 1785 bytes here). Broadcast destinations are rejected
    /// since ETP is unicast-only.
    pub fn send(
        &mut self,
        pgn: u32,
        data: &[u8],
        source: u8,
        destination: u8,
    ) -> Result<EtpFrames, CoreError> {
        if destination == BROADCAST_ADDRESS {
            return Err(CoreError::InvalidAddress);
        }
        if data.len() > MAX_BYTES || data.len() as u32 > ETP_WIRE_MAX_BYTES {
            return Err(CoreError::PayloadTooLarge);
        }
        let key = EtpSessionKey {
            source,
            destination,
            pgn,
        };
        if self.find_slot(key).is_some() {
            return Err(CoreError::AlreadyInProgress);
        }
        let index = self.free_slot().ok_or(CoreError::AlreadyInProgress)?;
        let total_packets = ((data.len() + 6) / 7) as u32;

        let session = &mut self.sessions[index];
        session.key = key;
        session.direction = Direction::Outbound;
        session.buffer[..data.len()].copy_from_slice(data);
        session.total_size = data.len();
        session.total_packets = total_packets;
        session.next_packet = 1;
        session.window_end = 0;
        session.bytes_transferred = 0;
        session.timer_ms = 0;
        session.state = TpSessionState::WaitForCts;

        let mut frames = EtpFrames::new();
        frames.push(cm_rts(data.len(), pgn, source, destination)?);
        Ok(frames)
    }

    fn emit_window(&mut self, index: usize) -> Result<EtpFrames, CoreError> {
        let mut frames = EtpFrames::new();
        let key = self.sessions[index].key;
        frames.push(cm_dpo(
            (self.sessions[index].window_end - self.sessions[index].next_packet + 1) as u8,
            self.sessions[index].next_packet,
            key.pgn,
            key.source,
            key.destination,
        )?);
        while self.sessions[index].next_packet <= self.sessions[index].window_end {
            let session = &mut self.sessions[index];
            let offset_bytes = session.next_packet.to_le_bytes();
            let start = session.bytes_transferred;
            let end = (start + 7).min(session.total_size);
            let mut data = [0xFFu8; 8];
            data[0] = offset_bytes[0];
            data[1] = offset_bytes[1];
            data[2] = offset_bytes[2];
            data[3..3 + (end - start)].copy_from_slice(&session.buffer[start..end]);
            frames.push(build_frame(PGN_ETP_DT, key.source, key.destination, data)?);
            session.bytes_transferred = end;
            session.next_packet += 1;
        }
        let session = &mut self.sessions[index];
        session.state = if session.next_packet > session.total_packets {
            TpSessionState::WaitForEndOfMsgAck
        } else {
            TpSessionState::WaitForCts
        };
        session.timer_ms = 0;
        Ok(frames)
    }

    pub fn process_frame(&mut self, frame: &CanFrame, local_address: u8) -> (EtpEvent, EtpFrames) {
        let pgn = frame.id.pgn();
        if pgn == PGN_ETP_CM {
            return self.process_cm_frame(frame, local_address);
        }
        if pgn == PGN_ETP_DT {
            return self.process_dt_frame(frame);
        }
        (EtpEvent::Ignored, EtpFrames::new())
    }

    fn process_cm_frame(&mut self, frame: &CanFrame, local_address: u8) -> (EtpEvent, EtpFrames) {
        let data = frame.data;
        let control = data[0];
        let source = frame.id.source_address();
        let pgn = u32::from_le_bytes([data[5], data[6], data[7], 0]);
        let no_frames = EtpFrames::new();

        match control {
            etp_cm::RTS => {
                let key = EtpSessionKey {
                    source,
                    destination: local_address,
                    pgn,
                };
                if self.find_slot(key).is_some() {
                    return (EtpEvent::Ignored, no_frames);
                }
                let Some(index) = self.free_slot() else {
                    return (EtpEvent::Ignored, no_frames);
                };
                let total_size = u32::from_le_bytes([data[1], data[2], data[3], data[4]]) as usize;
                if total_size > MAX_BYTES {
                    return (EtpEvent::Ignored, no_frames);
                }
                let total_packets = ((total_size + 6) / 7) as u32;
                let session = &mut self.sessions[index];
                session.key = key;
                session.direction = Direction::Inbound;
                session.total_size = total_size;
                session.total_packets = total_packets;
                session.next_packet = 1;
                session.bytes_transferred = 0;
                session.timer_ms = 0;
                session.state = TpSessionState::WaitForCts;

                let mut frames = EtpFrames::new();
                let window = total_packets.min(MAX_PACKETS_PER_CTS as u32) as u8;
                if let Ok(f) = cm_cts(window, 1, pgn, local_address, source) {
                    frames.push(f);
                }
                (EtpEvent::Progress, frames)
            }
            etp_cm::CTS => {
                let Some(index) = self.sessions.iter().position(|s| {
                    s.in_use() && s.key.source == local_address && s.key.destination == source
                }) else {
                    return (EtpEvent::Ignored, no_frames);
                };
                let num_packets = data[1];
                if num_packets == 0 {
                    self.sessions[index].timer_ms = 0;
                    return (EtpEvent::Progress, no_frames);
                }
                let next = u32::from_le_bytes([data[2], data[3], data[4], 0]);
                self.sessions[index].next_packet = next;
                self.sessions[index].window_end =
                    (next + num_packets as u32 - 1).min(self.sessions[index].total_packets);
                let frames = self.emit_window(index).unwrap_or_else(|_| EtpFrames::new());
                (EtpEvent::Progress, frames)
            }
            etp_cm::DPO => {
                // Consumed implicitly alongside the CTS that authorized
                // this window on our side; no action needed as a sender.
                (EtpEvent::Progress, no_frames)
            }
            etp_cm::EOMA => {
                let Some(index) = self.sessions.iter().position(|s| {
                    s.in_use() && s.key.source == local_address && s.key.destination == source
                }) else {
                    return (EtpEvent::Ignored, no_frames);
                };
                let key = self.sessions[index].key;
                self.sessions[index].state = TpSessionState::Complete;
                (
                    EtpEvent::MessageComplete {
                        key,
                        len: self.sessions[index].total_size,
                    },
                    no_frames,
                )
            }
            etp_cm::ABORT => {
                let Some(index) = self.sessions.iter().position(|s| {
                    s.in_use()
                        && s.key.pgn == pgn
                        && (s.key.destination == source || s.key.source == source)
                }) else {
                    return (EtpEvent::Ignored, no_frames);
                };
                let key = self.sessions[index].key;
                self.sessions[index].state = TpSessionState::Aborted;
                (
                    EtpEvent::Aborted {
                        key,
                        reason: TransportAbortReason::from_wire(data[1]),
                    },
                    no_frames,
                )
            }
            _ => (EtpEvent::Ignored, no_frames),
        }
    }

    fn process_dt_frame(&mut self, frame: &CanFrame) -> (EtpEvent, EtpFrames) {
        let mut frames = EtpFrames::new();
        let offset = u32::from_le_bytes([frame.data[0], frame.data[1], frame.data[2], 0]);
        let data_source = frame.id.source_address();
        let Some(index) = self.sessions.iter().position(|s| {
            s.in_use()
                && s.direction == Direction::Inbound
                && s.key.source == data_source
                && s.next_packet == offset
        }) else {
            return (EtpEvent::Ignored, frames);
        };
        let session = &mut self.sessions[index];
        let remaining = session.total_size - session.bytes_transferred;
        let take = remaining.min(7);
        session.buffer[session.bytes_transferred..session.bytes_transferred + take]
            .copy_from_slice(&frame.data[3..3 + take]);
        session.bytes_transferred += take;
        session.next_packet += 1;
        session.timer_ms = 0;

        if session.next_packet > session.total_packets {
            let key = session.key;
            let len = session.total_size;
            session.state = TpSessionState::Complete;
            if let Ok(f) = cm_eoma(len, key.pgn, key.destination, key.source) {
                frames.push(f);
            }
            (EtpEvent::MessageComplete { key, len }, frames)
        } else {
            (EtpEvent::Progress, frames)
        }
    }

    /// Copy a completed inbound message's payload out of its session
    /// buffer. Call immediately after receiving `MessageComplete`.
    pub fn take_completed(&mut self, key: EtpSessionKey, out: &mut [u8]) -> Option<usize> {
        let index = self.find_slot(key)?;
        let session = &mut self.sessions[index];
        if session.state != TpSessionState::Complete {
            return None;
        }
        let len = session.total_size.min(out.len());
        out[..len].copy_from_slice(&session.buffer[..len]);
        session.state = TpSessionState::Idle;
        Some(len)
    }

    /// Host-initiated cancellation. Emits an ABORT frame and frees the
    /// slot. A no-op if `key` names no live session.
    pub fn abort_session(&mut self, key: EtpSessionKey, reason: TransportAbortReason) -> Option<CanFrame> {
        let index = self.find_slot(key)?;
        let direction = self.sessions[index].direction;
        self.sessions[index].state = TpSessionState::Aborted;
        let (from, to) = match direction {
            Direction::Outbound => (key.source, key.destination),
            Direction::Inbound => (key.destination, key.source),
        };
        abort_frame(key.pgn, from, to, reason).ok()
    }

    pub fn update_sessions(&mut self, elapsed_ms: u32) -> EtpFrames {
        let mut frames = EtpFrames::new();
        for index in 0..MAX_SESSIONS {
            if !self.sessions[index].in_use() || !self.sessions[index].state.is_active() {
                continue;
            }
            self.sessions[index].timer_ms += elapsed_ms;
            let (direction, state) = {
                let s = &self.sessions[index];
                (s.direction, s.state)
            };
            let timeout = match (direction, state) {
                (Direction::Outbound, TpSessionState::WaitForCts)
                | (Direction::Outbound, TpSessionState::WaitForEndOfMsgAck) => {
                    Some(TP_TIMEOUT_T3_MS)
                }
                (Direction::Outbound, TpSessionState::Sending) => Some(TP_TIMEOUT_T4_MS),
                (Direction::Inbound, _) => Some(TP_TIMEOUT_T1_MS),
                _ => None,
            };
            if let Some(limit) = timeout {
                if self.sessions[index].timer_ms > limit {
                    let key = self.sessions[index].key;
                    self.sessions[index].state = TpSessionState::TimedOut;
                    let (from, to) = match direction {
                        Direction::Outbound => (key.source, key.destination),
                        Direction::Inbound => (key.destination, key.source),
                    };
                    if let Ok(f) = abort_frame(key.pgn, from, to, TransportAbortReason::Timeout) {
                        frames.push(f);
                    }
                }
            }
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::BROADCAST_ADDRESS;

    type Etp = ExtendedTransport<4096, 2>;

    #[test]
    fn rejects_broadcast_destination() {
        let mut etp = Etp::new();
        let data = [0u8; 2000];
        assert!(matches!(
            etp.send(0xFF00, &data, 10, BROADCAST_ADDRESS),
            Err(CoreError::InvalidAddress)
        ));
    }

    #[test]
    fn rejects_payload_over_buffer_capacity() {
        let mut etp = Etp::new();
        let data = [0u8; 5000];
        assert!(matches!(
            etp.send(0xFF00, &data, 10, 20),
            Err(CoreError::PayloadTooLarge)
        ));
    }

    #[test]
    fn rts_then_cts_streams_a_window() {
        let mut etp = Etp::new();
        let data = [7u8; 2000];
        let rts = etp.send(0xFF00, &data, 10, 20).unwrap();
        assert_eq!(rts.len(), 1);
        assert_eq!(rts.iter().next().unwrap().data[0], etp_cm::RTS);

        let cts = CanFrame {
            id: CanId::builder(PGN_ETP_CM, 20).to_destination(10).build().unwrap(),
            data: [etp_cm::CTS, 16, 1, 0, 0, 0, 0xFF, 0],
            len: 8,
        };
        let (event, window) = etp.process_frame(&cts, 10);
        match event {
            EtpEvent::Progress => {}
            _ => panic!("expected progress"),
        }
        assert!(window.len() >= 1);
    }

    #[test]
    fn unicast_timeout_emits_abort() {
        let mut etp = Etp::new();
        let data = [1u8; 2000];
        etp.send(0xFF00, &data, 10, 20).unwrap();

        let before = etp.update_sessions(TP_TIMEOUT_T3_MS - 1);
        assert!(before.is_empty());
        let after = etp.update_sessions(2);
        assert_eq!(after.len(), 1);
        assert_eq!(after.iter().next().unwrap().data[0], etp_cm::ABORT);
    }

    #[test]
    fn abort_session_emits_abort_and_frees_slot() {
        let mut etp = Etp::new();
        let data = [1u8; 2000];
        etp.send(0xFF00, &data, 10, 20).unwrap();
        let key = EtpSessionKey {
            source: 10,
            destination: 20,
            pgn: 0xFF00,
        };
        let frame = etp
            .abort_session(key, TransportAbortReason::NoResources)
            .expect("unicast session aborts with a frame");
        assert_eq!(frame.data[0], etp_cm::ABORT);
        assert!(etp.find_slot(key).is_none());
    }
}
