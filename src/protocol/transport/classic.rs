//! Classic Transport Protocol (ISO 11783-3 / SAE J1939-21): broadcast
//! (BAM) and connection-mode (RTS/CTS/EOMA) segmentation of payloads
//! between 9 and 1785 bytes. Control traffic rides PGN 0xEC00, data
//! frames ride PGN 0xEB00.
//!
//! Driven through a synchronous `send`/`process_frame`/`update_sessions`
//! API; the session-pool and frame-iterator shapes follow
//! [`fast_packet`](super::fast_packet).
use crate::core::{BROADCAST_ADDRESS, PGN_TP_CM, PGN_TP_DT, PRIORITY_NETWORK_MANAGEMENT};
use crate::error::{CoreError, TransportAbortReason};
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::can_id::CanId;

/// Largest payload classic TP can carry (255 packets * 7 bytes).
pub const TP_MAX_DATA_LENGTH: usize = 1785;
/// Maximum number of data packets released per CTS window.
pub const MAX_PACKETS_PER_CTS: u8 = 16;
/// Number of sessions tracked concurrently (independent of direction).
pub const MAX_TP_SESSIONS: usize = 4;

pub mod tp_cm {
    pub const RTS: u8 = 0x10;
    pub const CTS: u8 = 0x11;
    pub const EOMA: u8 = 0x13;
    pub const BAM: u8 = 0x20;
    pub const ABORT: u8 = 0xFF;
}

pub const BAM_INTERVAL_MS: u32 = 50;
/// Receiver: maximum gap between two consecutive data frames.
pub const TP_TIMEOUT_T1_MS: u32 = 750;
/// Receiver: maximum wait for the first data frame after sending CTS.
pub const TP_TIMEOUT_T2_MS: u32 = 1250;
/// Sender: maximum wait for a response to RTS/EOMA.
pub const TP_TIMEOUT_T3_MS: u32 = 1250;
/// Sender: maximum time spent transmitting one CTS window.
pub const TP_TIMEOUT_T4_MS: u32 = 1050;
/// Receiver hold: interval between keepalive CTS(0) frames while paused.
pub const TP_T_HOLD_MS: u32 = 500;

/// Session lifecycle, given explicit discriminants so sessions can be
/// constructed by value in tests and logged as a plain number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum TpSessionState {
    Idle = 0,
    WaitForCts = 1,
    Sending = 2,
    WaitForEndOfMsgAck = 3,
    Complete = 4,
    Aborted = 5,
    TimedOut = 6,
}

impl TpSessionState {
    /// Only these states accumulate elapsed time toward a timeout.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::WaitForCts | Self::Sending | Self::WaitForEndOfMsgAck
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub source: u8,
    pub destination: u8,
    pub pgn: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Outbound,
    Inbound,
}

struct Session {
    key: SessionKey,
    state: TpSessionState,
    direction: Direction,
    is_broadcast: bool,
    buffer: [u8; TP_MAX_DATA_LENGTH],
    total_size: usize,
    total_packets: u8,
    /// Outbound: next packet index to send within the current window.
    /// Inbound: last packet sequence number received.
    packet_cursor: u8,
    bytes_transferred: usize,
    timer_ms: u32,
    paused: bool,
    hold_timer_ms: u32,
}

impl Session {
    const fn empty() -> Self {
        Self {
            key: SessionKey {
                source: 0,
                destination: 0,
                pgn: 0,
            },
            state: TpSessionState::Idle,
            direction: Direction::Outbound,
            is_broadcast: false,
            buffer: [0; TP_MAX_DATA_LENGTH],
            total_size: 0,
            total_packets: 0,
            packet_cursor: 0,
            bytes_transferred: 0,
            timer_ms: 0,
            paused: false,
            hold_timer_ms: 0,
        }
    }

    fn in_use(&self) -> bool {
        self.state != TpSessionState::Idle
    }
}

/// Result of processing one inbound classic TP frame.
pub enum TpEvent {
    /// Frame consumed, nothing external to report yet.
    Progress,
    /// The frame was not part of any tracked session.
    Ignored,
    /// A broadcast or connection-mode message finished reassembling.
    MessageComplete { key: SessionKey, len: usize },
    /// A session was aborted (by us or the peer).
    Aborted {
        key: SessionKey,
        reason: TransportAbortReason,
    },
}

/// Fixed-capacity frame batch an engine call can produce (CTS windows
/// can legitimately span up to `MAX_PACKETS_PER_CTS` data frames).
pub struct TpFrames {
    frames: [Option<CanFrame>; MAX_PACKETS_PER_CTS as usize + 1],
    len: usize,
}

impl TpFrames {
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

/// Events discovered while driving session timers in [`ClassicTransport::update_sessions`],
/// as opposed to the events `process_frame` returns synchronously. Currently
/// the only case is an outbound broadcast finishing its last BAM data frame
/// on a timer tick; every connection-mode completion is instead reported
/// synchronously (CTS/EOMA arrive as frames, not timeouts).
pub struct TpCompletions {
    events: [Option<TpEvent>; MAX_TP_SESSIONS],
    len: usize,
}

impl TpCompletions {
    fn new() -> Self {
        const NONE: Option<TpEvent> = None;
        Self {
            events: [NONE; MAX_TP_SESSIONS],
            len: 0,
        }
    }

    fn push(&mut self, event: TpEvent) {
        if self.len < self.events.len() {
            self.events[self.len] = Some(event);
            self.len += 1;
        }
    }

    pub fn into_iter(self) -> impl Iterator<Item = TpEvent> {
        self.events.into_iter().flatten()
    }
}

fn build_frame(
    pgn: u32,
    source: u8,
    destination: Option<u8>,
    data: [u8; 8],
) -> Result<CanFrame, CoreError> {
    let mut builder = CanId::builder(pgn, source).with_priority(PRIORITY_NETWORK_MANAGEMENT);
    if let Some(dest) = destination {
        builder = builder.to_destination(dest);
    }
    let id = builder.build()?;
    Ok(CanFrame {
        id,
        data,
        len: 8,
    })
}

fn cm_frame(
    control: u8,
    total_size: usize,
    total_packets: u8,
    extra: u8,
    pgn: u32,
    source: u8,
    destination: u8,
) -> Result<CanFrame, CoreError> {
    let size_bytes = (total_size as u16).to_le_bytes();
    let pgn_bytes = pgn.to_le_bytes();
    let data = [
        control,
        size_bytes[0],
        size_bytes[1],
        total_packets,
        extra,
        pgn_bytes[0],
        pgn_bytes[1],
        pgn_bytes[2],
    ];
    build_frame(PGN_TP_CM, source, Some(destination), data)
}

fn cts_frame(
    num_packets: u8,
    next_seq: u8,
    pgn: u32,
    source: u8,
    destination: u8,
) -> Result<CanFrame, CoreError> {
    let pgn_bytes = pgn.to_le_bytes();
    let data = [
        tp_cm::CTS,
        num_packets,
        next_seq,
        0xFF,
        0xFF,
        pgn_bytes[0],
        pgn_bytes[1],
        pgn_bytes[2],
    ];
    build_frame(PGN_TP_CM, source, Some(destination), data)
}

fn abort_frame(pgn: u32, source: u8, destination: u8, reason: TransportAbortReason) -> Result<CanFrame, CoreError> {
    let pgn_bytes = pgn.to_le_bytes();
    let data = [
        tp_cm::ABORT,
        reason as u8,
        0xFF,
        0xFF,
        0xFF,
        pgn_bytes[0],
        pgn_bytes[1],
        pgn_bytes[2],
    ];
    build_frame(PGN_TP_CM, source, Some(destination), data)
}

/// Classic Transport Protocol engine: owns a fixed pool of sessions and
/// is driven entirely by `send`, `process_frame`, and `update_sessions`.
/// No two calls may interleave from different threads — the crate has
/// no internal locking, matching the single-threaded cooperative model
/// the whole stack relies on.
pub struct ClassicTransport {
    sessions: [Session; MAX_TP_SESSIONS],
}

impl Default for ClassicTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassicTransport {
    pub const fn new() -> Self {
        const EMPTY: Session = Session::empty();
        Self {
            sessions: [EMPTY; MAX_TP_SESSIONS],
        }
    }

    fn find_slot(&self, key: SessionKey) -> Option<usize> {
        self.sessions
            .iter()
            .position(|s| s.in_use() && s.key == key)
    }

    fn free_slot(&self) -> Option<usize> {
        self.sessions.iter().position(|s| !s.in_use())
    }

    /// Begin sending `data` as a classic TP message. `destination ==
    /// BROADCAST_ADDRESS` selects BAM; anything else selects RTS/CTS.
    /// Rejects payloads that fit in a single frame or exceed
    /// `TP_MAX_DATA_LENGTH`, and rejects a second session for a key
    /// already in flight.
    pub fn send(
        &mut self,
        pgn: u32,
        data: &[u8],
        source: u8,
        destination: u8,
    ) -> Result<TpFrames, CoreError> {
        if data.len() <= 8 {
            return Err(CoreError::PayloadTooLarge);
        }
        if data.len() > TP_MAX_DATA_LENGTH {
            return Err(CoreError::PayloadTooLarge);
        }
        let key = SessionKey {
            source,
            destination,
            pgn,
        };
        if self.find_slot(key).is_some() {
            return Err(CoreError::AlreadyInProgress);
        }
        let index = self.free_slot().ok_or(CoreError::AlreadyInProgress)?;
        let total_packets = ((data.len() + 6) / 7) as u8;
        let is_broadcast = destination == BROADCAST_ADDRESS;

        let session = &mut self.sessions[index];
        session.key = key;
        session.direction = Direction::Outbound;
        session.is_broadcast = is_broadcast;
        session.buffer[..data.len()].copy_from_slice(data);
        session.total_size = data.len();
        session.total_packets = total_packets;
        session.packet_cursor = 1;
        session.bytes_transferred = 0;
        session.timer_ms = 0;
        session.paused = false;

        let mut frames = TpFrames::new();
        if is_broadcast {
            session.state = TpSessionState::Sending;
            frames.push(cm_frame(
                tp_cm::BAM,
                session.total_size,
                total_packets,
                0xFF,
                pgn,
                source,
                destination,
            )?);
        } else {
            session.state = TpSessionState::WaitForCts;
            frames.push(cm_frame(
                tp_cm::RTS,
                session.total_size,
                total_packets,
                MAX_PACKETS_PER_CTS,
                pgn,
                source,
                destination,
            )?);
        }
        Ok(frames)
    }

    fn emit_data_frames(&mut self, index: usize, count: u8) -> Result<TpFrames, CoreError> {
        let mut frames = TpFrames::new();
        let (key, total_packets) = {
            let s = &self.sessions[index];
            (s.key, s.total_packets)
        };
        for _ in 0..count {
            let session = &mut self.sessions[index];
            if session.packet_cursor > total_packets {
                break;
            }
            let seq = session.packet_cursor;
            let start = session.bytes_transferred;
            let end = (start + 7).min(session.total_size);
            let mut data = [0xFFu8; 8];
            data[0] = seq;
            data[1..1 + (end - start)].copy_from_slice(&session.buffer[start..end]);
            frames.push(build_frame(PGN_TP_DT, key.source, Some(key.destination), data)?);
            session.bytes_transferred = end;
            session.packet_cursor += 1;
        }
        let session = &mut self.sessions[index];
        if session.is_broadcast && session.packet_cursor > total_packets {
            session.state = TpSessionState::Complete;
        } else if !session.is_broadcast && session.packet_cursor > total_packets {
            session.state = TpSessionState::WaitForEndOfMsgAck;
        }
        session.timer_ms = 0;
        Ok(frames)
    }

    /// Process one inbound frame addressed to `local_address` (either
    /// the PGN 0xEC00 connection-management PGN or the PGN 0xEB00 data
    /// PGN).
    pub fn process_frame(&mut self, frame: &CanFrame, local_address: u8) -> (TpEvent, TpFrames) {
        let pgn = frame.id.pgn();
        if pgn == PGN_TP_CM {
            return self.process_cm_frame(frame, local_address);
        }
        if pgn == PGN_TP_DT {
            return self.process_dt_frame(frame);
        }
        (TpEvent::Ignored, TpFrames::new())
    }

    fn process_cm_frame(&mut self, frame: &CanFrame, local_address: u8) -> (TpEvent, TpFrames) {
        let data = frame.data;
        let control = data[0];
        let source = frame.id.source_address();
        let pgn = u32::from_le_bytes([data[5], data[6], data[7], 0]);
        let no_frames = TpFrames::new();

        match control {
            tp_cm::BAM | tp_cm::RTS => {
                let destination = if control == tp_cm::BAM {
                    BROADCAST_ADDRESS
                } else {
                    local_address
                };
                let key = SessionKey {
                    source,
                    destination,
                    pgn,
                };
                if self.find_slot(key).is_some() {
                    return (TpEvent::Ignored, no_frames);
                }
                let Some(index) = self.free_slot() else {
                    return (TpEvent::Ignored, no_frames);
                };
                let total_size = u16::from_le_bytes([data[1], data[2]]) as usize;
                let total_packets = data[3];
                let session = &mut self.sessions[index];
                session.key = key;
                session.direction = Direction::Inbound;
                session.is_broadcast = control == tp_cm::BAM;
                session.total_size = total_size;
                session.total_packets = total_packets;
                session.packet_cursor = 0;
                session.bytes_transferred = 0;
                session.timer_ms = 0;
                session.state = TpSessionState::Sending;

                let mut frames = TpFrames::new();
                if control == tp_cm::RTS {
                    let window = total_packets.min(MAX_PACKETS_PER_CTS);
                    if let Ok(f) = cts_frame(window, 1, pgn, local_address, source) {
                        frames.push(f);
                    }
                }
                (TpEvent::Progress, frames)
            }
            tp_cm::CTS => {
                let key_source = local_address;
                let destination = source;
                let Some(index) = self.sessions.iter().position(|s| {
                    s.in_use() && s.key.source == key_source && s.key.destination == destination
                }) else {
                    return (TpEvent::Ignored, no_frames);
                };
                let num_packets = data[1];
                if num_packets == 0 {
                    // Keepalive hold: stay in WaitForCts, reset T3.
                    self.sessions[index].timer_ms = 0;
                    return (TpEvent::Progress, no_frames);
                }
                let next_seq = data[2];
                self.sessions[index].packet_cursor = next_seq;
                self.sessions[index].state = TpSessionState::Sending;
                let count = num_packets.min(MAX_PACKETS_PER_CTS);
                let frames = self.emit_data_frames(index, count).unwrap_or_else(|_| TpFrames::new());
                (TpEvent::Progress, frames)
            }
            tp_cm::EOMA => {
                let key_source = local_address;
                let destination = source;
                let Some(index) = self.sessions.iter().position(|s| {
                    s.in_use() && s.key.source == key_source && s.key.destination == destination
                }) else {
                    return (TpEvent::Ignored, no_frames);
                };
                let key = self.sessions[index].key;
                self.sessions[index].state = TpSessionState::Complete;
                (
                    TpEvent::MessageComplete {
                        key,
                        len: self.sessions[index].total_size,
                    },
                    no_frames,
                )
            }
            tp_cm::ABORT => {
                let Some(index) = self.sessions.iter().position(|s| {
                    s.in_use()
                        && (s.key.source == source || s.key.destination == source)
                        && s.key.pgn == pgn
                }) else {
                    return (TpEvent::Ignored, no_frames);
                };
                let key = self.sessions[index].key;
                self.sessions[index].state = TpSessionState::Aborted;
                (
                    TpEvent::Aborted {
                        key,
                        reason: TransportAbortReason::from_wire(data[1]),
                    },
                    no_frames,
                )
            }
            _ => (TpEvent::Ignored, no_frames),
        }
    }

    fn process_dt_frame(&mut self, frame: &CanFrame) -> (TpEvent, TpFrames) {
        let mut frames = TpFrames::new();
        let seq = frame.data[0];
        let data_source = frame.id.source_address();
        let Some(index) = self.sessions.iter().position(|s| {
            s.in_use()
                && s.direction == Direction::Inbound
                && s.key.source == data_source
                && s.packet_cursor.wrapping_add(1) == seq
        }) else {
            return (TpEvent::Ignored, frames);
        };
        let session = &mut self.sessions[index];
        let remaining = session.total_size - session.bytes_transferred;
        let take = remaining.min(7);
        session.buffer[session.bytes_transferred..session.bytes_transferred + take]
            .copy_from_slice(&frame.data[1..1 + take]);
        session.bytes_transferred += take;
        session.packet_cursor = seq;
        session.timer_ms = 0;

        if session.packet_cursor >= session.total_packets {
            let key = session.key;
            let len = session.total_size;
            let is_broadcast = session.is_broadcast;
            session.state = TpSessionState::Complete;
            if !is_broadcast {
                if let Ok(f) = cm_frame(tp_cm::EOMA, len, session.total_packets, 0xFF, key.pgn, key.destination, key.source) {
                    frames.push(f);
                }
            }
            return (TpEvent::MessageComplete { key, len }, frames);
        }
        (TpEvent::Progress, frames)
    }

    /// Copy a completed inbound message's payload out of its session
    /// buffer. Call immediately after receiving `MessageComplete`.
    pub fn take_completed(&mut self, key: SessionKey, out: &mut [u8]) -> Option<usize> {
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

    /// Drive every session's timer by `elapsed_ms`, emitting continuation
    /// frames (CTS-driven data windows), keepalive holds, and abort
    /// frames for timed-out unicast sessions. BAM has no acknowledgement,
    /// so a broadcast session simply completes once its last data frame
    /// has gone out. The second return value carries completion events
    /// discovered this tick (an outbound broadcast finishing its last
    /// data frame); every other completion is reported synchronously
    /// from `process_frame` instead.
    pub fn update_sessions(&mut self, elapsed_ms: u32) -> (TpFrames, TpCompletions) {
        let mut frames = TpFrames::new();
        let mut completions = TpCompletions::new();
        for index in 0..MAX_TP_SESSIONS {
            if !self.sessions[index].in_use() || !self.sessions[index].state.is_active() {
                continue;
            }
            self.sessions[index].timer_ms += elapsed_ms;

            if self.sessions[index].paused {
                self.sessions[index].hold_timer_ms += elapsed_ms;
                if self.sessions[index].hold_timer_ms >= TP_T_HOLD_MS {
                    self.sessions[index].hold_timer_ms = 0;
                    let key = self.sessions[index].key;
                    if let Ok(f) = cts_frame(0, 0, key.pgn, key.destination, key.source) {
                        frames.push(f);
                    }
                }
                continue;
            }

            let (direction, is_broadcast, state) = {
                let s = &self.sessions[index];
                (s.direction, s.is_broadcast, s.state)
            };

            let timeout = match (direction, state) {
                (Direction::Outbound, TpSessionState::WaitForCts)
                | (Direction::Outbound, TpSessionState::WaitForEndOfMsgAck) => {
                    Some(TP_TIMEOUT_T3_MS)
                }
                (Direction::Outbound, TpSessionState::Sending) => Some(TP_TIMEOUT_T4_MS),
                (Direction::Inbound, _) => {
                    // T2 covers only the gap between sending our CTS and the
                    // first data frame of a connection-mode transfer; every
                    // later gap (and BAM, which never sends a CTS) uses T1.
                    if !is_broadcast && self.sessions[index].bytes_transferred == 0 {
                        Some(TP_TIMEOUT_T2_MS)
                    } else {
                        Some(TP_TIMEOUT_T1_MS)
                    }
                }
                _ => None,
            };

            if direction == Direction::Outbound && state == TpSessionState::Sending && is_broadcast {
                if self.sessions[index].timer_ms >= BAM_INTERVAL_MS {
                    self.sessions[index].timer_ms = 0;
                    if let Ok(batch) = self.emit_data_frames(index, 1) {
                        for f in batch.iter() {
                            frames.push(f.clone());
                        }
                    }
                    if self.sessions[index].state == TpSessionState::Complete {
                        let key = self.sessions[index].key;
                        let len = self.sessions[index].total_size;
                        completions.push(TpEvent::MessageComplete { key, len });
                    }
                }
                continue;
            }

            if let Some(limit) = timeout {
                if self.sessions[index].timer_ms > limit {
                    let key = self.sessions[index].key;
                    self.sessions[index].state = TpSessionState::TimedOut;
                    if !is_broadcast {
                        let (from, to) = match direction {
                            Direction::Outbound => (key.source, key.destination),
                            Direction::Inbound => (key.destination, key.source),
                        };
                        if let Ok(f) =
                            abort_frame(key.pgn, from, to, TransportAbortReason::Timeout)
                        {
                            frames.push(f);
                        }
                    }
                }
            }
        }
        (frames, completions)
    }

    /// Host-initiated cancellation. Emits an ABORT frame for unicast
    /// sessions (broadcast sessions simply stop, matching BAM semantics)
    /// and frees the slot. A no-op if `key` names no live session.
    pub fn abort_session(&mut self, key: SessionKey, reason: TransportAbortReason) -> Option<CanFrame> {
        let index = self.find_slot(key)?;
        let (direction, is_broadcast) = {
            let s = &self.sessions[index];
            (s.direction, s.is_broadcast)
        };
        self.sessions[index].state = TpSessionState::Aborted;
        if is_broadcast {
            return None;
        }
        let (from, to) = match direction {
            Direction::Outbound => (key.source, key.destination),
            Direction::Inbound => (key.destination, key.source),
        };
        abort_frame(key.pgn, from, to, reason).ok()
    }

    /// Mark an inbound connection-mode session as paused; `update_sessions`
    /// will start emitting keepalive CTS-hold frames for it every
    /// `TP_T_HOLD_MS`.
    pub fn set_receiver_paused(&mut self, source: u8, destination: u8, pgn: u32) {
        if let Some(index) = self.sessions.iter().position(|s| {
            s.in_use()
                && s.key.source == source
                && s.key.destination == destination
                && s.key.pgn == pgn
        }) {
            self.sessions[index].paused = true;
            self.sessions[index].hold_timer_ms = 0;
        }
    }
}
