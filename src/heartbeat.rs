//! J1939-73 heartbeat (PGN 0xFEBF): a one-byte rolling sequence number
//! each control function broadcasts periodically so peers can detect a
//! silently hung or restarted node faster than any application-layer
//! timeout would.
//!
//! A producer advances a sequence counter through its rollover and two
//! one-shot sentinel values; a consumer watches for gaps, silence, and
//! the reserved sentinels, both driven synchronously by the caller.
use crate::core::PGN_HEARTBEAT;

/// One-shot sentinel the producer may inject instead of the next
/// sequence number to announce an internal error condition.
pub const SEQUENCE_ERROR_INDICATION: u8 = 254;
/// One-shot sentinel announcing an imminent controlled shutdown.
pub const SEQUENCE_SHUTDOWN_INDICATION: u8 = 255;
/// First value a producer sends after a (re)start or explicit reset.
pub const SEQUENCE_INITIAL: u8 = 251;
/// Highest value of the rolling 0..=250 cycle before wraparound.
pub const SEQUENCE_MAX: u8 = 250;

/// Producer-side interval between heartbeat transmissions (ms).
pub const HEARTBEAT_TRANSMIT_INTERVAL_MS: u32 = 100;
/// Consumer-side silence budget before declaring a communication fault.
pub const HEARTBEAT_COMM_TIMEOUT_MS: u32 = 300;
/// Consecutive correctly-sequenced messages required to clear a fault.
pub const HEARTBEAT_RECOVERY_COUNT: u8 = 8;
/// A jump larger than this many steps is treated as a sequence error
/// rather than ordinary rollover.
pub const MAX_SEQUENCE_JUMP: u8 = 3;

/// Advances the rolling 0..=250 heartbeat counter, with the two
/// one-shot sentinel injections the standard reserves for error and
/// shutdown announcements.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatProducer {
    sequence: u8,
    started: bool,
    pending_sentinel: Option<u8>,
    timer_ms: u32,
}

impl Default for HeartbeatProducer {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatProducer {
    pub const fn new() -> Self {
        Self {
            sequence: SEQUENCE_INITIAL,
            started: false,
            pending_sentinel: None,
            timer_ms: 0,
        }
    }

    /// Queue a one-shot error-indication sentinel (254) to replace the
    /// next regularly scheduled transmission.
    pub fn signal_error(&mut self) {
        self.pending_sentinel = Some(SEQUENCE_ERROR_INDICATION);
    }

    /// Queue a one-shot shutdown-indication sentinel (255).
    pub fn signal_shutdown(&mut self) {
        self.pending_sentinel = Some(SEQUENCE_SHUTDOWN_INDICATION);
    }

    /// Current sequence value without advancing anything.
    pub fn current(&self) -> u8 {
        self.sequence
    }

    /// Force the cycle back to its initial state; the next emission is
    /// 251, as on a fresh start.
    pub fn reset(&mut self) {
        self.sequence = SEQUENCE_INITIAL;
        self.started = false;
        self.pending_sentinel = None;
    }

    fn advance(&mut self) -> u8 {
        if let Some(sentinel) = self.pending_sentinel.take() {
            return sentinel;
        }
        let value = if !self.started {
            self.started = true;
            SEQUENCE_INITIAL
        } else if self.sequence == SEQUENCE_INITIAL || self.sequence >= SEQUENCE_MAX {
            0
        } else {
            self.sequence + 1
        };
        self.sequence = value;
        value
    }

    /// Drive the transmit timer; returns the heartbeat data byte to
    /// send when an interval elapses.
    pub fn update(&mut self, elapsed_ms: u32) -> Option<u8> {
        self.timer_ms += elapsed_ms;
        if self.timer_ms < HEARTBEAT_TRANSMIT_INTERVAL_MS {
            return None;
        }
        self.timer_ms -= HEARTBEAT_TRANSMIT_INTERVAL_MS;
        Some(self.advance())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HeartbeatHealth {
    /// No message observed yet, or currently within the recovery window.
    Unknown,
    Ok,
    /// Sequence jumped by more than `MAX_SEQUENCE_JUMP`, repeated, or a
    /// sender-error/shutdown sentinel was seen.
    SequenceError,
    /// No message received within `HEARTBEAT_COMM_TIMEOUT_MS`.
    CommError,
}

/// Result of feeding one observed sequence byte to a
/// [`HeartbeatConsumer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HeartbeatEvent {
    /// Ordinary in-sequence message (or the first message ever seen).
    Recorded,
    /// 252/253 carry no meaning and are dropped without affecting health.
    Ignored,
    /// 251 observed: the peer (re)started. Last sequence resyncs to 251.
    ResetReceived,
    /// 254 observed: the peer signalled an internal error condition.
    SenderError,
    /// 255 observed: the peer signalled an imminent shutdown.
    ShutdownReceived,
    /// A repeated sequence or a jump greater than `MAX_SEQUENCE_JUMP`.
    SequenceError,
}

/// Tracks one peer's heartbeat stream and classifies its health.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatConsumer {
    last_sequence: Option<u8>,
    health: HeartbeatHealth,
    consecutive_good: u8,
    silence_ms: u32,
}

impl Default for HeartbeatConsumer {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatConsumer {
    pub const fn new() -> Self {
        Self {
            last_sequence: None,
            health: HeartbeatHealth::Unknown,
            consecutive_good: 0,
            silence_ms: 0,
        }
    }

    pub fn health(&self) -> HeartbeatHealth {
        self.health
    }

    fn mark_good(&mut self, sequence: u8) {
        self.last_sequence = Some(sequence);
        self.consecutive_good = self.consecutive_good.saturating_add(1);
        if self.health != HeartbeatHealth::Ok && self.consecutive_good >= HEARTBEAT_RECOVERY_COUNT {
            self.health = HeartbeatHealth::Ok;
        }
    }

    fn mark_error(&mut self) {
        self.consecutive_good = 0;
        self.health = HeartbeatHealth::SequenceError;
    }

    /// Feed the next observed sequence byte.
    pub fn observe(&mut self, sequence: u8) -> HeartbeatEvent {
        self.silence_ms = 0;

        match sequence {
            252 | 253 => return HeartbeatEvent::Ignored,
            SEQUENCE_INITIAL => {
                self.last_sequence = Some(SEQUENCE_INITIAL);
                return HeartbeatEvent::ResetReceived;
            }
            SEQUENCE_ERROR_INDICATION => {
                self.mark_error();
                return HeartbeatEvent::SenderError;
            }
            SEQUENCE_SHUTDOWN_INDICATION => {
                self.mark_error();
                return HeartbeatEvent::ShutdownReceived;
            }
            _ => {}
        }

        let ok = match self.last_sequence {
            None => true,
            Some(last) if last == SEQUENCE_INITIAL => sequence == 0,
            Some(last) => {
                let jump = if sequence > last {
                    sequence - last
                } else {
                    (SEQUENCE_MAX as u16 + 1 - last as u16) as u8 + sequence
                };
                jump > 0 && jump <= MAX_SEQUENCE_JUMP
            }
        };

        if ok {
            self.mark_good(sequence);
            HeartbeatEvent::Recorded
        } else {
            self.mark_error();
            self.last_sequence = Some(sequence);
            HeartbeatEvent::SequenceError
        }
    }

    /// Drive the silence timer; transitions to `CommError` once the
    /// peer has been quiet for longer than the comm timeout. Any
    /// subsequent valid message clears it back through the normal
    /// recovery path.
    pub fn update(&mut self, elapsed_ms: u32) -> HeartbeatHealth {
        self.silence_ms += elapsed_ms;
        if self.silence_ms > HEARTBEAT_COMM_TIMEOUT_MS {
            self.consecutive_good = 0;
            self.health = HeartbeatHealth::CommError;
        }
        self.health
    }
}

/// PGN carried by every heartbeat frame.
pub const fn pgn() -> u32 {
    PGN_HEARTBEAT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn producer_starts_at_sentinel_then_rolls_over() {
        let mut p = HeartbeatProducer::new();
        assert_eq!(p.update(100), Some(SEQUENCE_INITIAL));
        assert_eq!(p.update(100), Some(0));
        assert_eq!(p.update(100), Some(1));
    }

    #[test]
    fn producer_wraps_at_250() {
        let mut p = HeartbeatProducer::new();
        p.update(100); // 251
        for expected in 0..=SEQUENCE_MAX {
            assert_eq!(p.update(100), Some(expected));
        }
        assert_eq!(p.update(100), Some(0));
    }

    #[test]
    fn producer_injects_one_shot_sentinel_then_resumes() {
        let mut p = HeartbeatProducer::new();
        p.update(100); // consume INIT
        p.signal_error();
        assert_eq!(p.update(100), Some(SEQUENCE_ERROR_INDICATION));
        // resumes the normal cycle from where it was, not from 0
        assert_eq!(p.update(100), Some(0));
    }

    #[test]
    fn consumer_accepts_first_message_unconditionally() {
        let mut c = HeartbeatConsumer::new();
        assert_eq!(c.observe(10), HeartbeatEvent::Recorded);
        assert_eq!(c.health(), HeartbeatHealth::Unknown);
    }

    #[test]
    fn consumer_recovers_after_eight_consecutive_good() {
        let mut c = HeartbeatConsumer::new();
        c.observe(SEQUENCE_INITIAL);
        let mut seq = 0u8;
        for _ in 0..HEARTBEAT_RECOVERY_COUNT {
            c.observe(seq);
            seq += 1;
        }
        assert_eq!(c.health(), HeartbeatHealth::Ok);
    }

    #[test]
    fn consumer_flags_sequence_error_on_jump_of_four_but_accepts_three() {
        let mut c = HeartbeatConsumer::new();
        c.observe(10);
        assert_eq!(c.observe(13), HeartbeatEvent::Recorded);
        c.observe(16);
        assert_eq!(c.observe(20), HeartbeatEvent::SequenceError);
    }

    #[test]
    fn consumer_rollover_jump_of_five_is_an_error() {
        let mut c = HeartbeatConsumer::new();
        c.observe(246);
        assert_eq!(c.observe(0), HeartbeatEvent::SequenceError);
    }

    #[test]
    fn consumer_rollover_jump_of_two_is_accepted() {
        let mut c = HeartbeatConsumer::new();
        c.observe(249);
        assert_eq!(c.observe(0), HeartbeatEvent::Recorded);
    }

    #[test]
    fn consumer_flags_comm_error_on_silence() {
        let mut c = HeartbeatConsumer::new();
        c.observe(10);
        assert_eq!(c.update(HEARTBEAT_COMM_TIMEOUT_MS + 1), HeartbeatHealth::CommError);
    }

    #[test]
    fn consumer_repeated_sequence_is_an_error() {
        let mut c = HeartbeatConsumer::new();
        c.observe(10);
        assert_eq!(c.observe(10), HeartbeatEvent::SequenceError);
    }

    #[test]
    fn consumer_ignores_reserved_252_253() {
        let mut c = HeartbeatConsumer::new();
        c.observe(10);
        assert_eq!(c.observe(252), HeartbeatEvent::Ignored);
        assert_eq!(c.observe(253), HeartbeatEvent::Ignored);
        assert_eq!(c.health(), HeartbeatHealth::Unknown);
    }

    #[test]
    fn consumer_sentinels_report_distinct_events() {
        let mut c = HeartbeatConsumer::new();
        assert_eq!(c.observe(SEQUENCE_INITIAL), HeartbeatEvent::ResetReceived);
        assert_eq!(c.observe(SEQUENCE_ERROR_INDICATION), HeartbeatEvent::SenderError);
        assert_eq!(
            c.observe(SEQUENCE_SHUTDOWN_INDICATION),
            HeartbeatEvent::ShutdownReceived
        );
    }
}
