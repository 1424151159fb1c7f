//! Synchronous address-claim state machine: one instance per internal
//! control function. A plain poll-driven FSM — `start`/`update`/
//! `handle_claim`/`handle_request_for_claim` are called directly by
//! the router, which owns the elapsed-time accounting.
use crate::core::{
    ARBITRARY_ADDRESS_RANGE_END, ARBITRARY_ADDRESS_RANGE_START, BROADCAST_ADDRESS, NULL_ADDRESS,
    PGN_ADDRESS_CLAIMED, PGN_REQUEST, PRIORITY_NETWORK_MANAGEMENT,
};
use crate::error::CanIdBuildError;
use crate::protocol::management::control_function::{AddressClaimState, InternalControlFunction};
use crate::protocol::management::iso_name::IsoName;
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::can_id::CanId;

/// Guard window an internal CF waits in `WaitForContest` before declaring
/// its address claim unopposed.
pub const ADDRESS_CLAIM_TIMEOUT_MS: u32 = 250;

/// Up to two frames can be produced by a single claimer event: the
/// request-for-claim plus the initial claim frame on `start`.
pub const MAX_CLAIM_FRAMES: usize = 2;

/// Fixed-capacity, `no_std`-friendly substitute for `Vec<CanFrame>`.
#[derive(Debug, Default)]
pub struct ClaimFrames {
    frames: [Option<CanFrame>; MAX_CLAIM_FRAMES],
    len: usize,
}

impl ClaimFrames {
    fn new() -> Self {
        Self {
            frames: [None, None],
            len: 0,
        }
    }

    fn push(&mut self, frame: CanFrame) {
        if self.len < MAX_CLAIM_FRAMES {
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

fn request_for_claim_frame(source_address: u8) -> Result<CanFrame, CanIdBuildError> {
    let id = CanId::builder(PGN_REQUEST, source_address)
        .to_destination(BROADCAST_ADDRESS)
        .with_priority(PRIORITY_NETWORK_MANAGEMENT)
        .build()?;
    let pgn_bytes = PGN_ADDRESS_CLAIMED.to_le_bytes();
    let mut data = [0xFF; 8];
    data[0] = pgn_bytes[0];
    data[1] = pgn_bytes[1];
    data[2] = pgn_bytes[2];
    Ok(CanFrame { id, data, len: 3 })
}

fn claim_frame(source_address: u8, name: IsoName) -> Result<CanFrame, CanIdBuildError> {
    let id = CanId::builder(PGN_ADDRESS_CLAIMED, source_address)
        .to_destination(BROADCAST_ADDRESS)
        .with_priority(PRIORITY_NETWORK_MANAGEMENT)
        .build()?;
    Ok(CanFrame {
        id,
        data: name.to_le_bytes(),
        len: 8,
    })
}

/// Scans the self-configurable address range (0x80-0xFD) linearly,
/// skipping the addresses already tried during this claim attempt.
#[derive(Debug, Clone, Copy)]
struct ArbitraryAddressScan {
    tried: u16,
}

impl ArbitraryAddressScan {
    const fn new() -> Self {
        Self { tried: 0 }
    }

    const fn range_len() -> u16 {
        ARBITRARY_ADDRESS_RANGE_END as u16 - ARBITRARY_ADDRESS_RANGE_START as u16 + 1
    }

    /// Returns the next candidate address, or `None` once every address
    /// in the range has been tried during this attempt.
    fn next(&mut self) -> Option<u8> {
        if self.tried >= Self::range_len() {
            return None;
        }
        let candidate = ARBITRARY_ADDRESS_RANGE_START + self.tried as u8;
        self.tried += 1;
        Some(candidate)
    }
}

/// Per-control-function address-claim engine.
#[derive(Debug)]
pub struct AddressClaimer {
    guard_timer_ms: u32,
    attempted_claim: bool,
    scan: ArbitraryAddressScan,
}

impl Default for AddressClaimer {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressClaimer {
    pub const fn new() -> Self {
        Self {
            guard_timer_ms: 0,
            attempted_claim: false,
            scan: ArbitraryAddressScan::new(),
        }
    }

    pub fn has_attempted_claim(&self) -> bool {
        self.attempted_claim
    }

    pub fn guard_timer_ms(&self) -> u32 {
        self.guard_timer_ms
    }

    /// Begin a claim attempt for `cf` on its preferred address: emits the
    /// request-for-claim frame, then the initial claim frame, and moves
    /// `cf` into `WaitForContest`.
    pub fn start(&mut self, cf: &mut InternalControlFunction) -> ClaimFrames {
        cf.set_address(cf.preferred_address());
        cf.set_claim_state(AddressClaimState::WaitForContest);
        self.guard_timer_ms = 0;
        self.attempted_claim = true;
        self.scan = ArbitraryAddressScan::new();

        let mut frames = ClaimFrames::new();
        if let Ok(f) = request_for_claim_frame(cf.address()) {
            frames.push(f);
        }
        if let Ok(f) = claim_frame(cf.address(), cf.name()) {
            frames.push(f);
        }
        frames
    }

    /// Advance the guard timer. Returns `true` exactly once, the instant
    /// the claim becomes uncontested (`cf` transitions to `Claimed`).
    pub fn update(&mut self, cf: &mut InternalControlFunction, elapsed_ms: u32) -> bool {
        if cf.claim_state() != AddressClaimState::WaitForContest {
            return false;
        }
        self.guard_timer_ms = self.guard_timer_ms.saturating_add(elapsed_ms);
        if self.guard_timer_ms >= ADDRESS_CLAIM_TIMEOUT_MS {
            cf.set_claim_state(AddressClaimState::Claimed);
            #[cfg(feature = "defmt")]
            defmt::info!("address claim uncontested, claimed address {}", cf.address());
            return true;
        }
        false
    }

    /// Process a competing Address Claim frame for `contested_address`.
    /// A no-op unless `cf` is currently defending that exact address.
    pub fn handle_claim(
        &mut self,
        cf: &mut InternalControlFunction,
        contested_address: u8,
        contender_name: IsoName,
    ) -> ClaimFrames {
        let mut frames = ClaimFrames::new();
        if cf.claim_state() != AddressClaimState::WaitForContest || contested_address != cf.address() {
            return frames;
        }

        // Equal NAMEs are undefined by the standard; treat as "they won".
        let we_lost = contender_name <= cf.name();

        if we_lost {
            if cf.name().is_arbitrary_address_capable() {
                match self.scan.next() {
                    Some(candidate) => {
                        cf.set_address(candidate);
                        self.guard_timer_ms = 0;
                        if let Ok(f) = claim_frame(cf.address(), cf.name()) {
                            frames.push(f);
                        }
                    }
                    None => {
                        #[cfg(feature = "defmt")]
                        defmt::warn!("address claim exhausted arbitrary range");
                        cf.set_claim_state(AddressClaimState::Failed);
                        cf.set_address(NULL_ADDRESS);
                    }
                }
            } else {
                #[cfg(feature = "defmt")]
                defmt::warn!("address claim lost, not self-configurable");
                cf.set_claim_state(AddressClaimState::Failed);
                cf.set_address(NULL_ADDRESS);
            }
        } else {
            // We won: defend by re-sending our claim; the guard timer is
            // not reset.
            if let Ok(f) = claim_frame(cf.address(), cf.name()) {
                frames.push(f);
            }
        }

        frames
    }

    /// Respond to an inbound request-for-address-claimed (PGN 0xEA00
    /// requesting PGN 60928). Silent until the first `start()` call.
    pub fn handle_request_for_claim(&self, cf: &InternalControlFunction) -> ClaimFrames {
        let mut frames = ClaimFrames::new();
        if !self.attempted_claim {
            return frames;
        }
        match cf.claim_state() {
            AddressClaimState::Claimed | AddressClaimState::Failed => {
                if let Ok(f) = claim_frame(cf.address(), cf.name()) {
                    frames.push(f);
                }
            }
            AddressClaimState::None | AddressClaimState::WaitForContest => {}
        }
        frames
    }
}

#[cfg(test)]
mod tests;
