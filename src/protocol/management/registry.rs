//! Fixed-capacity control-function registry. Owns the arena of internal
//! and partner control functions the router drives; handles are plain
//! indices (`CfHandle`), never pointers, so the registry has no
//! self-referential or cyclic-graph concerns.
use crate::protocol::management::address_claim::{AddressClaimer, ClaimFrames};
use crate::protocol::management::control_function::{
    CfHandle, ControlFunction, InternalControlFunction, NameFilter, PartnerControlFunction,
};
use crate::protocol::management::iso_name::IsoName;

enum Slot {
    Internal {
        cf: InternalControlFunction,
        claimer: AddressClaimer,
    },
    Partner(PartnerControlFunction),
}

/// Arena of control functions, fixed at `N` slots (a `no_std` stand-in
/// for the `Vec<ControlFunction>` a hosted implementation would use).
pub struct Registry<const N: usize> {
    slots: [Option<Slot>; N],
}

impl<const N: usize> Default for Registry<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Registry<N> {
    pub const fn new() -> Self {
        const NONE: Option<Slot> = None;
        Self { slots: [NONE; N] }
    }

    fn first_free(&self) -> Option<usize> {
        self.slots.iter().position(|s| s.is_none())
    }

    /// Register an internal control function. Returns `None` once the
    /// registry is full.
    pub fn add_internal(&mut self, name: IsoName, preferred_address: u8) -> Option<CfHandle> {
        let index = self.first_free()?;
        self.slots[index] = Some(Slot::Internal {
            cf: InternalControlFunction::new(name, preferred_address),
            claimer: AddressClaimer::new(),
        });
        Some(CfHandle(index))
    }

    /// Register a partner control function tracked by NAME filter.
    pub fn add_partner(&mut self, filter: NameFilter) -> Option<CfHandle> {
        let index = self.first_free()?;
        self.slots[index] = Some(Slot::Partner(PartnerControlFunction::new(filter)));
        Some(CfHandle(index))
    }

    pub fn control_function(&self, handle: CfHandle) -> Option<ControlFunction> {
        match self.slots.get(handle.0)?.as_ref()? {
            Slot::Internal { cf, .. } => Some(ControlFunction::Internal(cf.clone())),
            Slot::Partner(p) => Some(ControlFunction::Partner(*p)),
        }
    }

    pub fn internal(&self, handle: CfHandle) -> Option<&InternalControlFunction> {
        match self.slots.get(handle.0)?.as_ref()? {
            Slot::Internal { cf, .. } => Some(cf),
            Slot::Partner(_) => None,
        }
    }

    /// Start (or restart) the address-claim attempt for an internal
    /// control function, returning the frames to transmit.
    pub fn start_claim(&mut self, handle: CfHandle) -> Option<ClaimFrames> {
        match self.slots.get_mut(handle.0)?.as_mut()? {
            Slot::Internal { cf, claimer } => Some(claimer.start(cf)),
            Slot::Partner(_) => None,
        }
    }

    /// Advance every internal control function's guard timer. Returns
    /// `true` for a handle the instant it becomes `Claimed`.
    pub fn update_claims(&mut self, elapsed_ms: u32, mut on_claimed: impl FnMut(CfHandle)) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(Slot::Internal { cf, claimer }) = slot {
                if claimer.update(cf, elapsed_ms) {
                    on_claimed(CfHandle(index));
                }
            }
        }
    }

    /// Feed an inbound Address Claim frame to every internal control
    /// function defending `contested_address`, and to every partner
    /// control function whose filter matches `contender_name`.
    ///
    /// Returns the index of the first internal slot whose defense
    /// produced frames to send, if any (callers drain via
    /// `claim_frames_for`).
    pub fn handle_claim(
        &mut self,
        contested_address: u8,
        contender_name: IsoName,
    ) -> [Option<(CfHandle, ClaimFrames)>; N] {
        const NONE: Option<(CfHandle, ClaimFrames)> = None;
        let mut results = [NONE; N];
        for (index, slot) in self.slots.iter_mut().enumerate() {
            match slot {
                Some(Slot::Internal { cf, claimer }) => {
                    let frames = claimer.handle_claim(cf, contested_address, contender_name);
                    if !frames.is_empty() {
                        results[index] = Some((CfHandle(index), frames));
                    }
                }
                Some(Slot::Partner(partner)) => {
                    partner.observe_claim(contender_name, contested_address);
                }
                None => {}
            }
        }
        results
    }

    /// Respond to an inbound request-for-address-claimed on behalf of
    /// every internal control function that has attempted a claim.
    pub fn handle_request_for_claim(&self) -> [Option<(CfHandle, ClaimFrames)>; N] {
        const NONE: Option<(CfHandle, ClaimFrames)> = None;
        let mut results = [NONE; N];
        for (index, slot) in self.slots.iter().enumerate() {
            if let Some(Slot::Internal { cf, claimer }) = slot {
                let frames = claimer.handle_request_for_claim(cf);
                if !frames.is_empty() {
                    results[index] = Some((CfHandle(index), frames));
                }
            }
        }
        results
    }

    /// Resolve the handle of the partner whose currently known address
    /// matches `address`, if any.
    pub fn partner_by_address(&self, address: u8) -> Option<CfHandle> {
        self.slots.iter().enumerate().find_map(|(index, slot)| {
            match slot {
                Some(Slot::Partner(p)) if p.address() == address => Some(CfHandle(index)),
                _ => None,
            }
        })
    }

    /// Clear a partner's online flag on loss of contact — e.g. a
    /// heartbeat consumer declaring `CommError`, or the host's own
    /// application-layer supervision timing the peer out.
    pub fn mark_partner_offline(&mut self, handle: CfHandle) {
        if let Some(Slot::Partner(partner)) = self.slots.get_mut(handle.0).and_then(|s| s.as_mut()) {
            partner.mark_offline();
        }
    }
}
