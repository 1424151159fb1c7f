//! Control-function model: the local ("internal") control functions this
//! node owns, and the remote ("partner") control functions discovered on
//! the network, matched against a NAME filter supplied by the host.
use crate::core::NULL_ADDRESS;
use crate::protocol::management::iso_name::IsoName;

/// Non-owning index into the router's control-function arena. `Copy`
/// because arena handles never alias mutable state themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CfHandle(pub usize);

/// Address-claim progress for an internal control function.
///
/// A freshly-constructed control function starts at `None`; starting a
/// claim moves it to `WaitForContest`, and the 250 ms guard window
/// resolves it to either `Claimed` or `Failed` (non-self-configurable
/// loser).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddressClaimState {
    None,
    WaitForContest,
    Claimed,
    Failed,
}

/// A control function this node owns and can claim an address for.
#[derive(Debug, Clone)]
pub struct InternalControlFunction {
    name: IsoName,
    preferred_address: u8,
    address: u8,
    claim_state: AddressClaimState,
}

impl InternalControlFunction {
    /// Construct a new, unclaimed internal control function.
    pub fn new(name: IsoName, preferred_address: u8) -> Self {
        Self {
            name,
            preferred_address,
            address: preferred_address,
            claim_state: AddressClaimState::None,
        }
    }

    pub fn name(&self) -> IsoName {
        self.name
    }

    pub fn preferred_address(&self) -> u8 {
        self.preferred_address
    }

    /// Current source address: the preferred or arbitrary address while
    /// contesting/claimed, `NULL_ADDRESS` once `Failed`.
    pub fn address(&self) -> u8 {
        self.address
    }

    pub(crate) fn set_address(&mut self, address: u8) {
        self.address = address;
    }

    pub fn claim_state(&self) -> AddressClaimState {
        self.claim_state
    }

    pub(crate) fn set_claim_state(&mut self, state: AddressClaimState) {
        self.claim_state = state;
    }

    pub fn is_claimed(&self) -> bool {
        self.claim_state == AddressClaimState::Claimed
    }
}

/// Filter used to recognize a partner control function among inbound
/// Address Claim frames. `None` in a field means "don't care".
#[derive(Debug, Clone, Copy, Default)]
pub struct NameFilter {
    pub manufacturer_code: Option<u16>,
    pub device_function: Option<u8>,
    pub device_class: Option<u8>,
    pub industry_group: Option<u8>,
}

impl NameFilter {
    pub const fn new() -> Self {
        Self {
            manufacturer_code: None,
            device_function: None,
            device_class: None,
            industry_group: None,
        }
    }

    pub fn matches(&self, name: IsoName) -> bool {
        self.manufacturer_code
            .map_or(true, |v| v == name.manufacturer_code())
            && self
                .device_function
                .map_or(true, |v| v == name.device_function())
            && self.device_class.map_or(true, |v| v == name.device_class())
            && self
                .industry_group
                .map_or(true, |v| v == name.industry_group())
    }
}

/// A remote control function the router tracks by NAME filter. Its
/// address is learned (and kept up to date) from Address Claim traffic,
/// and an online flag tracks whether it is currently believed present
/// on the network.
#[derive(Debug, Clone, Copy)]
pub struct PartnerControlFunction {
    filter: NameFilter,
    name: Option<IsoName>,
    address: u8,
    online: bool,
}

impl PartnerControlFunction {
    pub fn new(filter: NameFilter) -> Self {
        Self {
            filter,
            name: None,
            address: NULL_ADDRESS,
            online: false,
        }
    }

    pub fn filter(&self) -> NameFilter {
        self.filter
    }

    pub fn name(&self) -> Option<IsoName> {
        self.name
    }

    /// Last known address, or `NULL_ADDRESS` if never observed.
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Whether this partner is currently believed online: it has an
    /// observed Address Claim and hasn't since been marked lost via
    /// [`PartnerControlFunction::mark_offline`].
    pub fn is_online(&self) -> bool {
        self.online
    }

    /// Record an observed claim, if the NAME satisfies this partner's
    /// filter. Returns `true` when the partner's tracked address changed.
    /// Always marks the partner online, even if the address didn't change,
    /// since observing a claim is itself evidence of presence.
    pub fn observe_claim(&mut self, name: IsoName, address: u8) -> bool {
        if !self.filter.matches(name) {
            return false;
        }
        let changed = self.name != Some(name) || self.address != address;
        self.name = Some(name);
        self.address = address;
        self.online = true;
        changed
    }

    /// Mark the partner offline, e.g. on loss of contact (address claim
    /// lost, or a higher-layer supervisor such as the heartbeat consumer
    /// declaring the peer unreachable).
    pub fn mark_offline(&mut self) {
        self.online = false;
    }
}

/// Sum type covering both kinds of control function the router tracks,
/// per the arena/handle design: the router owns a fixed array of these
/// and hands out `CfHandle` indices rather than pointers.
#[derive(Debug, Clone)]
pub enum ControlFunction {
    Internal(InternalControlFunction),
    Partner(PartnerControlFunction),
}

impl ControlFunction {
    pub fn as_internal(&self) -> Option<&InternalControlFunction> {
        match self {
            Self::Internal(cf) => Some(cf),
            Self::Partner(_) => None,
        }
    }

    pub fn as_internal_mut(&mut self) -> Option<&mut InternalControlFunction> {
        match self {
            Self::Internal(cf) => Some(cf),
            Self::Partner(_) => None,
        }
    }

    pub fn as_partner(&self) -> Option<&PartnerControlFunction> {
        match self {
            Self::Partner(cf) => Some(cf),
            Self::Internal(_) => None,
        }
    }

    pub fn as_partner_mut(&mut self) -> Option<&mut PartnerControlFunction> {
        match self {
            Self::Partner(cf) => Some(cf),
            Self::Internal(_) => None,
        }
    }
}
