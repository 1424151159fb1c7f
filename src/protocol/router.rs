//! Network router: the single entry point a host drives with one
//! local control function, a table of tracked partners, the three
//! segmentation engines, and a PGN subscription table.
//!
//! Ties one `Endpoint` to one claimed address and exposes `send`/
//! `subscribe`/`update` as plain synchronous calls the host polls via
//! `update(elapsed_ms)`. Address-claim defense, the classic/extended
//! transport engines, and Fast Packet reassembly are all internal
//! concerns `send`/`update` absorb instead of leaving to the caller.
use crate::core::{
    BROADCAST_ADDRESS, NULL_ADDRESS, PGN_ADDRESS_CLAIMED, PGN_ETP_CM, PGN_ETP_DT, PGN_REQUEST,
    PGN_TP_CM, PGN_TP_DT,
};
use crate::error::{CoreError, EndpointErrorDetail, TransportAbortReason};
use crate::protocol::management::control_function::{CfHandle, NameFilter};
use crate::protocol::management::iso_name::IsoName;
use crate::protocol::management::registry::Registry;
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::can_id::CanId;
use crate::protocol::transport::classic::{
    self, ClassicTransport, SessionKey as TpSessionKey, TpEvent, TP_MAX_DATA_LENGTH,
};
use crate::protocol::transport::endpoint::Endpoint;
use crate::protocol::transport::extended::{
    EtpEvent, EtpSessionKey, ExtendedTransport,
};
use crate::protocol::transport::fast_packet::{
    assembler::{FastPacketAssembler, ProcessResult},
    builder::FastPacketBuilder,
    MAX_FAST_PACKET_PAYLOAD,
};

/// Up to this many PGNs may be registered to prefer Fast Packet framing
/// over classic TP's BAM, regardless of payload size (9-223 bytes).
pub const MAX_FAST_PACKET_PGNS: usize = 8;

/// Opaque handle returned by [`Router::subscribe`]; pass it back to
/// [`Router::unsubscribe`] to stop receiving a PGN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionToken(u32);

/// PGN subscriber, called with `(pgn, source, destination, payload)` for
/// every inbound application-layer message, already reassembled if it
/// arrived as a segmented transfer. A plain function pointer, not a
/// closure: the crate carries no allocator to box captures in, matching
/// the fixed-capacity tables used everywhere else in the router and
/// registry.
pub type PgnHandler = fn(u32, u8, u8, &[u8]);

struct Subscription {
    token: SubscriptionToken,
    pgn: u32,
    handler: PgnHandler,
}

/// Callbacks fired by [`Router::update`] for conditions the caller
/// can't observe from a `send`/`subscribe` return value, since they
/// happen asynchronously relative to the original call. All methods
/// default to a no-op.
pub trait RouterEvents {
    /// A transport session aborted, by us or by the peer.
    fn on_abort(&mut self, pgn: u32, source: u8, destination: u8, reason: TransportAbortReason) {
        let _ = (pgn, source, destination, reason);
    }
    /// A transport session exceeded one of its timers.
    fn on_session_timeout(&mut self, pgn: u32, source: u8, destination: u8) {
        let _ = (pgn, source, destination);
    }
}

impl RouterEvents for () {}

/// Ties one local control function to a CAN endpoint, the address-claim
/// defense logic, the three segmentation engines, and a PGN dispatch
/// table.
///
/// - `N`: partner/control-function registry capacity (the local CF
///   takes one slot).
/// - `SUBS`: PGN subscription table capacity.
/// - `ETP_BYTES`: largest single Extended Transport Protocol message
///   this router can reassemble or send.
/// - `ETP_SESSIONS`: concurrent ETP transfers.
pub struct Router<
    E: Endpoint,
    const N: usize,
    const SUBS: usize,
    const ETP_BYTES: usize,
    const ETP_SESSIONS: usize,
> {
    endpoint: E,
    registry: Registry<N>,
    local: CfHandle,
    classic: ClassicTransport,
    extended: ExtendedTransport<ETP_BYTES, ETP_SESSIONS>,
    fast_packet: FastPacketAssembler,
    fast_packet_pgns: [Option<u32>; MAX_FAST_PACKET_PGNS],
    subscriptions: [Option<Subscription>; SUBS],
    next_token: u32,
}

impl<E: Endpoint, const N: usize, const SUBS: usize, const ETP_BYTES: usize, const ETP_SESSIONS: usize>
    Router<E, N, SUBS, ETP_BYTES, ETP_SESSIONS>
{
    /// Build a router around `endpoint`, registering one local control
    /// function with `name`/`preferred_address`. Call [`Router::start_claim`]
    /// once afterward to put it on the wire.
    pub fn new(endpoint: E, name: IsoName, preferred_address: u8) -> Self {
        let mut registry = Registry::new();
        let local = registry
            .add_internal(name, preferred_address)
            .expect("a freshly constructed registry always has a free slot");
        const NONE_SUB: Option<Subscription> = None;
        Self {
            endpoint,
            registry,
            local,
            classic: ClassicTransport::new(),
            extended: ExtendedTransport::new(),
            fast_packet: FastPacketAssembler::new(),
            fast_packet_pgns: [None; MAX_FAST_PACKET_PGNS],
            subscriptions: [NONE_SUB; SUBS],
            next_token: 0,
        }
    }

    /// The local control function's current source address, or
    /// [`NULL_ADDRESS`] before the claim resolves.
    pub fn local_address(&self) -> u8 {
        self.registry
            .internal(self.local)
            .map(|cf| cf.address())
            .unwrap_or(NULL_ADDRESS)
    }

    pub fn is_claimed(&self) -> bool {
        self.registry
            .internal(self.local)
            .map(|cf| cf.is_claimed())
            .unwrap_or(false)
    }

    /// Track a remote control function matched by NAME filter, learning
    /// its address from observed Address Claim traffic.
    pub fn add_partner(&mut self, filter: NameFilter) -> Option<CfHandle> {
        self.registry.add_partner(filter)
    }

    pub fn partner_address(&self, handle: CfHandle) -> Option<u8> {
        self.registry
            .control_function(handle)
            .and_then(|cf| cf.as_partner().map(|p| p.address()))
    }

    /// Put the local control function's claim on the wire.
    pub fn start_claim(&mut self) -> Result<(), CoreError> {
        if let Some(frames) = self.registry.start_claim(self.local) {
            for frame in frames.iter() {
                self.endpoint
                    .send(frame)
                    .map_err(|e| CoreError::EndpointError(EndpointErrorDetail::capture(&e)))?;
            }
        }
        Ok(())
    }

    /// Register `pgn` to always use Fast Packet framing (9-223 bytes),
    /// preferred over BAM even when the payload would also fit a
    /// classic TP broadcast. A no-op once the table is full.
    pub fn register_fast_packet(&mut self, pgn: u32) -> bool {
        if self.fast_packet_pgns.iter().flatten().any(|p| *p == pgn) {
            return true;
        }
        for slot in self.fast_packet_pgns.iter_mut() {
            if slot.is_none() {
                *slot = Some(pgn);
                return true;
            }
        }
        false
    }

    fn is_fast_packet_pgn(&self, pgn: u32) -> bool {
        self.fast_packet_pgns.iter().flatten().any(|p| *p == pgn)
    }

    /// Subscribe to application-layer deliveries of `pgn`. Returns
    /// `None` once the subscription table is full.
    pub fn subscribe(&mut self, pgn: u32, handler: PgnHandler) -> Option<SubscriptionToken> {
        let token = SubscriptionToken(self.next_token);
        for slot in self.subscriptions.iter_mut() {
            if slot.is_none() {
                *slot = Some(Subscription { token, pgn, handler });
                self.next_token = self.next_token.wrapping_add(1);
                return Some(token);
            }
        }
        None
    }

    /// Stop a subscription. Safe to call from inside a handler invoked
    /// during [`Router::update`]: dispatch only ever reads a slot once
    /// before moving to the next, so clearing a slot never invalidates
    /// an in-progress call.
    pub fn unsubscribe(&mut self, token: SubscriptionToken) {
        for slot in self.subscriptions.iter_mut() {
            if slot.as_ref().map(|s| s.token) == Some(token) {
                *slot = None;
            }
        }
    }

    fn dispatch(&self, pgn: u32, source: u8, destination: u8, payload: &[u8]) {
        for sub in self.subscriptions.iter().flatten() {
            if sub.pgn == pgn {
                (sub.handler)(pgn, source, destination, payload);
            }
        }
    }

    /// Send `payload` from the local control function. Picks single
    /// frame, Fast Packet, classic TP, or ETP per size/PGN/destination,
    /// per the router's transport selection policy; rejects a broadcast
    /// payload too large for BAM outright.
    pub fn send(&mut self, pgn: u32, destination: u8, payload: &[u8]) -> Result<(), CoreError> {
        let source = self.local_address();
        if source == NULL_ADDRESS {
            return Err(CoreError::NotConnected);
        }

        if self.is_fast_packet_pgn(pgn) {
            if payload.len() > MAX_FAST_PACKET_PAYLOAD {
                return Err(CoreError::PayloadTooLarge);
            }
            let dest = if destination == BROADCAST_ADDRESS {
                None
            } else {
                Some(destination)
            };
            let builder = FastPacketBuilder::new(pgn, source, dest, payload);
            for frame in builder.build() {
                let frame = frame?;
                self.endpoint
                    .send(&frame)
                    .map_err(|e| CoreError::EndpointError(EndpointErrorDetail::capture(&e)))?;
            }
            return Ok(());
        }

        if payload.len() <= 8 {
            let mut builder = CanId::builder(pgn, source);
            if destination != BROADCAST_ADDRESS {
                builder = builder.to_destination(destination);
            }
            let id = builder.build()?;
            let mut data = [0xFFu8; 8];
            data[..payload.len()].copy_from_slice(payload);
            let frame = CanFrame { id, data, len: 8 };
            return self
                .endpoint
                .send(&frame)
                .map_err(|e| CoreError::EndpointError(EndpointErrorDetail::capture(&e)));
        }

        if payload.len() <= TP_MAX_DATA_LENGTH {
            let frames = self.classic.send(pgn, payload, source, destination)?;
            for frame in frames.iter() {
                self.endpoint
                    .send(frame)
                    .map_err(|e| CoreError::EndpointError(EndpointErrorDetail::capture(&e)))?;
            }
            return Ok(());
        }

        if destination == BROADCAST_ADDRESS {
            return Err(CoreError::PayloadTooLarge);
        }
        let frames = self.extended.send(pgn, payload, source, destination)?;
        for frame in frames.iter() {
            self.endpoint
                .send(frame)
                .map_err(|e| CoreError::EndpointError(EndpointErrorDetail::capture(&e)))?;
        }
        Ok(())
    }

    /// Host-initiated cancellation of a live classic TP session.
    pub fn abort_tp_session(&mut self, key: TpSessionKey, reason: TransportAbortReason) {
        if let Some(frame) = self.classic.abort_session(key, reason) {
            let _ = self.endpoint.send(&frame);
        }
    }

    /// Host-initiated cancellation of a live ETP session.
    pub fn abort_etp_session(&mut self, key: EtpSessionKey, reason: TransportAbortReason) {
        if let Some(frame) = self.extended.abort_session(key, reason) {
            let _ = self.endpoint.send(&frame);
        }
    }

    fn handle_address_management(&mut self, frame: &CanFrame) -> bool {
        let pgn = frame.id.pgn();
        if pgn == PGN_ADDRESS_CLAIMED {
            let name = IsoName::from_le_bytes(frame.data);
            let contested = frame.id.source_address();
            let results = self.registry.handle_claim(contested, name);
            for (_, frames) in results.into_iter().flatten() {
                for frame in frames.iter() {
                    let _ = self.endpoint.send(frame);
                }
            }
            return true;
        }
        if pgn == PGN_REQUEST {
            let requested = u32::from_le_bytes([frame.data[0], frame.data[1], frame.data[2], 0]);
            if requested == PGN_ADDRESS_CLAIMED {
                let results = self.registry.handle_request_for_claim();
                for (_, frames) in results.into_iter().flatten() {
                    for frame in frames.iter() {
                        let _ = self.endpoint.send(frame);
                    }
                }
            }
            return true;
        }
        false
    }

    fn handle_tp_event(&mut self, event: TpEvent, events: &mut impl RouterEvents) {
        match event {
            TpEvent::MessageComplete { key, len } => {
                // An EOMA acknowledging our own outbound session also
                // surfaces as MessageComplete; key.source is then our
                // own address, not a peer's, so there's nothing to hand
                // to subscribers. Only a session whose key.source is
                // the remote party reassembled an inbound message.
                if key.source == self.local_address() {
                    let _ = self.classic.take_completed(key, &mut []);
                    return;
                }
                let mut buffer = [0u8; TP_MAX_DATA_LENGTH];
                if let Some(copied) = self.classic.take_completed(key, &mut buffer) {
                    self.dispatch(key.pgn, key.source, key.destination, &buffer[..copied.min(len)]);
                }
            }
            TpEvent::Aborted { key, reason } => {
                events.on_abort(key.pgn, key.source, key.destination, reason);
            }
            TpEvent::Progress | TpEvent::Ignored => {}
        }
    }

    fn handle_etp_event(&mut self, event: EtpEvent, events: &mut impl RouterEvents) {
        match event {
            EtpEvent::MessageComplete { key, len } => {
                if key.source == self.local_address() {
                    let _ = self.extended.take_completed(key, &mut []);
                    return;
                }
                let mut buffer = [0u8; ETP_BYTES];
                if let Some(copied) = self.extended.take_completed(key, &mut buffer) {
                    self.dispatch(key.pgn, key.source, key.destination, &buffer[..copied.min(len)]);
                }
            }
            EtpEvent::Aborted { key, reason } => {
                events.on_abort(key.pgn, key.source, key.destination, reason);
            }
            EtpEvent::Progress | EtpEvent::Ignored => {}
        }
    }

    fn handle_inbound(&mut self, frame: CanFrame, events: &mut impl RouterEvents) {
        let local = self.local_address();
        // The endpoint sees every frame on the bus; anything unicast to
        // another node is not ours to process.
        if let Some(dest) = frame.id.destination() {
            if dest != local && dest != BROADCAST_ADDRESS {
                return;
            }
        }
        if self.handle_address_management(&frame) {
            return;
        }
        let pgn = frame.id.pgn();
        match pgn {
            PGN_TP_CM | PGN_TP_DT => {
                let (event, frames) = self.classic.process_frame(&frame, local);
                for f in frames.iter() {
                    let _ = self.endpoint.send(f);
                }
                self.handle_tp_event(event, events);
            }
            PGN_ETP_CM | PGN_ETP_DT => {
                let (event, frames) = self.extended.process_frame(&frame, local);
                for f in frames.iter() {
                    let _ = self.endpoint.send(f);
                }
                self.handle_etp_event(event, events);
            }
            _ if self.is_fast_packet_pgn(pgn) => {
                let source = frame.id.source_address();
                if let ProcessResult::MessageComplete(msg) =
                    self.fast_packet.process_frame(source, &frame.data)
                {
                    let destination = frame.id.destination().unwrap_or(BROADCAST_ADDRESS);
                    self.dispatch(pgn, source, destination, &msg.payload[..msg.len]);
                }
            }
            _ => {
                let source = frame.id.source_address();
                let destination = frame.id.destination().unwrap_or(BROADCAST_ADDRESS);
                self.dispatch(pgn, source, destination, &frame.data[..frame.len]);
            }
        }
    }

    /// Advance the router by `elapsed_ms`: drains every inbound frame
    /// first (in receipt order), then drives the transport engines'
    /// timers in the fixed order classic TP, ETP, Fast Packet, then the
    /// address-claim guard timer.
    pub fn update(&mut self, elapsed_ms: u32, events: &mut impl RouterEvents) {
        while let Ok(Some(frame)) = self.endpoint.recv() {
            self.handle_inbound(frame, events);
        }

        let (tp_frames, tp_completions) = self.classic.update_sessions(elapsed_ms);
        for frame in tp_frames.iter() {
            if frame.data[0] == classic::tp_cm::ABORT {
                let pgn = u32::from_le_bytes([frame.data[5], frame.data[6], frame.data[7], 0]);
                events.on_session_timeout(
                    pgn,
                    frame.id.source_address(),
                    frame.id.destination().unwrap_or(BROADCAST_ADDRESS),
                );
            }
            let _ = self.endpoint.send(frame);
        }
        for event in tp_completions.into_iter() {
            self.handle_tp_event(event, events);
        }

        let etp_frames = self.extended.update_sessions(elapsed_ms);
        for frame in etp_frames.iter() {
            if frame.data[0] == crate::protocol::transport::extended::etp_cm::ABORT {
                let pgn = u32::from_le_bytes([frame.data[5], frame.data[6], frame.data[7], 0]);
                events.on_session_timeout(
                    pgn,
                    frame.id.source_address(),
                    frame.id.destination().unwrap_or(BROADCAST_ADDRESS),
                );
            }
            let _ = self.endpoint.send(frame);
        }
        self.fast_packet.age_sessions(elapsed_ms);

        self.registry.update_claims(elapsed_ms, |_handle| {});
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::management::address_claim::ADDRESS_CLAIM_TIMEOUT_MS;
    use core::sync::atomic::{AtomicU32, Ordering};

    const MAX_QUEUE: usize = 16;

    #[derive(Debug)]
    struct FakeEndpointError;

    struct FakeEndpoint {
        inbox: [Option<CanFrame>; MAX_QUEUE],
        inbox_pos: usize,
        inbox_len: usize,
        outbox: [Option<CanFrame>; MAX_QUEUE],
        outbox_len: usize,
    }

    impl FakeEndpoint {
        fn new() -> Self {
            const NONE: Option<CanFrame> = None;
            Self {
                inbox: [NONE; MAX_QUEUE],
                inbox_pos: 0,
                inbox_len: 0,
                outbox: [NONE; MAX_QUEUE],
                outbox_len: 0,
            }
        }

        fn push_inbound(&mut self, frame: CanFrame) {
            self.inbox[self.inbox_len] = Some(frame);
            self.inbox_len += 1;
        }

        fn outbound(&self) -> impl Iterator<Item = &CanFrame> {
            self.outbox[..self.outbox_len].iter().filter_map(|f| f.as_ref())
        }
    }

    impl Endpoint for FakeEndpoint {
        type Error = FakeEndpointError;

        fn send(&mut self, frame: &CanFrame) -> Result<(), Self::Error> {
            self.outbox[self.outbox_len] = Some(frame.clone());
            self.outbox_len += 1;
            Ok(())
        }

        fn recv(&mut self) -> Result<Option<CanFrame>, Self::Error> {
            if self.inbox_pos >= self.inbox_len {
                return Ok(None);
            }
            let frame = self.inbox[self.inbox_pos].take();
            self.inbox_pos += 1;
            Ok(frame)
        }
    }

    type TestRouter = Router<FakeEndpoint, 4, 4, 4096, 2>;

    fn claimed_router(preferred_address: u8) -> TestRouter {
        let name = IsoName::builder().unique_number(1).build();
        let mut router: TestRouter = Router::new(FakeEndpoint::new(), name, preferred_address);
        router.start_claim().unwrap();
        let mut events = ();
        router.update(ADDRESS_CLAIM_TIMEOUT_MS + 1, &mut events);
        assert!(router.is_claimed());
        router
    }

    #[test]
    fn new_router_starts_unclaimed() {
        let name = IsoName::builder().unique_number(2).build();
        let router: TestRouter = Router::new(FakeEndpoint::new(), name, 42);
        assert_eq!(router.local_address(), NULL_ADDRESS);
        assert!(!router.is_claimed());
    }

    #[test]
    fn start_claim_puts_a_claim_frame_on_the_wire_and_resolves() {
        let router = claimed_router(42);
        assert_eq!(router.local_address(), 42);
        assert!(router
            .endpoint
            .outbound()
            .any(|f| f.id.pgn() == PGN_ADDRESS_CLAIMED));
    }

    #[test]
    fn send_before_claim_is_rejected() {
        let name = IsoName::builder().unique_number(3).build();
        let mut router: TestRouter = Router::new(FakeEndpoint::new(), name, 10);
        assert!(matches!(
            router.send(0xFF00, BROADCAST_ADDRESS, &[1, 2, 3]),
            Err(CoreError::NotConnected)
        ));
    }

    #[test]
    fn send_small_payload_emits_a_single_frame() {
        let mut router = claimed_router(10);
        router.send(0xEF00, 20, &[1, 2, 3]).unwrap();
        let frame = router
            .endpoint
            .outbound()
            .rev()
            .next()
            .expect("a frame was queued");
        assert_eq!(frame.id.source_address(), 10);
        assert_eq!(frame.id.destination(), Some(20));
        assert_eq!(&frame.data[..3], &[1, 2, 3]);
    }

    #[test]
    fn every_outbound_frame_has_length_eight() {
        let mut router = claimed_router(10);
        router.send(0xEF00, 20, &[1, 2, 3]).unwrap();
        router.send(0xFE00, 20, &[0u8; 9]).unwrap();
        for frame in router.endpoint.outbound() {
            assert_eq!(frame.len, 8);
        }
    }

    #[test]
    fn send_large_unicast_payload_starts_a_classic_tp_session() {
        let mut router = claimed_router(10);
        let payload = [7u8; 20];
        router.send(0xFE00, 20, &payload).unwrap();
        let rts = router
            .endpoint
            .outbound()
            .rev()
            .next()
            .expect("an RTS was queued");
        assert_eq!(rts.id.pgn(), PGN_TP_CM);
    }

    #[test]
    fn transport_selection_respects_exact_size_boundaries() {
        let mut router = claimed_router(10);

        // 8 bytes: single frame, no TP session.
        router.send(0xEF00, 20, &[0u8; 8]).unwrap();
        let after_single = router.endpoint.outbox_len;
        assert_eq!(
            router.endpoint.outbound().last().unwrap().id.pgn(),
            0xEF00
        );

        // 9 bytes: smallest payload that needs classic TP (an RTS).
        router.send(0xFE00, 20, &[0u8; 9]).unwrap();
        let rts = router.endpoint.outbound().nth(after_single).unwrap();
        assert_eq!(rts.id.pgn(), PGN_TP_CM);
        assert_eq!(rts.data[0], classic::tp_cm::RTS);

        // 1785 bytes (TP_MAX_DATA_LENGTH): still classic TP, not ETP.
        let payload_max_tp = [0u8; TP_MAX_DATA_LENGTH];
        router.send(0xFD00, 21, &payload_max_tp).unwrap();
        let still_tp = router.endpoint.outbound().last().unwrap();
        assert_eq!(still_tp.id.pgn(), PGN_TP_CM);

        // 1786 bytes unicast: over the classic TP ceiling, goes to ETP.
        let payload_over_tp = [0u8; TP_MAX_DATA_LENGTH + 1];
        router.send(0xFC00, 22, &payload_over_tp).unwrap();
        let etp_rts = router.endpoint.outbound().last().unwrap();
        assert_eq!(etp_rts.id.pgn(), PGN_ETP_CM);

        // 1786 bytes broadcast: rejected outright, classic TP has no room
        // and ETP never broadcasts.
        assert!(matches!(
            router.send(0xFF00, BROADCAST_ADDRESS, &payload_over_tp),
            Err(CoreError::PayloadTooLarge)
        ));
    }

    #[test]
    fn send_oversized_broadcast_is_rejected() {
        let mut router = claimed_router(10);
        let payload = [0u8; TP_MAX_DATA_LENGTH + 1];
        assert!(matches!(
            router.send(0xFF00, BROADCAST_ADDRESS, &payload),
            Err(CoreError::PayloadTooLarge)
        ));
    }

    static SUBSCRIBE_HITS: AtomicU32 = AtomicU32::new(0);

    fn record_hit(_pgn: u32, _source: u8, _destination: u8, _payload: &[u8]) {
        SUBSCRIBE_HITS.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn subscribed_pgn_is_dispatched_on_update() {
        SUBSCRIBE_HITS.store(0, Ordering::SeqCst);
        let mut router = claimed_router(10);
        router.subscribe(0xFF10, record_hit).unwrap();

        let frame = CanFrame {
            id: CanId::builder(0xFF10, 55).build().unwrap(),
            data: [9, 0, 0, 0, 0, 0, 0, 0],
            len: 1,
        };
        router.endpoint.push_inbound(frame);
        let mut events = ();
        router.update(1, &mut events);
        assert_eq!(SUBSCRIBE_HITS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_stops_further_deliveries() {
        SUBSCRIBE_HITS.store(0, Ordering::SeqCst);
        let mut router = claimed_router(10);
        let token = router.subscribe(0xFF10, record_hit).unwrap();
        router.unsubscribe(token);

        let frame = CanFrame {
            id: CanId::builder(0xFF10, 55).build().unwrap(),
            data: [9, 0, 0, 0, 0, 0, 0, 0],
            len: 1,
        };
        router.endpoint.push_inbound(frame);
        let mut events = ();
        router.update(1, &mut events);
        assert_eq!(SUBSCRIBE_HITS.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn register_fast_packet_routes_through_builder() {
        let mut router = claimed_router(10);
        router.register_fast_packet(0xFF13);
        let payload = [3u8; 20];
        router.send(0xFF13, BROADCAST_ADDRESS, &payload).unwrap();
        let first = router
            .endpoint
            .outbound()
            .next()
            .expect("a fast packet frame was queued");
        assert_eq!(first.data[0] & 0x1F, 0); // frame index 0 of the first fast-packet frame.
    }

    #[test]
    fn abort_tp_session_forwards_to_classic_transport() {
        let mut router = claimed_router(10);
        let payload = [7u8; 20];
        router.send(0xFE00, 20, &payload).unwrap();
        let key = TpSessionKey {
            source: 10,
            destination: 20,
            pgn: 0xFE00,
        };
        router.abort_tp_session(key, TransportAbortReason::NoResources);
        let last = router.endpoint.outbound().last().expect("abort frame queued");
        assert_eq!(last.data[0], classic::tp_cm::ABORT);
    }

    #[test]
    fn frames_unicast_to_another_node_are_ignored() {
        SUBSCRIBE_HITS.store(0, Ordering::SeqCst);
        let mut router = claimed_router(10);
        router.subscribe(0xEF00, record_hit).unwrap();

        let frame = CanFrame {
            id: CanId::builder(0xEF00, 55).to_destination(99).build().unwrap(),
            data: [9, 0, 0, 0, 0, 0, 0, 0],
            len: 1,
        };
        router.endpoint.push_inbound(frame);
        let mut events = ();
        router.update(1, &mut events);
        assert_eq!(SUBSCRIBE_HITS.load(Ordering::SeqCst), 0);
    }
}
