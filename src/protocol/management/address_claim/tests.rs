use super::*;
use crate::protocol::management::control_function::InternalControlFunction;

fn cf(name: u64, preferred: u8) -> InternalControlFunction {
    InternalControlFunction::new(IsoName::from_raw(name), preferred)
}

#[test]
fn no_conflict_keeps_preferred_address() {
    let mut claimer = AddressClaimer::new();
    let mut node = cf(0x1234567890ABCDEF, 42);

    let frames = claimer.start(&mut node);
    assert_eq!(frames.len(), 2);
    assert_eq!(node.claim_state(), AddressClaimState::WaitForContest);

    assert!(!claimer.update(&mut node, 249));
    assert!(claimer.update(&mut node, 1));
    assert_eq!(node.claim_state(), AddressClaimState::Claimed);
    assert_eq!(node.address(), 42);
}

#[test]
fn guard_timer_resolves_exactly_at_250ms() {
    let mut claimer = AddressClaimer::new();
    let mut node = cf(0x1234567890ABCDEF, 10);
    claimer.start(&mut node);

    assert!(!claimer.update(&mut node, 100));
    assert!(!claimer.update(&mut node, 100));
    assert!(!claimer.update(&mut node, 49));
    assert_eq!(node.claim_state(), AddressClaimState::WaitForContest);
    assert!(claimer.update(&mut node, 1));
    assert_eq!(node.claim_state(), AddressClaimState::Claimed);
}

#[test]
fn lower_name_contender_loses_we_defend() {
    // My NAME is smaller (wins); contender's claim should be refused.
    let mut claimer = AddressClaimer::new();
    let my_name = 0x1234567890ABCDEE;
    let their_name = 0x1234567890ABCDEF;
    assert!(my_name < their_name);

    let mut node = cf(my_name, 42);
    claimer.start(&mut node);

    let frames = claimer.handle_claim(&mut node, 42, IsoName::from_raw(their_name));
    assert_eq!(frames.len(), 1, "should defend with a re-sent claim");
    assert_eq!(node.address(), 42, "address unchanged when we win");
    assert_eq!(node.claim_state(), AddressClaimState::WaitForContest);
}

#[test]
fn higher_name_contender_wins_self_configurable_roams() {
    let my_name: u64 = 0x9234567890ABCDEF; // AAC bit set
    let their_name: u64 = 0x1234567890ABCDEE; // lower -> beats us
    assert!(my_name > their_name);

    let mut claimer = AddressClaimer::new();
    let mut node = cf(my_name, 247);
    claimer.start(&mut node);

    claimer.handle_claim(&mut node, 247, IsoName::from_raw(their_name));
    assert_ne!(node.address(), 247);
    assert_eq!(node.address(), 128);

    claimer.handle_claim(&mut node, 128, IsoName::from_raw(their_name));
    assert_eq!(node.address(), 129);

    claimer.handle_claim(&mut node, 129, IsoName::from_raw(their_name));
    assert_eq!(node.address(), 130);
    assert_eq!(node.claim_state(), AddressClaimState::WaitForContest);
}

#[test]
fn exhausting_arbitrary_range_fails() {
    let my_name: u64 = 0x9234567890ABCDEF;
    let their_name: u64 = 0x1234567890ABCDEE;

    let mut claimer = AddressClaimer::new();
    let mut node = cf(my_name, 128);
    claimer.start(&mut node);

    let mut address = 128u8;
    loop {
        let frames = claimer.handle_claim(&mut node, address, IsoName::from_raw(their_name));
        if node.claim_state() == AddressClaimState::Failed {
            break;
        }
        assert_eq!(frames.len(), 1);
        address = node.address();
    }

    assert_eq!(node.claim_state(), AddressClaimState::Failed);
    assert_eq!(node.address(), NULL_ADDRESS);
}

#[test]
fn non_self_configurable_loses_and_fails_without_retry() {
    let my_name: u64 = 0x1234567890ABCDEF; // AAC bit clear
    let their_name: u64 = 0x1234567890ABCDEE;
    assert!(my_name > their_name);

    let mut claimer = AddressClaimer::new();
    let mut node = cf(my_name, 42);
    claimer.start(&mut node);

    let frames = claimer.handle_claim(&mut node, 42, IsoName::from_raw(their_name));
    assert!(frames.is_empty(), "non-self-configurable loser does not retry");
    assert_eq!(node.claim_state(), AddressClaimState::Failed);
    assert_eq!(node.address(), NULL_ADDRESS);
}

#[test]
fn non_self_configurable_wins_and_defends() {
    let my_name: u64 = 0x1234567890ABCDEF; // AAC bit clear
    let their_name: u64 = 0x1934567890ABCDEE; // greater -> we win
    assert!(my_name < their_name);

    let mut claimer = AddressClaimer::new();
    let mut node = cf(my_name, 42);
    claimer.start(&mut node);

    let frames = claimer.handle_claim(&mut node, 42, IsoName::from_raw(their_name));
    assert_eq!(frames.len(), 1);
    assert_eq!(node.address(), 42);
    assert_eq!(node.claim_state(), AddressClaimState::WaitForContest);
}

#[test]
fn request_for_claim_silent_before_attempt() {
    let claimer = AddressClaimer::new();
    let node = cf(0x1234567890ABCDEF, 42);
    assert!(!claimer.has_attempted_claim());
    assert!(claimer.handle_request_for_claim(&node).is_empty());
}

#[test]
fn request_for_claim_responds_once_claimed() {
    let mut claimer = AddressClaimer::new();
    let mut node = cf(0x1234567890ABCDEF, 42);
    claimer.start(&mut node);
    claimer.update(&mut node, 250);

    let frames = claimer.handle_request_for_claim(&node);
    assert_eq!(frames.len(), 1);
    let frame = frames.iter().next().unwrap();
    assert_eq!(frame.id.source_address(), 42);
    assert_eq!(frame.id.pgn(), PGN_ADDRESS_CLAIMED);
}

#[test]
fn request_for_claim_responds_cannot_claim_when_failed() {
    let my_name: u64 = 0x1234567890ABCDEF;
    let their_name: u64 = 0x1234567890ABCDEE;

    let mut claimer = AddressClaimer::new();
    let mut node = cf(my_name, 42);
    claimer.start(&mut node);
    claimer.handle_claim(&mut node, 42, IsoName::from_raw(their_name));
    assert_eq!(node.claim_state(), AddressClaimState::Failed);

    let frames = claimer.handle_request_for_claim(&node);
    assert_eq!(frames.len(), 1);
    let frame = frames.iter().next().unwrap();
    assert_eq!(frame.id.source_address(), NULL_ADDRESS);
}
