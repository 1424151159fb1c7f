//! Network management: the NAME identity, control functions, the
//! synchronous address-claim state machine, and the control-function
//! registry used for partner matching.
pub mod address_claim;
pub mod control_function;
pub mod iso_name;
pub mod registry;
