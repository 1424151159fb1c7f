//! Transport layer: CAN frame representations, 29-bit identifier
//! management, the synchronous `Endpoint` abstraction, and the three
//! segmentation engines (classic TP, extended ETP, NMEA 2000 fast packet).

pub mod can_frame;
pub mod can_id;
pub mod classic;
pub mod endpoint;
pub mod extended;
pub mod fast_packet;
