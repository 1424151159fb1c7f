//! Synchronous link abstraction. `send`/`recv` never suspend; the core
//! never needs an executor, so the endpoint reports readiness instead
//! of being awaited.
use crate::protocol::transport::can_frame::CanFrame;

/// A CAN link as seen by the router and transport engines. Implementors
/// wrap a real driver (SocketCAN, TWAI, bxCAN, ...) or a test double;
/// `send`/`recv` never block.
pub trait Endpoint {
    type Error: core::fmt::Debug;

    /// Transmit a frame. Returns `Err` if the underlying driver rejected
    /// or failed to queue it (e.g. TX FIFO full).
    fn send(&mut self, frame: &CanFrame) -> Result<(), Self::Error>;

    /// Poll for an inbound frame. Returns `Ok(None)` when idle.
    fn recv(&mut self) -> Result<Option<CanFrame>, Self::Error>;

    /// Best-effort readiness probe; implementors may always return `true`
    /// and rely on `send`'s `Err` for backpressure.
    fn can_send(&self) -> bool {
        true
    }

    /// Best-effort probe for whether `recv` is likely to yield a frame.
    /// Implementors may always return `true`; it exists for drivers that
    /// can cheaply check an RX queue depth without draining it.
    fn can_recv(&self) -> bool {
        true
    }

    /// Identifies the endpoint in logs (interface name, channel, ...).
    fn name(&self) -> &str {
        "endpoint"
    }
}
