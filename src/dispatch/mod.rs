//! Request dispatcher: speaks the endpoint's streaming dialect and turns each
//! due request into exactly one [`RequestOutcome`](crate::domain::RequestOutcome).
mod clock;
mod dialect;
mod sender;
mod sse;

#[cfg(test)]
pub(crate) mod test_support;

pub use clock::{RunClock, wall_clock_us};
pub use dialect::{EndpointDialect, EventKind, SUPPORTED_DIALECTS};
pub use sender::{Dispatcher, DueRequest};
pub use sse::{SseDecoder, SseEvent};
