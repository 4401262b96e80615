//! Message-consumption loops
//!
//! Two independent loops compete for the shared state: one consumes price
//! ticks and fires triggers, the other consumes commands. Both follow the
//! same discipline: a bounded blocking read, one state lock scope per
//! message, act-then-ack, and per-message failure isolation. Transport
//! errors back off and retry; they never terminate a loop.

pub mod orders;
pub mod price;

pub use orders::OrderIngest;
pub use price::PriceIngest;
