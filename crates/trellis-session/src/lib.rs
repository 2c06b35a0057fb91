//! Per-connection session state: identity, the observation subscription
//! tables with their monotonic sequence counters, the relay bookkeeping that
//! drives the disconnect cascade, and the registry of live sessions.

pub mod observe;
pub mod registry;
pub mod session;

pub use observe::{ObservationTable, RelayEntry, RelayTable};
pub use registry::{start_keepalive_sweeper, SessionRegistry};
pub use session::Session;
