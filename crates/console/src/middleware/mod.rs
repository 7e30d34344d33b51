//! HTTP middleware stack for the console.
//!
//! # Middleware Order (outermost first)
//!
//! 1. Sentry layers (hub per request, HTTP transaction)
//! 2. `TraceLayer` (request tracing)
//! 3. Request ID (add unique ID to each request)
//! 4. Session layer (tower-sessions with `MemoryStore`)
//! 5. Access gate (protected routes only)

pub mod gate;
pub mod request_id;
pub mod session;

pub use gate::{CurrentIdentity, decision_response, require_identity};
pub use request_id::request_id_middleware;
pub use session::{GateSession, clear_principal, create_session_layer, set_principal};
