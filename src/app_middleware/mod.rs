//! Generic, domain-free HTTP ambient middleware: correlation IDs and
//! structured request logging.

pub mod correlation_id;
pub mod request_logger;

pub use correlation_id::{CorrelationId, CorrelationIdMiddleware};
pub use request_logger::RequestLogger;
