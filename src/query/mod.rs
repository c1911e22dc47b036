pub mod service;

pub use service::{LayerStatus, QueryError, QueryService, Stats};
