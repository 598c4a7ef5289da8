pub mod client;
pub mod queries;
pub mod store;
pub mod types;

pub use client::{GraphClient, SessionGuard};
pub use store::{GraphStore, HttpGraphStore};
pub use types::{ElementInfo, NodeKind, Params, QueryError, QueryResult, Rows, TriggerInfo};
