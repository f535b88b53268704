pub mod client;
pub mod errors;
pub mod http;
pub mod memory;
pub mod types;

pub use client::CrmClient;
pub use errors::CrmError;
pub use types::{CrmRecord, FilterOp, ObjectType, SearchFilter};
