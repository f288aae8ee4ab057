//! Data exchanged with clients and the object store.
//!
//! Nothing here is persisted; the store's multipart session is the only
//! durable state an upload has.

pub mod api;
pub mod field_input;
pub mod transfer;
