//! Domain models shared by the storage adapters and the auth flows.

pub mod identity;
pub mod policy;
