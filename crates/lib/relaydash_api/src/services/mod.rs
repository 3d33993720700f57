//! Business logic behind the handlers.

pub mod auth;
pub mod nodes;
pub mod password;
pub mod users;
