//! SeaORM entities owned by this service.

pub mod user;
pub mod user_account;
