pub mod principal;
pub mod record;
pub mod staging;
pub mod user;
