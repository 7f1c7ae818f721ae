pub mod forward;
pub mod health;
pub mod login;
pub(crate) mod utils;
