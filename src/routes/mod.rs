pub mod addresses;
pub mod auth;
pub mod deposits;
pub mod orders;
pub mod utils;
pub mod wallet;
pub mod withdrawals;
