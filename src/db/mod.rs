pub mod addresses;
pub mod auth;
pub mod deposits;
pub mod ledger;
pub mod orders;
pub mod users;
pub mod wallets;
pub mod withdrawals;
