pub mod blockcypher;
pub mod esplora;

use rust_decimal::Decimal;

/// A chain transaction normalized to what settlement needs: how much landed on
/// the watched address, and how deep it is buried.
#[derive(Debug, Clone)]
pub struct ObservedTx {
    pub hash: String,
    pub amount: Decimal,
    pub confirmations: u32,
}
