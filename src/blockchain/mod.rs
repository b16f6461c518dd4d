pub mod bitcoin;
pub mod ckb;
pub mod traits;

pub use traits::{CellProvider, FeeRateProvider, UtxoProvider};
