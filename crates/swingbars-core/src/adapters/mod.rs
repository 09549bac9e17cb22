//! Remote bar sources.

mod alpaca;

pub use alpaca::AlpacaBarsAdapter;
