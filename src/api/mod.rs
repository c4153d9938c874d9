pub mod binance;

pub use binance::BinanceFuturesClient;
