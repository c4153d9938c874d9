// Signal execution against a derivatives venue
pub mod executor;
pub mod gateway;
pub mod result;

pub use executor::Executor;
pub use gateway::{market_symbol, GatewayError, MarketGateway};
pub use result::{ExecutionResult, ExecutionStatus};
