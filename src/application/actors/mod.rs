pub mod trading_loop;

pub use trading_loop::{LoopContext, LoopSettings, LoopStatus, TradingLoop, TradingLoopHandle};
