pub mod indicators;
pub mod position_sizer;
pub mod risk_calculator;
pub mod risk_engine;
pub mod sectors;
pub mod signal_generator;
