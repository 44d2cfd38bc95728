pub mod position_sizing;
