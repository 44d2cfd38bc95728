pub mod broker_client;
pub mod clock;
pub mod engine_store;
