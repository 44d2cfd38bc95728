pub mod paper_broker;
