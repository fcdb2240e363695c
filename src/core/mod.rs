pub mod aggregator;
pub mod engine;
pub mod feed;
pub mod lifecycle;
pub mod planner;
pub mod target;
