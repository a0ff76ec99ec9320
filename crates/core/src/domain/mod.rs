pub mod activity;
pub mod event;
pub mod execution;
pub mod payload;
