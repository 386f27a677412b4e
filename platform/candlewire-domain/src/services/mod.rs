pub mod alerts;
pub mod executor;
pub mod history;
pub mod indicators;
pub mod risk;
