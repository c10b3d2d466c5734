pub mod dashboard;
pub mod error;
pub mod extract;
pub mod health;
pub mod queue;
pub mod reports;
