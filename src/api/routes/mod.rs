pub mod admin;
pub mod health;
pub mod results;
pub mod stats;
