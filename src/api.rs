pub mod health;
pub mod stats;
pub mod submit;

mod helper;
