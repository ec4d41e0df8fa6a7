pub mod grade;
pub mod stats;
