pub mod batch;
pub mod token;
