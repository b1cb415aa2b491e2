pub mod artifact;
pub mod error;
