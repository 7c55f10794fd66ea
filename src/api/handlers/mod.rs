pub mod health;
pub mod signatures;
pub mod upload;
