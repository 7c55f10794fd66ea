pub mod signature_issuer;
pub mod signature_store;
pub mod staging;
pub mod storage;
pub mod transfer;
pub mod upload_coordinator;
