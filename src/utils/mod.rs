pub mod presigned;
pub mod validation;
