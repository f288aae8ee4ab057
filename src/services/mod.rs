pub mod multipart;
pub mod registry;
pub mod signing;
pub mod sizes;
pub mod storage;
pub mod upload_service;
