//! Storage services layered over the backend clients.

pub mod renderer;
pub mod storage_service;
pub mod thumbnail_service;
pub mod upload_service;
