pub mod association;
pub mod bucket_service;
pub mod cache;
pub mod catalog_object_service;
pub mod dependency_service;
pub mod grant_resolution;
pub mod grant_store;
pub mod metadata_helper;
pub mod parser;
pub mod session;
pub mod validation;
