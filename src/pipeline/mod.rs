pub mod vision;
pub mod import;
pub mod extraction;
pub mod processor;
