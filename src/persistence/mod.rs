pub mod apply;
pub mod autosave;
pub mod backup;
pub mod cache;
pub mod codec;
pub mod combat_logout;
pub mod engine;
pub mod record;
pub mod store;
