pub mod compile;
pub mod dependency;
pub mod handle;
pub mod resource;
pub mod state;
pub mod sync_chain;
pub mod usage;
