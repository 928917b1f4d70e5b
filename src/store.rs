pub(crate) mod cluster_store;
#[cfg(test)]
pub(crate) mod memory;
pub(crate) mod run_store;
pub mod types;
