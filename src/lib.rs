pub mod config;
pub mod export;
pub mod fetch;
pub mod nextbus;
pub mod output;
pub mod parser;
pub mod recorder;
pub mod scheduler;
pub mod shutdown;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_support;
