//! Usage: Request model, response cache, credential refresh and the pipeline tying them together.

pub mod cache_key;
pub mod cache_store;
pub mod credentials;
pub mod pipeline;
pub mod refresh;
pub mod replay;
pub mod request;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_fakes;
