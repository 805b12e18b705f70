pub mod client;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod resolver;
pub mod uploader;

#[cfg(test)]
pub mod test_utils;
