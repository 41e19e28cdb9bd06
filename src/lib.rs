pub mod bridge;
pub mod config;
pub mod signing;
pub mod storage;
pub mod token_lookup;
pub mod wallet;
