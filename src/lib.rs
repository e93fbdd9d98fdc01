pub mod app;
pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod normalize;
pub mod output;
pub mod parse;
pub mod reference;
pub mod storage;
