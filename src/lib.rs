pub mod admin;
pub mod bus;
pub mod catalog;
pub mod codec;
pub mod config;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod persistence;
pub mod protocol;
pub mod publisher;
pub mod registry;
pub mod txqueue;
