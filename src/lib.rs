#![doc = include_str!("../README.md")]

pub mod builder;
pub mod checksum;
pub mod config;
pub mod encoder;
pub mod engine;
pub mod extractor;
pub mod logger;
pub mod matcher;
pub mod models;
pub mod packet;
pub mod receive_loop;
pub mod receiver;
pub mod scheduler;
pub mod sender;
pub mod utilities;

pub use config::*;
pub use engine::*;
pub use packet::*;
pub use scheduler::*;
pub use sender::*;
