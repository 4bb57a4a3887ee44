//! Functions for building probe frames.
//!
//! These functions are meant to be called in order, from the lowermost layer to the uppermost layer.
//! Most callers want [`crate::encoder::encode`], which does this for a [`crate::models::Query`].
//!
//! # Examples
//!
//! To keep this example self-contained we use empty MAC addresses.
//! ```
//! use std::net::Ipv4Addr;
//! use pnet::util::MacAddr;
//! use hopconfirm::builder::{build_ethernet, build_icmp, build_ipv4, Frame};
//! use hopconfirm::models::{L2, L3, L4};
//!
//! let mut buffer = vec![0u8; Frame::buffer_size(L2::Ethernet, L3::IPv4, L4::ICMP, 2)];
//! let mut frame = Frame::new(&mut buffer, L2::Ethernet, L3::IPv4, L4::ICMP, 2);
//!
//! build_ethernet(&mut frame, MacAddr::zero(), MacAddr::zero());
//! build_ipv4(&mut frame, Ipv4Addr::UNSPECIFIED, Ipv4Addr::UNSPECIFIED, 32, 42);
//! build_icmp(&mut frame, 4242, 7);
//!
//! println!("{:?}", frame.l2());
//! ```
mod builders;
mod frame;

pub use builders::*;
pub use frame::*;
