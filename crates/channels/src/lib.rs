//! Chat transport implementations for Murmur.
//!
//! Each transport implements `murmur_core::ChatTransport` for one chat
//! platform. Only Discord is supported today.

pub mod discord;

pub use discord::DiscordTransport;
