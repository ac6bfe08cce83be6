//! modgate Store
//!
//! Persistence abstractions consumed by the moderation engine:
//! - Cache entry models for moderated text and images
//! - Narrow repository traits over the durable store
//! - A KV abstraction (Redis-compatible) for the L1 cache and the Bloom
//!   bit arrays, with a production Redis backend and an in-memory backend
//!
//! The engine never observes SQL types or connection pooling decisions; a
//! SQL-backed repository implementation plugs in behind the same traits.

pub mod entry;
pub mod kv;
pub mod memory;
pub mod redis_kv;
pub mod repo;

pub use entry::{ImageCacheEntry, TextCacheEntry};
pub use kv::{CacheKv, ScriptReply};
pub use memory::{MemoryImageCacheRepo, MemoryKv, MemoryTextCacheRepo};
pub use redis_kv::RedisKv;
pub use repo::{ImageCacheRepo, TextCacheRepo};
