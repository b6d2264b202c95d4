//! Cache implementations for Pennant.
//!
//! Provides the Redis write-through layer sitting in front of the durable
//! evaluation store.

mod redis;

pub use redis::{RedisCacheConfig, RedisEvaluationCache};
