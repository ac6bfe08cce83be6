//! modgate Filters
//!
//! The cheap layers of the moderation pipeline:
//! - A Bloom filter over a KV-backed bit array (probabilistic prefilter)
//! - An Aho-Corasick phrase matcher with atomically swappable automaton
//! - A DCT-based 64-bit perceptual image hash with Hamming comparison

pub mod bitset;
pub mod bloom;
pub mod matcher;
pub mod phash;

pub use bitset::{BitSet, KvBitSet, MemoryBitSet};
pub use bloom::Bloom;
pub use matcher::{PatternInfo, PhraseMatch, PhraseMatcher};
pub use phash::{hamming_distance, phash, phash_from_bytes, phash_to_bytes};
