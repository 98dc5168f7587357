//! Artwork resolution: cache tiers, rate budget, resolver task and the search adapter.

pub mod disk_tier;
pub mod itunes;
pub mod memory_tier;
pub mod rate_budget;
mod resolver;

pub use disk_tier::{DiskTier, DEFAULT_ART_CACHE_FILE};
pub use itunes::ItunesArtworkSearch;
pub use memory_tier::MemoryTier;
pub use rate_budget::RateBudget;
pub use resolver::{spawn_artwork_resolver, ArtworkResolverHandle, ResolverConfig};
