pub mod artwork;
pub mod fs;
pub mod settings;
pub mod time;

pub use artwork::{spawn_artwork_resolver, ArtworkResolverHandle, ItunesArtworkSearch, ResolverConfig};
pub use settings::FileSettingsRepository;
pub use time::SystemClock;
