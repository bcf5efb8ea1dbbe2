pub mod archive;
pub mod plugin;
pub mod youtube;

pub use archive::ArchiveResolver;
pub use plugin::{MediaResolver, ResolveError};
pub use youtube::YoutubeResolver;
