pub mod media;
pub mod messages;

pub use media::*;
pub use messages::*;

/// Stable identity id, assigned once per zone lifetime.
pub type UserId = u64;
