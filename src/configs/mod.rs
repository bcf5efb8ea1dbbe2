pub mod base;
pub mod logging;
pub mod server;
pub mod zone;

pub use base::*;
pub use logging::*;
pub use server::*;
pub use zone::*;
