pub mod configs;
pub mod moderation;
pub mod playback;
pub mod protocol;
pub mod server;
pub mod sources;
pub mod storage;
pub mod transport;
pub mod zone;
