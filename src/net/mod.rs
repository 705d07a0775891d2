pub mod discovery;
pub mod receiver;
pub mod streamer;
