mod consts;
mod profile;

pub use consts::*;
pub use profile::{AmbientMode, MicProfile};

/// Raw little-endian PCM16 bytes as they travel over the channel.
pub type Pcm16Bytes = Vec<u8>;
