// Event stream handling: frame decoding and event interpretation

pub mod decoder;
pub mod events;

pub use decoder::FrameDecoder;
pub use events::{interpret, StreamEvent};
