//! Encoder fan-out seam. Video codecs live behind [`encoder::Encoder`] as
//! external collaborators; the server only hands them RGBA frames.

pub mod encoder;

pub use encoder::{EncodedFrame, Encoder, PngEncoder};
