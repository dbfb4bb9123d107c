use std::path::PathBuf;
use std::sync::Arc;

use log::{error, info};

/// One readback frame handed to every registered encoder: tightly packed
/// RGBA bytes and the frame's simulated timestamp in seconds.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub rgba: Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
    pub time: f64,
}

/// Consumer of readback frames. Implementations may buffer or spawn their
/// own worker threads; the engine treats them as opaque.
pub trait Encoder: Send {
    /// Called with each frame in submission order. Returning false drops
    /// the encoder from the fan-out, which is how one-shot encoders finish.
    fn encode_frame(&mut self, frame: &EncodedFrame) -> bool;

    fn description(&self) -> String;
}

/// One-shot still-image encoder: writes the next frame it sees to a PNG
/// file and completes.
pub struct PngEncoder {
    path: PathBuf,
}

impl PngEncoder {
    pub fn new(path: PathBuf) -> PngEncoder {
        PngEncoder { path }
    }
}

impl Encoder for PngEncoder {
    fn encode_frame(&mut self, frame: &EncodedFrame) -> bool {
        let image = match image::RgbaImage::from_raw(
            frame.width,
            frame.height,
            frame.rgba.as_ref().clone(),
        ) {
            Some(image) => image,
            None => {
                error!(
                    "frame of {} bytes does not match {}x{}",
                    frame.rgba.len(),
                    frame.width,
                    frame.height
                );
                return false;
            }
        };
        match image.save(&self.path) {
            Ok(()) => info!("wrote {}", self.path.display()),
            Err(err) => error!("failed to write {}: {}", self.path.display(), err),
        }
        false
    }

    fn description(&self) -> String {
        format!("png {}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingEncoder {
        frames: usize,
        limit: usize,
    }

    impl Encoder for CountingEncoder {
        fn encode_frame(&mut self, _frame: &EncodedFrame) -> bool {
            self.frames += 1;
            self.frames < self.limit
        }

        fn description(&self) -> String {
            "counting".to_string()
        }
    }

    fn frame() -> EncodedFrame {
        EncodedFrame {
            rgba: Arc::new(vec![0u8; 16]),
            width: 2,
            height: 2,
            time: 0.0,
        }
    }

    #[test]
    fn encoders_signal_completion_by_returning_false() {
        let mut encoders: Vec<Box<dyn Encoder>> = vec![Box::new(CountingEncoder {
            frames: 0,
            limit: 3,
        })];
        for _ in 0..5 {
            let f = frame();
            encoders.retain_mut(|encoder| encoder.encode_frame(&f));
        }
        assert!(encoders.is_empty());
    }

    #[test]
    fn png_encoder_rejects_mismatched_frames() {
        let mut encoder = PngEncoder::new(PathBuf::from("/tmp/never-written.png"));
        let bad = EncodedFrame {
            rgba: Arc::new(vec![0u8; 3]),
            width: 2,
            height: 2,
            time: 0.0,
        };
        assert!(!encoder.encode_frame(&bad));
    }
}
