//! Frame-level input: camera model, stereo pair sources, prefetching.

pub mod camera;
pub mod prefetch;
pub mod source;

pub use camera::CameraModel;
pub use prefetch::PrefetchSource;
pub use source::{FrameSource, ImageDims, ImageListSource, ImageLoader, StereoPair};
