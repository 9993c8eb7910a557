pub mod broadcaster;
pub mod error;
pub mod filters;
pub mod ffmpeg_backend;
pub mod formats;
pub mod jpeg;
pub mod recording;
pub mod service;
pub mod test_pattern;
pub mod traits;

#[cfg(test)]
pub(crate) mod mock;
