//! Session tuning knobs.

/// Configuration for a [`Session`](crate::Session).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
	/// Upper bound for a single physical read from the stream. Zero is read as one.
	pub read_chunk_size: usize,
	/// Largest number of buffered bytes allowed to sit without completing a frame.
	///
	/// Exceeding it is reported as a protocol violation instead of buffering a corrupt stream
	/// forever.
	pub max_frame_size: usize,
}

impl SessionConfig {
	/// Default read chunk, in bytes.
	pub const DEFAULT_READ_CHUNK: usize = 0xfff;
	/// Default frame limit (16 MiB).
	pub const DEFAULT_MAX_FRAME: usize = 16 * 1024 * 1024;

	/// Creates the default configuration.
	#[must_use]
	pub const fn new() -> Self {
		Self {
			read_chunk_size: Self::DEFAULT_READ_CHUNK,
			max_frame_size: Self::DEFAULT_MAX_FRAME,
		}
	}

	/// Sets the read chunk size; zero is clamped to one byte.
	#[must_use]
	pub const fn read_chunk_size(mut self, bytes: usize) -> Self {
		self.read_chunk_size = if bytes == 0 { 1 } else { bytes };
		self
	}

	/// Sets the frame limit.
	#[must_use]
	pub const fn max_frame_size(mut self, bytes: usize) -> Self {
		self.max_frame_size = bytes;
		self
	}
}

impl Default for SessionConfig {
	fn default() -> Self {
		Self::new()
	}
}
