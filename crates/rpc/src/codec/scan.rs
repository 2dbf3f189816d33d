//! Incremental msgpack frame delimiting.
//!
//! Walks markers and length headers without building values, so the bytes of a partial frame
//! are looked at once no matter how many reads it takes to arrive. Payload bytes of strings,
//! binaries and extensions are skipped by length.

use rmp_serde::decode;

use crate::{Error, Result};

/// How much input a frame needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Scan {
	/// The frame occupies exactly this many leading bytes.
	Complete(usize),
	/// Nothing more can be learned before the input holds this many bytes.
	Incomplete(usize),
}

/// Layout of one msgpack item, keyed by its marker byte.
enum Shape {
	/// Marker followed by a fixed number of bytes.
	Scalar(usize),
	/// Marker, a big-endian length of `len_bytes`, `extra` bytes (the ext type), then the payload.
	Blob { len_bytes: usize, extra: usize },
	/// Marker followed by a count (inline, or big-endian in `len_bytes`) of `per`-value entries.
	Container { inline: Option<u64>, len_bytes: usize, per: u64 },
}

fn shape(marker: u8) -> Option<Shape> {
	let shape = match marker {
		0x00..=0x7f | 0xc0 | 0xc2 | 0xc3 | 0xe0..=0xff => Shape::Scalar(0),
		0x80..=0x8f => Shape::Container {
			inline: Some(u64::from(marker & 0x0f)),
			len_bytes: 0,
			per: 2,
		},
		0x90..=0x9f => Shape::Container {
			inline: Some(u64::from(marker & 0x0f)),
			len_bytes: 0,
			per: 1,
		},
		0xa0..=0xbf => Shape::Scalar(usize::from(marker & 0x1f)),
		0xc1 => return None,
		0xc4 | 0xd9 => Shape::Blob { len_bytes: 1, extra: 0 },
		0xc5 | 0xda => Shape::Blob { len_bytes: 2, extra: 0 },
		0xc6 | 0xdb => Shape::Blob { len_bytes: 4, extra: 0 },
		0xc7 => Shape::Blob { len_bytes: 1, extra: 1 },
		0xc8 => Shape::Blob { len_bytes: 2, extra: 1 },
		0xc9 => Shape::Blob { len_bytes: 4, extra: 1 },
		0xcc | 0xd0 => Shape::Scalar(1),
		0xcd | 0xd1 => Shape::Scalar(2),
		0xca | 0xce | 0xd2 => Shape::Scalar(4),
		0xcb | 0xcf | 0xd3 => Shape::Scalar(8),
		0xd4 => Shape::Scalar(2),
		0xd5 => Shape::Scalar(3),
		0xd6 => Shape::Scalar(5),
		0xd7 => Shape::Scalar(9),
		0xd8 => Shape::Scalar(17),
		0xdc => Shape::Container {
			inline: None,
			len_bytes: 2,
			per: 1,
		},
		0xdd => Shape::Container {
			inline: None,
			len_bytes: 4,
			per: 1,
		},
		0xde => Shape::Container {
			inline: None,
			len_bytes: 2,
			per: 2,
		},
		0xdf => Shape::Container {
			inline: None,
			len_bytes: 4,
			per: 2,
		},
	};
	Some(shape)
}

/// Resumable position inside the frame at the front of the input.
#[derive(Debug, Default)]
pub(super) struct FrameScan {
	/// Bytes of the frame already walked.
	offset: usize,
	/// Values still expected by each open container, innermost last.
	open: Vec<u64>,
}

impl FrameScan {
	/// Continues walking the frame at the front of `input`.
	///
	/// `input` must start with the same bytes as on the previous call until a result other than
	/// [`Scan::Incomplete`] is returned. Errors and completed frames reset the scan.
	pub(super) fn advance(&mut self, input: &[u8]) -> Result<Scan> {
		let scanned = self.walk(input);
		if !matches!(scanned, Ok(Scan::Incomplete(_))) {
			*self = Self::default();
		}
		scanned
	}

	fn walk(&mut self, input: &[u8]) -> Result<Scan> {
		if self.open.is_empty() {
			self.offset = 0;
			self.open.push(1);
		}
		loop {
			while self.open.last() == Some(&0) {
				self.open.pop();
			}
			if self.open.is_empty() {
				return Ok(Scan::Complete(self.offset));
			}

			let start = self.offset;
			let Some(&marker) = input.get(start) else {
				return Ok(Scan::Incomplete(start + 1));
			};
			let shape = shape(marker).ok_or_else(|| corrupt(format!("reserved marker 0xc1 at offset {start}")))?;
			let (size, children) = match shape {
				Shape::Scalar(payload) => (1 + payload, 0),
				Shape::Blob { len_bytes, extra } => {
					let Some(header) = input.get(start + 1..start + 1 + len_bytes) else {
						return Ok(Scan::Incomplete(start + 1 + len_bytes));
					};
					let payload = usize::try_from(big_endian(header)).map_err(|_| corrupt("payload length overflows usize".into()))?;
					let size = (1 + len_bytes + extra)
						.checked_add(payload)
						.ok_or_else(|| corrupt("payload length overflows usize".into()))?;
					(size, 0)
				}
				Shape::Container { inline, len_bytes, per } => {
					let count = match inline {
						Some(count) => count,
						None => {
							let Some(header) = input.get(start + 1..start + 1 + len_bytes) else {
								return Ok(Scan::Incomplete(start + 1 + len_bytes));
							};
							big_endian(header)
						}
					};
					(1 + len_bytes, count * per)
				}
			};

			let end = start
				.checked_add(size)
				.ok_or_else(|| corrupt("frame length overflows usize".into()))?;
			if end > input.len() {
				return Ok(Scan::Incomplete(end));
			}
			self.offset = end;
			if let Some(remaining) = self.open.last_mut() {
				*remaining -= 1;
			}
			if children > 0 {
				self.open.push(children);
			}
		}
	}
}

fn big_endian(bytes: &[u8]) -> u64 {
	bytes.iter().fold(0, |acc, &byte| (acc << 8) | u64::from(byte))
}

fn corrupt(reason: String) -> Error {
	Error::Decode(decode::Error::Syntax(reason))
}
