//! Byte ranges and edits, with range-marker style shifting.

/// Half-open byte range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TextRange {
	start: u32,
	end: u32,
}

impl TextRange {
	/// Creates a range; an inverted range collapses to `start`.
	pub fn new(start: u32, end: u32) -> Self {
		Self { start, end: end.max(start) }
	}

	pub fn empty(at: u32) -> Self {
		Self { start: at, end: at }
	}

	pub fn start(self) -> u32 {
		self.start
	}

	pub fn end(self) -> u32 {
		self.end
	}

	pub fn len(self) -> u32 {
		self.end - self.start
	}

	pub fn is_empty(self) -> bool {
		self.start == self.end
	}

	pub fn contains_range(self, other: TextRange) -> bool {
		self.start <= other.start && other.end <= self.end
	}

	/// True if the ranges overlap or touch.
	pub fn touches(self, other: TextRange) -> bool {
		self.start <= other.end && other.start <= self.end
	}

	/// Smallest range covering both.
	pub fn cover(self, other: TextRange) -> TextRange {
		TextRange {
			start: self.start.min(other.start),
			end: self.end.max(other.end),
		}
	}

	/// Maps this range through `edit`.
	///
	/// Offsets before the edit stay put, offsets after it move by the length
	/// delta, and offsets inside the replaced text snap to the replacement's
	/// boundaries (start leftwards, end rightwards).
	pub fn shift_through(self, edit: TextEdit) -> TextRange {
		let start = edit.map_offset(self.start, Bias::Left);
		let end = edit.map_offset(self.end, Bias::Right);
		TextRange::new(start, end)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bias {
	Left,
	Right,
}

/// Replacement of `old_len` bytes at `offset` with `new_len` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextEdit {
	pub offset: u32,
	pub old_len: u32,
	pub new_len: u32,
}

impl TextEdit {
	pub fn insert(offset: u32, len: u32) -> Self {
		Self {
			offset,
			old_len: 0,
			new_len: len,
		}
	}

	pub fn delete(offset: u32, len: u32) -> Self {
		Self {
			offset,
			old_len: len,
			new_len: 0,
		}
	}

	pub fn replace(offset: u32, old_len: u32, new_len: u32) -> Self {
		Self { offset, old_len, new_len }
	}

	/// Range occupied by the replacement text after the edit.
	pub fn new_range(self) -> TextRange {
		TextRange::new(self.offset, self.offset.saturating_add(self.new_len))
	}

	/// Document length after applying this edit to a document of `len` bytes.
	pub fn apply_len(self, len: u32) -> u32 {
		len.saturating_sub(self.old_len).saturating_add(self.new_len)
	}

	fn old_end(self) -> u32 {
		self.offset.saturating_add(self.old_len)
	}

	fn map_offset(self, offset: u32, bias: Bias) -> u32 {
		if offset < self.offset || (offset == self.offset && bias == Bias::Left) {
			offset
		} else if offset >= self.old_end() && !(self.old_len == 0 && offset == self.offset) {
			offset.saturating_sub(self.old_len).saturating_add(self.new_len)
		} else {
			match bias {
				Bias::Left => self.offset,
				Bias::Right => self.offset.saturating_add(self.new_len),
			}
		}
	}
}
