//! Lamport logical clock: `(id, time)` with monotonic tick and max-merge.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A Lamport logical clock. `id` is typically the author's public key;
/// `time` is a non-negative logical timestamp.
///
/// Clocks are value types: every mutation (`tick`, `merge`) produces a new
/// clock rather than mutating shared state in place.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LamportClock {
	id: String,
	time: u64,
}

impl LamportClock {
	/// Constructs a new clock for `id` at time `0`.
	pub fn new (id: &str) -> LamportClock {
		LamportClock {
			id: id.to_owned(),
			time: 0,
		}
	}

	/// Returns a copy of this clock with `time` set explicitly.
	pub fn set_time (mut self, time: u64) -> LamportClock {
		self.time = time;
		self
	}

	pub fn time (&self) -> u64 {
		self.time
	}

	pub fn id (&self) -> &str {
		&self.id
	}

	/// Returns a new clock with `time` advanced by one.
	pub fn tick (&self) -> LamportClock {
		LamportClock {
			id: self.id.clone(),
			time: self.time + 1,
		}
	}

	/// Returns a new clock with `time` set to `max(self.time, other.time)`.
	/// The id is retained from `self`.
	pub fn merge (&self, other: &LamportClock) -> LamportClock {
		LamportClock {
			id: self.id.clone(),
			time: std::cmp::max(self.time, other.time),
		}
	}
}

// Equality ignores identity: two clocks with the same time are equal
// regardless of id.
impl PartialEq for LamportClock {
	fn eq (&self, other: &Self) -> bool {
		self.time == other.time
	}
}

impl Eq for LamportClock {}

impl Ord for LamportClock {
	fn cmp (&self, other: &Self) -> Ordering {
		compare(self, other)
	}
}

impl PartialOrd for LamportClock {
	fn partial_cmp (&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

/// Lexicographic comparison on `(time, id)`. This is the primitive the
/// sorting module's comparators build on.
pub fn compare (a: &LamportClock, b: &LamportClock) -> Ordering {
	match a.time.cmp(&b.time) {
		Ordering::Equal => a.id.cmp(&b.id),
		other => other,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn tick_advances_time_without_mutating_original () {
		let a = LamportClock::new("A");
		let b = a.tick();
		assert_eq!(a.time(), 0);
		assert_eq!(b.time(), 1);
	}

	#[test]
	fn merge_takes_max_time () {
		let a = LamportClock::new("A").set_time(2);
		let b = LamportClock::new("B").set_time(5);
		let merged = a.merge(&b);
		assert_eq!(merged.time(), 5);
		assert_eq!(merged.id(), "A");
	}

	#[test]
	fn ordering_is_time_then_id () {
		let x = LamportClock::new("0000");
		let y = LamportClock::new("0001");
		let mut z = LamportClock::new("0002");
		assert!(x < y);
		assert!(y < z);
		z = z.tick();
		let merged = x.merge(&z);
		assert!(merged > y);
	}

	#[test]
	fn equality_ignores_id () {
		let a = LamportClock::new("A").set_time(3);
		let b = LamportClock::new("B").set_time(3);
		assert_eq!(a, b);
	}
}
