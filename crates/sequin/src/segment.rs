use core::ops::RangeInclusive;

use crate::error::{Error, Result};

/// A contiguous, inclusive block of IDs handed to one caller.
///
/// The block `[start_id, end_id]` is exclusively owned by whoever received it:
/// no other claim against the same business type can ever overlap it. The
/// caller may hand out the IDs locally without talking to the backend again.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct IdSegment {
    pub business_type: String,
    pub start_id: i64,
    pub end_id: i64,
    pub segment_size: u32,
    pub issued_at_millis: i64,
}

impl IdSegment {
    /// Builds a segment whose last ID is `end_id`.
    ///
    /// Backends report the counter value *after* a claim, so this is the
    /// natural constructor: `start_id = end_id - size + 1`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] when `size` is zero and
    /// [`Error::CounterOverflow`] when the start would underflow.
    pub fn ending_at(
        business_type: &str,
        end_id: i64,
        size: u32,
        issued_at_millis: i64,
    ) -> Result<Self> {
        if size == 0 {
            return Err(Error::invalid_argument("Segment size must be positive"));
        }
        let start_id = end_id
            .checked_sub(i64::from(size) - 1)
            .ok_or_else(|| Error::overflow(business_type))?;
        Ok(Self {
            business_type: business_type.to_owned(),
            start_id,
            end_id,
            segment_size: size,
            issued_at_millis,
        })
    }

    /// Whether `id` falls inside this segment.
    pub const fn contains(&self, id: i64) -> bool {
        self.start_id <= id && id <= self.end_id
    }

    /// How many IDs are left after `current`, the last ID consumed.
    ///
    /// `None` or a value before the segment means nothing has been consumed
    /// yet; a value past the end means the segment is spent.
    pub fn remaining_count(&self, current: Option<i64>) -> u64 {
        match current {
            None => u64::from(self.segment_size),
            Some(c) if c < self.start_id => u64::from(self.segment_size),
            Some(c) if c > self.end_id => 0,
            Some(c) => self.end_id.abs_diff(c),
        }
    }

    /// Iterates every ID in the segment in ascending order.
    pub fn ids(&self) -> RangeInclusive<i64> {
        self.start_id..=self.end_id
    }
}
