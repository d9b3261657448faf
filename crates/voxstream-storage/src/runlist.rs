use std::io::{self, Read, Write};

use crate::codec::{BinaryCodec, CodecError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Run<T> {
    pub len: u32,
    pub value: T,
}

/// Run-length encoded view of a flat array.
///
/// Runs are kept maximal: no two adjacent runs hold equal values, and the run lengths
/// always add up to [`RunList::len`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunList<T> {
    runs: Vec<Run<T>>,
    total: usize,
}

impl<T> Default for RunList<T> {
    fn default() -> Self {
        Self {
            runs: Vec::new(),
            total: 0,
        }
    }
}

impl<T: Copy + PartialEq> RunList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// `len` copies of `value` as a single run.
    pub fn filled(len: usize, value: T) -> Self {
        let mut list = Self::new();
        list.fill(len, value);
        list
    }

    pub fn fill(&mut self, len: usize, value: T) {
        self.runs.clear();
        self.total = 0;
        self.push_run(len, value);
    }

    pub fn compress(data: &[T]) -> Self {
        let mut list = Self::new();
        list.recompress(data);
        list
    }

    /// Replace the contents with `data`, reusing the run allocation.
    pub fn recompress(&mut self, data: &[T]) {
        self.runs.clear();
        self.total = 0;
        let mut iter = data.iter().copied();
        let Some(mut current) = iter.next() else {
            return;
        };
        let mut len = 1usize;
        for v in iter {
            if v == current {
                len += 1;
            } else {
                self.push_run(len, current);
                current = v;
                len = 1;
            }
        }
        self.push_run(len, current);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.total
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    #[inline]
    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    #[inline]
    pub fn runs(&self) -> &[Run<T>] {
        &self.runs
    }

    pub fn get(&self, index: usize) -> T {
        assert!(
            index < self.total,
            "run list index {index} out of range (len {})",
            self.total
        );
        let (run, _) = self.locate(index);
        self.runs[run].value
    }

    /// Write `value` at `index`, splitting or merging runs to stay canonical.
    /// Returns false when the cell already held an equal value.
    pub fn set(&mut self, index: usize, value: T) -> bool {
        assert!(
            index < self.total,
            "run list index {index} out of range (len {})",
            self.total
        );
        let (ri, offset) = self.locate(index);
        if self.runs[ri].value == value {
            return false;
        }
        let len = self.runs[ri].len as usize;
        if len == 1 {
            self.runs[ri].value = value;
            let ri = self.merge_with_left(ri);
            self.merge_with_right(ri);
        } else if offset == 0 {
            self.runs[ri].len -= 1;
            self.runs.insert(ri, Run { len: 1, value });
            self.merge_with_left(ri);
        } else if offset == len - 1 {
            self.runs[ri].len -= 1;
            self.runs.insert(ri + 1, Run { len: 1, value });
            self.merge_with_right(ri + 1);
        } else {
            let right = Run {
                len: (len - offset - 1) as u32,
                value: self.runs[ri].value,
            };
            self.runs[ri].len = offset as u32;
            self.runs
                .splice(ri + 1..ri + 1, [Run { len: 1, value }, right]);
        }
        true
    }

    pub fn decompress(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.total);
        for run in &self.runs {
            out.extend(std::iter::repeat_n(run.value, run.len as usize));
        }
        out
    }

    /// Expand into a caller-owned buffer of exactly [`RunList::len`] elements.
    pub fn decompress_into(&self, out: &mut [T]) {
        assert_eq!(
            out.len(),
            self.total,
            "decompress_into buffer length mismatch"
        );
        let mut at = 0usize;
        for run in &self.runs {
            let end = at + run.len as usize;
            out[at..end].fill(run.value);
            at = end;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        self.runs
            .iter()
            .flat_map(|r| std::iter::repeat_n(r.value, r.len as usize))
    }

    /// Runs paired with the flat index they start at.
    pub fn spans(&self) -> impl Iterator<Item = (usize, Run<T>)> + '_ {
        self.runs.iter().scan(0usize, |start, run| {
            let at = *start;
            *start += run.len as usize;
            Some((at, *run))
        })
    }

    pub fn is_canonical(&self) -> bool {
        let sum: usize = self.runs.iter().map(|r| r.len as usize).sum();
        sum == self.total
            && self.runs.iter().all(|r| r.len > 0)
            && self.runs.windows(2).all(|w| w[0].value != w[1].value)
    }

    fn locate(&self, index: usize) -> (usize, usize) {
        let mut start = 0usize;
        for (i, run) in self.runs.iter().enumerate() {
            let end = start + run.len as usize;
            if index < end {
                return (i, index - start);
            }
            start = end;
        }
        unreachable!("run lengths do not cover index {index}")
    }

    fn merge_with_left(&mut self, ri: usize) -> usize {
        if ri > 0 && self.runs[ri - 1].value == self.runs[ri].value {
            self.runs[ri - 1].len += self.runs[ri].len;
            self.runs.remove(ri);
            ri - 1
        } else {
            ri
        }
    }

    fn merge_with_right(&mut self, ri: usize) {
        if ri + 1 < self.runs.len() && self.runs[ri + 1].value == self.runs[ri].value {
            self.runs[ri].len += self.runs[ri + 1].len;
            self.runs.remove(ri + 1);
        }
    }

    /// Append a run, folding it into the last one when the values match.
    fn push_run(&mut self, len: usize, value: T) {
        if len == 0 {
            return;
        }
        self.total += len;
        match self.runs.last_mut() {
            Some(last) if last.value == value => last.len += len as u32,
            _ => self.runs.push(Run {
                len: len as u32,
                value,
            }),
        }
    }
}

impl<T: Copy + PartialEq + BinaryCodec> RunList<T> {
    /// Run count as i32, then `(i32 len, value)` per run.
    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        (self.runs.len() as i32).encode(out)?;
        for run in &self.runs {
            (run.len as i32).encode(out)?;
            run.value.encode(out)?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(input: &mut R) -> Result<Self, CodecError> {
        Self::read_bounded(input, u32::MAX as usize)
    }

    /// Like [`RunList::read_from`], rejecting data that decodes to more than `limit` elements
    /// before any of it is stored.
    pub fn read_bounded<R: Read>(input: &mut R, limit: usize) -> Result<Self, CodecError> {
        let limit = limit.min(u32::MAX as usize);
        let count = i32::decode(input)?;
        if count < 0 {
            return Err(CodecError::NegativeCount(count));
        }
        if count as usize > limit {
            return Err(CodecError::TooManyRuns { count, limit });
        }
        let mut list = Self::new();
        list.runs.reserve((count as usize).min(1 << 16));
        for index in 0..count as usize {
            let len = i32::decode(input)?;
            if len <= 0 {
                return Err(CodecError::BadRunLength { index, len });
            }
            let value = T::decode(input)?;
            // total stays within u32, so folding into the last run cannot overflow
            list.total
                .checked_add(len as usize)
                .filter(|&total| total <= limit)
                .ok_or(CodecError::LengthOverflow { index, limit })?;
            list.push_run(len as usize, value);
        }
        Ok(list)
    }
}

impl<T: Copy + PartialEq> FromIterator<T> for RunList<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut list = Self::new();
        for v in iter {
            list.push_run(1, v);
        }
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(list: &RunList<u8>) -> Vec<(u32, u8)> {
        list.runs().iter().map(|r| (r.len, r.value)).collect()
    }

    #[test]
    fn empty_input_has_no_runs() {
        let list = RunList::<u8>::compress(&[]);
        assert!(list.is_empty());
        assert_eq!(list.run_count(), 0);
        assert!(list.decompress().is_empty());
    }

    #[test]
    fn interior_set_splits_run() {
        let mut list = RunList::compress(&[1u8; 5]);
        assert!(list.set(2, 7));
        assert_eq!(values(&list), vec![(2, 1), (1, 7), (2, 1)]);
    }

    #[test]
    fn front_set_merges_into_left_neighbor() {
        let mut list = RunList::compress(&[4u8, 4, 9, 9, 9]);
        list.set(2, 4);
        assert_eq!(values(&list), vec![(3, 4), (2, 9)]);
    }

    #[test]
    fn back_set_merges_into_right_neighbor() {
        let mut list = RunList::compress(&[9u8, 9, 9, 4, 4]);
        list.set(2, 4);
        assert_eq!(values(&list), vec![(2, 9), (3, 4)]);
    }

    #[test]
    fn lone_run_collapses_three_ways() {
        let mut list = RunList::compress(&[1u8, 1, 2, 1, 1]);
        assert_eq!(list.run_count(), 3);
        list.set(2, 1);
        assert_eq!(values(&list), vec![(5, 1)]);
    }

    #[test]
    fn equal_value_is_a_noop() {
        let mut list = RunList::compress(&[3u8, 3, 5]);
        assert!(!list.set(1, 3));
        assert_eq!(list.run_count(), 2);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn set_past_end_panics() {
        let mut list = RunList::compress(&[0u8; 4]);
        list.set(4, 1);
    }

    #[test]
    fn decode_folds_adjacent_equal_runs() {
        let mut bytes = Vec::new();
        2i32.encode(&mut bytes).unwrap();
        for _ in 0..2 {
            3i32.encode(&mut bytes).unwrap();
            7u8.encode(&mut bytes).unwrap();
        }
        let list = RunList::<u8>::read_from(&mut &bytes[..]).unwrap();
        assert_eq!(values(&list), vec![(6, 7)]);
    }

    #[test]
    fn decode_rejects_zero_length_run() {
        let mut bytes = Vec::new();
        1i32.encode(&mut bytes).unwrap();
        0i32.encode(&mut bytes).unwrap();
        1u8.encode(&mut bytes).unwrap();
        let err = RunList::<u8>::read_from(&mut &bytes[..]).unwrap_err();
        assert!(matches!(err, CodecError::BadRunLength { index: 0, len: 0 }));
    }

    fn encoded_runs(runs: &[(i32, u8)]) -> Vec<u8> {
        let mut bytes = Vec::new();
        (runs.len() as i32).encode(&mut bytes).unwrap();
        for (len, value) in runs {
            len.encode(&mut bytes).unwrap();
            value.encode(&mut bytes).unwrap();
        }
        bytes
    }

    #[test]
    fn decode_rejects_folded_length_overflow() {
        let bytes = encoded_runs(&[(i32::MAX, 0), (i32::MAX, 0), (i32::MAX, 0)]);
        let err = RunList::<u8>::read_from(&mut &bytes[..]).unwrap_err();
        assert!(matches!(err, CodecError::LengthOverflow { index: 2, .. }));
    }

    #[test]
    fn bounded_decode_rejects_total_past_limit() {
        let bytes = encoded_runs(&[(60, 1), (60, 2)]);
        let err = RunList::<u8>::read_bounded(&mut &bytes[..], 64).unwrap_err();
        assert!(matches!(err, CodecError::LengthOverflow { index: 1, limit: 64 }));
        let list = RunList::<u8>::read_bounded(&mut &bytes[..], 120).unwrap();
        assert_eq!(list.len(), 120);
    }

    #[test]
    fn bounded_decode_rejects_run_count_past_limit() {
        let mut bytes = Vec::new();
        i32::MAX.encode(&mut bytes).unwrap();
        let err = RunList::<u8>::read_bounded(&mut &bytes[..], 128).unwrap_err();
        assert!(matches!(err, CodecError::TooManyRuns { count: i32::MAX, limit: 128 }));
    }

    #[test]
    fn decode_reports_truncation() {
        let mut bytes = Vec::new();
        4i32.encode(&mut bytes).unwrap();
        let err = RunList::<u8>::read_from(&mut &bytes[..]).unwrap_err();
        assert!(matches!(err, CodecError::Truncated));
    }
}
