/// Power-of-two ring of recent samples for one channel, addressed by absolute
/// sample index.
///
/// Only the most recent `capacity()` samples are retained; reading an index
/// that has already been overwritten (or not yet written) is a logic error.
#[derive(Debug, Clone)]
pub struct SampleRing {
    data: Vec<f32>,
    mask: usize,
    next: u64,
}

impl SampleRing {
    /// Create a ring holding at least `min_len` samples.
    pub fn with_capacity(min_len: usize) -> Self {
        let size = min_len.max(1).next_power_of_two();
        Self {
            data: vec![0.0; size],
            mask: size - 1,
            next: 0,
        }
    }

    /// Append a sample and return the index it was stored at.
    pub fn push(&mut self, value: f32) -> u64 {
        let index = self.next;
        self.data[(index as usize) & self.mask] = value;
        self.next += 1;
        index
    }

    #[inline]
    pub fn get(&self, index: u64) -> f32 {
        debug_assert!(
            self.contains(index),
            "sample {} outside ring [{}, {})",
            index,
            self.first_index(),
            self.next
        );
        self.data[(index as usize) & self.mask]
    }

    pub fn contains(&self, index: u64) -> bool {
        index < self.next && index >= self.first_index()
    }

    /// Oldest index still held.
    pub fn first_index(&self) -> u64 {
        self.next.saturating_sub(self.data.len() as u64)
    }

    /// Index the next pushed sample will receive (equals the number of samples pushed).
    pub fn next_index(&self) -> u64 {
        self.next
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.next == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_rounds_up_to_power_of_two() {
        assert_eq!(SampleRing::with_capacity(100).capacity(), 128);
        assert_eq!(SampleRing::with_capacity(64).capacity(), 64);
        assert_eq!(SampleRing::with_capacity(0).capacity(), 1);
    }

    #[test]
    fn test_wraps_and_keeps_recent_samples() {
        let mut ring = SampleRing::with_capacity(4);
        for i in 0..10 {
            assert_eq!(ring.push(i as f32), i);
        }
        assert_eq!(ring.first_index(), 6);
        assert_eq!(ring.next_index(), 10);
        assert!(!ring.contains(5));
        assert!(ring.contains(6));
        assert!(!ring.contains(10));
        assert_eq!(ring.get(6), 6.0);
        assert_eq!(ring.get(9), 9.0);
    }
}
