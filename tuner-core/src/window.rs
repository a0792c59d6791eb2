//! # Analysis Window Module
//!
//! A fixed-length ring buffer turning the stream of capture blocks into a
//! sliding analysis window. The window length is independent of the block
//! size: a 4096-sample block can feed a 22050-sample window, and a block
//! longer than the window simply keeps its most recent samples.
//!
//! The window is owned by the analysis thread, so `push` and `snapshot`
//! cannot interleave.

/// Sliding window over the most recent `capacity` samples.
#[derive(Debug, Clone)]
pub struct AnalysisWindow {
    buffer: Vec<f32>,
    /// Index of the oldest sample, which is also the next slot to overwrite.
    write_pos: usize,
    /// Total samples pushed since creation or the last clear, saturating.
    pushed: usize,
}

impl AnalysisWindow {
    /// Creates a zero-filled window of `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0.0; capacity],
            write_pos: 0,
            pushed: 0,
        }
    }

    /// Number of samples in the window.
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Whether at least `capacity` real samples have arrived since the last clear.
    pub fn is_filled(&self) -> bool {
        self.pushed >= self.buffer.len()
    }

    /// Appends samples, overwriting the oldest ones.
    pub fn push(&mut self, samples: &[f32]) {
        let capacity = self.buffer.len();
        if capacity == 0 {
            return;
        }
        self.pushed = self.pushed.saturating_add(samples.len());

        // Only the newest `capacity` samples can survive
        let samples = &samples[samples.len().saturating_sub(capacity)..];

        let first = samples.len().min(capacity - self.write_pos);
        self.buffer[self.write_pos..self.write_pos + first].copy_from_slice(&samples[..first]);
        let rest = &samples[first..];
        self.buffer[..rest.len()].copy_from_slice(rest);

        self.write_pos = (self.write_pos + samples.len()) % capacity;
    }

    /// Returns the window contents from oldest to newest.
    pub fn snapshot(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.buffer.len());
        self.snapshot_into(&mut out);
        out
    }

    /// Copies the window contents, oldest first, into `out`, reusing its allocation.
    pub fn snapshot_into(&self, out: &mut Vec<f32>) {
        out.clear();
        out.extend_from_slice(&self.buffer[self.write_pos..]);
        out.extend_from_slice(&self.buffer[..self.write_pos]);
    }

    /// Zeroes the window.
    pub fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
        self.pushed = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_zeroed_and_keeps_fixed_length() {
        let mut window = AnalysisWindow::new(4);
        assert_eq!(window.snapshot(), vec![0.0; 4]);
        assert!(!window.is_filled());

        window.push(&[1.0, 2.0]);
        assert_eq!(window.snapshot(), vec![0.0, 0.0, 1.0, 2.0]);
        assert!(!window.is_filled());
    }

    #[test]
    fn overwrites_oldest_samples_in_order() {
        let mut window = AnalysisWindow::new(5);
        window.push(&[1.0, 2.0, 3.0]);
        window.push(&[4.0, 5.0, 6.0]);
        assert_eq!(window.snapshot(), vec![2.0, 3.0, 4.0, 5.0, 6.0]);
        assert!(window.is_filled());

        window.push(&[7.0]);
        assert_eq!(window.snapshot(), vec![3.0, 4.0, 5.0, 6.0, 7.0]);
    }

    #[test]
    fn block_longer_than_window_keeps_the_tail() {
        let mut window = AnalysisWindow::new(3);
        window.push(&[9.0]);
        window.push(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        assert_eq!(window.snapshot(), vec![5.0, 6.0, 7.0]);
    }

    #[test]
    fn snapshot_is_a_copy() {
        let mut window = AnalysisWindow::new(3);
        window.push(&[1.0, 2.0, 3.0]);
        let before = window.snapshot();
        window.push(&[4.0]);
        assert_eq!(before, vec![1.0, 2.0, 3.0]);

        let mut reused = vec![42.0; 10];
        window.snapshot_into(&mut reused);
        assert_eq!(reused, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn clear_resets_contents() {
        let mut window = AnalysisWindow::new(3);
        window.push(&[1.0, 2.0, 3.0, 4.0]);
        window.clear();
        assert_eq!(window.snapshot(), vec![0.0; 3]);
        assert!(!window.is_filled());
    }
}
