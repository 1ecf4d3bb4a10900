//! Multi-channel delay lines
//!
//! One flat buffer holds every channel's ring, sized once at construction.
//! Per-channel delays can be changed at any time without allocating.

/// A set of per-channel delay lines sharing one write position
#[derive(Debug, Clone)]
pub struct MultiChannelDelay {
    buffer: Vec<f64>,
    delays: Vec<usize>,
    channels: usize,
    capacity: usize,
    write: usize,
}

impl MultiChannelDelay {
    /// Create delay lines that can delay up to `max_delay` samples
    ///
    /// Allocates; do not call from the audio thread.
    pub fn new(channels: usize, max_delay: usize) -> Self {
        let capacity = max_delay + 1;
        Self {
            buffer: vec![0.0; channels * capacity],
            delays: vec![0; channels],
            channels,
            capacity,
            write: 0,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn max_delay(&self) -> usize {
        self.capacity - 1
    }

    pub fn delay(&self, channel: usize) -> usize {
        self.delays[channel]
    }

    /// Set the delay of one channel, clamped to the capacity
    pub fn set_delay(&mut self, channel: usize, samples: usize) {
        if channel < self.channels {
            self.delays[channel] = samples.min(self.capacity - 1);
        }
    }

    /// Set the same delay for every channel
    pub fn set_all_delays(&mut self, samples: usize) {
        let samples = samples.min(self.capacity - 1);
        self.delays.iter_mut().for_each(|d| *d = samples);
    }

    /// Write `value` for `channel` at the current position and read the
    /// value written `delay` samples ago
    ///
    /// Call [`next`](Self::next) once after all channels have been written.
    #[inline]
    pub fn set_and_get(&mut self, channel: usize, value: f64) -> f64 {
        let base = channel * self.capacity;
        self.buffer[base + self.write] = value;
        let read = if self.write >= self.delays[channel] {
            self.write - self.delays[channel]
        } else {
            self.write + self.capacity - self.delays[channel]
        };
        self.buffer[base + read]
    }

    /// Advance the shared write position by one sample
    #[inline]
    pub fn next(&mut self) {
        self.write += 1;
        if self.write == self.capacity {
            self.write = 0;
        }
    }

    /// Silence the delay lines
    pub fn clear(&mut self) {
        self.buffer.iter_mut().for_each(|x| *x = 0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_delay_is_passthrough() {
        let mut delay = MultiChannelDelay::new(1, 10);
        for i in 0..20 {
            let x = i as f64;
            assert_eq!(delay.set_and_get(0, x), x);
            delay.next();
        }
    }

    #[test]
    fn test_per_channel_delays() {
        let mut delay = MultiChannelDelay::new(2, 8);
        delay.set_delay(0, 3);
        delay.set_delay(1, 5);

        let mut out0 = Vec::new();
        let mut out1 = Vec::new();
        for i in 0..12 {
            let x = (i + 1) as f64;
            out0.push(delay.set_and_get(0, x));
            out1.push(delay.set_and_get(1, x));
            delay.next();
        }
        assert_eq!(out0[3], 1.0);
        assert_eq!(out0[11], 9.0);
        assert_eq!(out1[5], 1.0);
        assert_eq!(out1[4], 0.0);
    }

    #[test]
    fn test_delay_clamped_to_capacity() {
        let mut delay = MultiChannelDelay::new(1, 4);
        delay.set_delay(0, 100);
        assert_eq!(delay.delay(0), 4);
    }

    #[test]
    fn test_clear_silences_history() {
        let mut delay = MultiChannelDelay::new(1, 4);
        delay.set_delay(0, 2);
        for _ in 0..4 {
            delay.set_and_get(0, 1.0);
            delay.next();
        }
        delay.clear();
        assert_eq!(delay.set_and_get(0, 0.5), 0.0);
    }
}
