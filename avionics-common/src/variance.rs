#[allow(unused_imports)]
use micromath::F32Ext;

/// Welford running mean and population variance over `N` independent channels.
#[derive(Debug, Clone)]
pub struct RunningStats<const N: usize> {
    count: u32,
    mean: [f32; N],
    m2: [f32; N],
}

impl<const N: usize> RunningStats<N> {
    pub const fn new() -> Self {
        Self {
            count: 0,
            mean: [0.0; N],
            m2: [0.0; N],
        }
    }

    pub fn update(&mut self, sample: [f32; N]) {
        self.count = self.count.saturating_add(1);
        let n = self.count as f32;

        for i in 0..N {
            let delta = sample[i] - self.mean[i];
            self.mean[i] += delta / n;
            self.m2[i] += delta * (sample[i] - self.mean[i]);
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// All zeros before the first sample.
    pub fn mean(&self) -> [f32; N] {
        self.mean
    }

    pub fn variance(&self) -> [f32; N] {
        if self.count == 0 {
            return [0.0; N];
        }
        let n = self.count as f32;
        core::array::from_fn(|i| self.m2[i] / n)
    }

    pub fn std_dev(&self) -> [f32; N] {
        self.variance().map(|v| v.sqrt())
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }
}

impl<const N: usize> Default for RunningStats<N> {
    fn default() -> Self {
        Self::new()
    }
}
