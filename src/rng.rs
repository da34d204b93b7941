/// Seeded mulberry32 generator. Every server-side match decision draws from
/// one of these so a match can be replayed from its seed.
#[derive(Clone, Debug)]
pub struct Rng {
    state: u32,
}

impl Rng {
    pub fn new(seed: u32) -> Self {
        Self { state: seed }
    }

    pub fn next_u32(&mut self) -> u32 {
        self.state = self.state.wrapping_add(0x6d2b79f5);
        let mut t = self.state;
        t = (t ^ (t >> 15)).wrapping_mul(t | 1);
        t ^= t.wrapping_add((t ^ (t >> 7)).wrapping_mul(t | 61));
        t ^ (t >> 14)
    }

    /// Uniform index in `0..len`. Returns 0 for an empty or single range.
    pub fn pick_index(&mut self, len: usize) -> usize {
        if len <= 1 {
            return 0;
        }
        ((self.next_u32() as u64 * len as u64) >> 32) as usize
    }

    /// Uniform value in `min..max` (exclusive upper bound).
    pub fn range(&mut self, min: usize, max: usize) -> usize {
        if max <= min + 1 {
            return min;
        }
        min + self.pick_index(max - min)
    }

    /// In-place Fisher-Yates shuffle.
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        let len = items.len();
        for i in 0..len {
            let j = self.range(i, len);
            items.swap(i, j);
        }
    }

    /// Draws `count` distinct indices from `0..len` without replacement.
    /// Returns fewer than `count` only when `len < count`.
    pub fn sample_indices(&mut self, len: usize, count: usize) -> Vec<usize> {
        let mut pool: Vec<usize> = (0..len).collect();
        let take = count.min(len);
        for i in 0..take {
            let j = self.range(i, len);
            pool.swap(i, j);
        }
        pool.truncate(take);
        pool
    }
}
