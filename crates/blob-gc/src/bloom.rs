use std::f64::consts::LN_2;

/// Upper bound on probes per item.
const MAX_HASHES: u32 = 32;

/// Bloom filter sized for a target false-positive rate.
///
/// Probe positions come from double hashing over two 64-bit words of a
/// BLAKE3 digest. An inserted item always tests present; an item never
/// inserted tests present with probability close to the configured rate as
/// long as no more than `expected_items` were inserted.
#[derive(Clone, Debug)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_bits: u64,
    num_hashes: u32,
    expected_items: u64,
    inserted: u64,
}

impl BloomFilter {
    /// Dimension a filter for `expected_items` at false-positive rate `fp_rate`.
    ///
    /// `m = ceil(-n ln p / (ln 2)^2)` bits and `k = round(m / n * ln 2)` probes.
    pub fn with_rate(expected_items: u64, fp_rate: f64) -> Self {
        let n = expected_items.max(1) as f64;
        let p = fp_rate.clamp(f64::MIN_POSITIVE, 0.5);
        let m = (-n * p.ln() / (LN_2 * LN_2)).ceil().max(64.0) as u64;
        let k = ((m as f64 / n) * LN_2).round().clamp(1.0, MAX_HASHES as f64) as u32;
        Self::with_size(m, k, expected_items)
    }

    /// A filter with an explicit bit count and probe count.
    pub fn with_size(num_bits: u64, num_hashes: u32, expected_items: u64) -> Self {
        let num_bits = num_bits.max(1);
        let words = num_bits.div_ceil(64) as usize;
        Self {
            bits: vec![0; words],
            num_bits,
            num_hashes: num_hashes.clamp(1, MAX_HASHES),
            expected_items,
            inserted: 0,
        }
    }

    pub fn insert(&mut self, item: &[u8]) {
        let (h1, h2) = probe_seeds(item);
        for i in 0..self.num_hashes {
            let bit = self.position(h1, h2, i);
            self.bits[(bit / 64) as usize] |= 1 << (bit % 64);
        }
        self.inserted += 1;
    }

    pub fn contains(&self, item: &[u8]) -> bool {
        let (h1, h2) = probe_seeds(item);
        (0..self.num_hashes).all(|i| {
            let bit = self.position(h1, h2, i);
            self.bits[(bit / 64) as usize] & (1 << (bit % 64)) != 0
        })
    }

    fn position(&self, h1: u64, h2: u64, i: u32) -> u64 {
        h1.wrapping_add(u64::from(i).wrapping_mul(h2)) % self.num_bits
    }

    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Items inserted so far.
    pub fn len(&self) -> u64 {
        self.inserted
    }

    pub fn is_empty(&self) -> bool {
        self.inserted == 0
    }

    /// More items were inserted than the filter was sized for.
    pub fn is_overfull(&self) -> bool {
        self.inserted > self.expected_items
    }

    /// Expected false-positive rate at the current fill:
    /// `(1 - e^(-k n / m))^k`.
    pub fn estimated_fp_rate(&self) -> f64 {
        let k = f64::from(self.num_hashes);
        let fill = -(k * self.inserted as f64) / self.num_bits as f64;
        (1.0 - fill.exp()).powf(k)
    }
}

fn probe_seeds(item: &[u8]) -> (u64, u64) {
    let digest = blake3::hash(item);
    let bytes = digest.as_bytes();
    let mut a = [0u8; 8];
    let mut b = [0u8; 8];
    a.copy_from_slice(&bytes[..8]);
    b.copy_from_slice(&bytes[8..16]);
    // Odd step so successive probes differ.
    (u64::from_le_bytes(a), u64::from_le_bytes(b) | 1)
}
