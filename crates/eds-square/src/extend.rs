/// Erasure extension of one half-row (or half-column) of shares.
///
/// Given the `k` original shares of a row, an extender produces the `k`
/// parity shares that complete it. Implementations must be deterministic:
/// the store rebuilds the three parity quadrants from the first quadrant on
/// every read and compares the resulting data root against the stored one.
pub trait Extender: Send + Sync {
    fn extend(&self, half: &[&[u8]]) -> Vec<Vec<u8>>;
}

/// Systematic XOR parity: parity share `j` is `half[j] ^ half[(j + 1) % k]`.
///
/// Enough to re-derive a square from its first quadrant; it cannot repair
/// missing shares. Production deployments plug a Reed-Solomon coder in
/// through [`Extender`].
#[derive(Clone, Copy, Debug, Default)]
pub struct XorExtender;

impl Extender for XorExtender {
    fn extend(&self, half: &[&[u8]]) -> Vec<Vec<u8>> {
        let k = half.len();
        (0..k)
            .map(|j| {
                let next = half[(j + 1) % k];
                half[j].iter().zip(next).map(|(a, b)| a ^ b).collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xor_parity_of_two() {
        let a = [0b1010u8, 0xFF];
        let b = [0b0110u8, 0x0F];
        let parity = XorExtender.extend(&[&a, &b]);
        assert_eq!(parity, vec![vec![0b1100, 0xF0], vec![0b1100, 0xF0]]);
    }

    #[test]
    fn single_share_extends_to_zeros() {
        let parity = XorExtender.extend(&[&[7u8, 7, 7]]);
        assert_eq!(parity, vec![vec![0, 0, 0]]);
    }

    #[test]
    fn extension_keeps_share_size() {
        let shares: Vec<Vec<u8>> = (0u8..4).map(|i| vec![i; 9]).collect();
        let refs: Vec<&[u8]> = shares.iter().map(Vec::as_slice).collect();
        let parity = XorExtender.extend(&refs);
        assert_eq!(parity.len(), 4);
        assert!(parity.iter().all(|p| p.len() == 9));
    }
}
