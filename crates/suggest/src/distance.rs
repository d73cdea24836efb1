//! Levenshtein edit distance.

/// Edit distance between two strings with unit-cost insert, delete, and
/// substitute. Operates on `char`s, so multi-byte characters count once.
///
/// Symmetric: `distance(a, b) == distance(b, a)`.
pub fn distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    // Two rolling rows of the DP table.
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            let deletion = prev[j + 1] + 1;
            let insertion = curr[j] + 1;
            curr[j + 1] = substitution.min(deletion).min(insertion);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_known_distances() {
        assert_eq!(distance("nvidia-smi", "nvidia-sm"), 1);
        assert_eq!(distance("kitten", "sitting"), 3);
        assert_eq!(distance("", "abc"), 3);
        assert_eq!(distance("abc", ""), 3);
        assert_eq!(distance("sinf", "sinfo"), 1);
        assert_eq!(distance("dcgmi", "dcgim"), 2);
    }

    #[test]
    fn test_identity_is_zero() {
        for s in ["", "a", "nvidia-smi", "scontrol show nodes", "ünïcödé"] {
            assert_eq!(distance(s, s), 0);
        }
    }

    #[test]
    fn test_symmetry_on_random_strings() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let alphabet: Vec<char> = "abcdes-_ü".chars().collect();
        for _ in 0..200 {
            let len_a = rng.gen_range(0..10);
            let len_b = rng.gen_range(0..10);
            let a: String = (0..len_a)
                .map(|_| alphabet[rng.gen_range(0..alphabet.len())])
                .collect();
            let b: String = (0..len_b)
                .map(|_| alphabet[rng.gen_range(0..alphabet.len())])
                .collect();
            assert_eq!(distance(&a, &b), distance(&b, &a), "{a:?} vs {b:?}");
            assert!(distance(&a, &b) <= len_a.max(len_b));
        }
    }
}
