//! Serial reference radix sort.
//!
//! Single-threaded LSD radix sort over one global histogram per pass. It is
//! the correctness oracle for the parallel pipeline and the CPU baseline in
//! benchmarks.
//!
//! Complexity: O(n * k) where k = ceil(32 / radix_bits) passes

use crate::config::DEFAULT_RADIX_BITS;
use crate::digit::{self, digit_at};
use crate::stages::histogram::count_digits;

/// Sort a slice in-place using LSD radix sort with 4-bit digits.
pub fn sort(data: &mut [u32]) {
    sort_with_radix(data, DEFAULT_RADIX_BITS);
}

/// Sort a slice in-place using LSD radix sort with `radix_bits`-wide digits.
///
/// # Panics
///
/// If `radix_bits` is not in `1..=16`.
pub fn sort_with_radix(data: &mut [u32], radix_bits: u32) {
    assert!(
        (1..=16).contains(&radix_bits),
        "radix_bits must be in 1..=16, got {radix_bits}"
    );
    if data.len() <= 1 {
        return;
    }

    let mut temp = vec![0u32; data.len()];
    let mut histogram = vec![0u32; 1 << radix_bits];

    for pass in 0..digit::pass_count(radix_bits) {
        let shift = pass * radix_bits;

        histogram.fill(0);
        count_digits(data, shift, radix_bits, &mut histogram);

        // Convert histogram to prefix sums (exclusive scan)
        let mut sum = 0u32;
        for count in histogram.iter_mut() {
            let c = *count;
            *count = sum;
            sum += c;
        }

        for &value in data.iter() {
            let d = digit_at(value, shift, radix_bits);
            temp[histogram[d] as usize] = value;
            histogram[d] += 1;
        }

        data.copy_from_slice(&temp);
    }
}

/// Check if a slice is sorted in ascending order.
#[inline]
pub fn is_sorted(data: &[u32]) -> bool {
    data.windows(2).all(|w| w[0] <= w[1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_sort_empty() {
        let mut data: Vec<u32> = vec![];
        sort(&mut data);
        assert!(is_sorted(&data));
    }

    #[test]
    fn test_sort_single() {
        let mut data = vec![42u32];
        sort(&mut data);
        assert_eq!(data, vec![42]);
    }

    #[test]
    fn test_sort_sorted() {
        let mut data: Vec<u32> = (0..100).collect();
        sort(&mut data);
        assert_eq!(data, (0..100).collect::<Vec<u32>>());
    }

    #[test]
    fn test_sort_reverse() {
        let mut data: Vec<u32> = (0..100).rev().collect();
        sort(&mut data);
        assert_eq!(data, (0..100).collect::<Vec<u32>>());
    }

    #[test]
    fn test_sort_duplicates() {
        let mut data = vec![5, 3, 5, 1, 3, 5, 1, 1];
        sort(&mut data);
        assert_eq!(data, vec![1, 1, 1, 3, 3, 5, 5, 5]);
    }

    #[test]
    fn test_sort_max_values() {
        let mut data = vec![u32::MAX, 0, u32::MAX / 2, 1, u32::MAX - 1];
        sort(&mut data);
        assert_eq!(data, vec![0, 1, u32::MAX / 2, u32::MAX - 1, u32::MAX]);
    }

    #[test]
    fn test_sort_other_radix_widths() {
        let mut rng = rand::thread_rng();
        let data: Vec<u32> = (0..2000).map(|_| rng.gen()).collect();
        let mut expected = data.clone();
        expected.sort_unstable();

        for radix_bits in [1, 3, 5, 8, 11, 16] {
            let mut actual = data.clone();
            sort_with_radix(&mut actual, radix_bits);
            assert_eq!(actual, expected, "radix_bits {radix_bits}");
        }
    }

    #[test]
    fn test_sort_large_array() {
        let mut rng = rand::thread_rng();
        let mut data: Vec<u32> = (0..100_000).map(|_| rng.gen()).collect();
        let mut expected = data.clone();
        expected.sort();

        sort(&mut data);
        assert_eq!(data, expected);
    }

    #[test]
    fn test_is_sorted() {
        assert!(is_sorted(&[1, 2, 3, 4, 5]));
        assert!(is_sorted(&[1, 1, 1, 1]));
        assert!(is_sorted(&[1]));
        assert!(is_sorted(&[]));
        assert!(!is_sorted(&[5, 4, 3, 2, 1]));
        assert!(!is_sorted(&[1, 3, 2]));
    }
}
