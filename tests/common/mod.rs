#![allow(dead_code)]

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use simt_radix_sort::{RadixSorter, SortConfig};

pub fn seeded_rng(seed: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed)
}

pub fn random_keys(seed: u64, n: usize) -> Vec<u32> {
    let mut rng = seeded_rng(seed);
    (0..n).map(|_| rng.gen()).collect()
}

/// Sorter with small workgroups so modest inputs span many partitions.
pub fn small_sorter() -> RadixSorter {
    RadixSorter::with_config(SortConfig::default().with_workgroup_size(16).with_threads(4))
        .unwrap()
}

/// Verify that `sorted` holds exactly the keys of `original`.
pub fn same_multiset(original: &[u32], sorted: &[u32]) -> bool {
    let mut a = original.to_vec();
    let mut b = sorted.to_vec();
    a.sort_unstable();
    b.sort_unstable();
    a == b
}

pub fn sort_and_verify(sorter: &mut RadixSorter, data: Vec<u32>) {
    let n = data.len();
    let mut expected = data.clone();
    expected.sort();

    let mut actual = data;
    sorter.sort(&mut actual).unwrap();

    assert_eq!(
        actual, expected,
        "Sort mismatch at n={}. First diff at index {}",
        n,
        actual.iter().zip(expected.iter()).position(|(a, b)| a != b).unwrap_or(n)
    );
}
