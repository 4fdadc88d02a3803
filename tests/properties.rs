mod common;

use proptest::prelude::*;
use simt_radix_sort::cpu_radix_sort::is_sorted;
use simt_radix_sort::{RadixSorter, SortConfig};

fn sorter(workgroup_size: u32, max_workgroups: u32) -> RadixSorter {
    let config = SortConfig::default()
        .with_workgroup_size(workgroup_size)
        .with_max_workgroups(max_workgroups)
        .with_threads(2);
    RadixSorter::with_config(config).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn sorted_permutation_of_input(
        keys in prop::collection::vec(any::<u32>(), 0..600),
        workgroup_size in prop::sample::select(vec![16u32, 32, 64]),
        max_workgroups in 1u32..8,
    ) {
        let mut sorted = keys.clone();
        sorter(workgroup_size, max_workgroups).sort(&mut sorted).unwrap();
        prop_assert!(is_sorted(&sorted));
        prop_assert!(common::same_multiset(&keys, &sorted));
    }

    #[test]
    fn matches_std_sort_on_narrow_keys(
        keys in prop::collection::vec(0u32..64, 0..400),
    ) {
        let mut expected = keys.clone();
        expected.sort_unstable();
        let mut actual = keys;
        sorter(16, 3).sort(&mut actual).unwrap();
        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn first_pass_is_stable(
        digits in prop::collection::vec(0u32..16, 1..500),
        max_workgroups in 1u32..8,
    ) {
        // The low nibble is the digit, the bits above it the input position.
        let keys: Vec<u32> = digits
            .iter()
            .enumerate()
            .map(|(i, &d)| ((i as u32) << 4) | d)
            .collect();

        let mut data = keys.clone();
        sorter(16, max_workgroups).sort_passes(&mut data, 1).unwrap();

        let mut expected = keys;
        expected.sort_by_key(|&k| k & 0xF);
        prop_assert_eq!(data, expected);
    }
}
