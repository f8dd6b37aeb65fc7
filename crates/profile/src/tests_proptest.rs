//! Property-based tests for profile derivation and lookup.

#[cfg(test)]
mod proptest_tests {
    use std::collections::BTreeSet;

    use proptest::prelude::*;

    use crate::matrix::{PluginMatrix, UsageStats};
    use crate::selector::ProfileSet;
    use crate::version::RuntimeVersion;

    const RUNTIMES: [&str; 3] = ["alpha", "beta", "gamma"];

    fn matrix_strategy() -> impl Strategy<Value = PluginMatrix> {
        prop::collection::vec((0usize..6, 0usize..3, 1u64..100), 0..18).prop_map(|entries| {
            let mut matrix = PluginMatrix::new();
            for (plugin, runtime, major) in entries {
                matrix.insert(
                    &format!("plugin-{plugin}"),
                    RUNTIMES[runtime],
                    RuntimeVersion::new(major, 0, 0),
                );
            }
            matrix
        })
    }

    fn stats_strategy() -> impl Strategy<Value = UsageStats> {
        prop::collection::vec((0usize..3, 1u64..100, 0.0f64..1.0), 0..9).prop_map(|entries| {
            let mut stats = UsageStats::default();
            for (runtime, major, weight) in entries {
                stats.insert(RUNTIMES[runtime], RuntimeVersion::new(major, 0, 0), weight);
            }
            stats
        })
    }

    proptest! {
        /// A lower runtime version never receives fewer transforms than a
        /// higher one.
        #[test]
        fn lookup_is_monotonic_in_version(
            matrix in matrix_strategy(),
            stats in stats_strategy(),
            count in 1usize..5,
            runtime in 0usize..4,
            first in 0u64..120,
            second in 0u64..120,
        ) {
            let set = ProfileSet::build(&matrix, &stats, count).unwrap();
            // Index 3 is a runtime the matrix never mentions.
            let runtime = ["alpha", "beta", "gamma", "delta"][runtime];
            let low = RuntimeVersion::new(first.min(second), 0, 0);
            let high = RuntimeVersion::new(first.max(second), 0, 0);
            let low_count = set.lookup(runtime, low).plugin_names.len();
            let high_count = set.lookup(runtime, high).plugin_names.len();
            prop_assert!(low_count >= high_count);
        }

        /// The derived family never exceeds the requested size, and profiles
        /// come out ordered from fewest to most plugins.
        #[test]
        fn family_is_bounded_and_ordered(
            matrix in matrix_strategy(),
            stats in stats_strategy(),
            count in 1usize..5,
        ) {
            let set = ProfileSet::build(&matrix, &stats, count).unwrap();
            prop_assert!(set.profiles().len() <= count);
            for pair in set.profiles().windows(2) {
                prop_assert!(pair[0].plugin_names.len() <= pair[1].plugin_names.len());
            }
        }

        /// Whatever lookup returns only ever applies plugins the matrix
        /// knows, all of which the fallback profile also applies.
        #[test]
        fn lookup_stays_within_fallback(
            matrix in matrix_strategy(),
            stats in stats_strategy(),
            count in 1usize..5,
            major in 0u64..120,
        ) {
            let set = ProfileSet::build(&matrix, &stats, count).unwrap();
            let fallback: BTreeSet<&str> = set
                .fallback()
                .plugin_names
                .iter()
                .map(String::as_str)
                .collect();
            for runtime in RUNTIMES {
                let profile = set.lookup(runtime, RuntimeVersion::new(major, 0, 0));
                for name in &profile.plugin_names {
                    prop_assert!(fallback.contains(name.as_str()));
                }
            }
        }
    }
}
