// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

use googletest::assert_that;
use googletest::prelude::contains_substring;
use googletest::prelude::ge;
use googletest::prelude::le;
use googletest::prelude::near;
use quantileflow::ddsketch::BucketPolicy;
use quantileflow::ddsketch::DDSketch;
use quantileflow::ddsketch::MappingKind;
use quantileflow::error::ErrorKind;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

const MAPPINGS: [MappingKind; 3] = [
    MappingKind::Logarithmic,
    MappingKind::LinearInterpolation,
    MappingKind::CubicInterpolation,
];

fn sketch_with(mapping: MappingKind, policy: BucketPolicy) -> DDSketch {
    DDSketch::builder()
        .relative_accuracy(0.01)
        .mapping(mapping)
        .bucket_policy(policy)
        .build()
        .unwrap()
}

fn random_values(seed: u64, n: usize) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| (rng.random::<f64>() * 12.0 - 6.0).exp())
        .collect()
}

// value of rank round(q * (n - 1)) in a sorted sample
fn order_statistic(sorted: &[f64], q: f64) -> f64 {
    sorted[(q * (sorted.len() - 1) as f64).round() as usize]
}

#[test]
fn test_invalid_config() {
    for accuracy in [0.0, 1.0, -0.1, 1.5, f64::NAN] {
        let err = DDSketch::new(accuracy).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }
    let err = DDSketch::builder()
        .bucket_policy(BucketPolicy::Fixed { max_buckets: 0 })
        .build()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    assert_that!(err.message(), contains_substring("max_buckets"));
}

#[test]
fn test_defaults() {
    let sketch = DDSketch::new(0.01).unwrap();
    assert_eq!(sketch.relative_accuracy(), 0.01);
    assert_eq!(sketch.mapping_kind(), MappingKind::Logarithmic);
    assert_eq!(sketch.bucket_policy(), BucketPolicy::Unlimited);
    assert!(sketch.negative_values());
    assert!(sketch.is_empty());
    assert_eq!(sketch.storage_footprint(), 0);
}

#[test]
fn test_empty() {
    let sketch = DDSketch::new(0.01).unwrap();
    assert_eq!(sketch.count(), 0);
    assert_eq!(
        sketch.quantile(0.5).unwrap_err().kind(),
        ErrorKind::EmptySketch
    );
    assert_eq!(
        sketch.summary_statistics().unwrap_err().kind(),
        ErrorKind::EmptySketch
    );
    assert_eq!(sketch.min_value().unwrap_err().kind(), ErrorKind::EmptySketch);
}

#[test]
fn test_invalid_rank() {
    let mut sketch = DDSketch::new(0.01).unwrap();
    sketch.insert(1.0).unwrap();
    for rank in [-0.1, 1.1, f64::NAN] {
        let err = sketch.quantile(rank).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_that!(err.message(), contains_substring("rank"));
    }
}

#[test]
fn test_median_of_one_to_hundred() {
    let mut sketch = DDSketch::new(0.01).unwrap();
    for i in 1..=100 {
        sketch.insert(i as f64).unwrap();
    }
    assert_eq!(sketch.count(), 100);
    let median = sketch.quantile(0.5).unwrap();
    assert_that!(median, ge(49.5 * 0.99));
    assert_that!(median, le(50.5 * 1.01));
}

#[test]
fn test_insert_positive() {
    let mut sketch = DDSketch::new(0.01).unwrap();
    for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
        sketch.insert(v).unwrap();
    }
    assert_eq!(sketch.count(), 5);
    assert_that!(sketch.quantile(0.5).unwrap(), near(3.0, 3.0 * 0.01));
}

#[test]
fn test_insert_negative() {
    let mut sketch = DDSketch::new(0.01).unwrap();
    for v in [-1.0, -2.0, -3.0, -4.0, -5.0] {
        sketch.insert(v).unwrap();
    }
    assert_eq!(sketch.count(), 5);
    assert_that!(sketch.quantile(0.5).unwrap(), near(-3.0, 3.0 * 0.01));
    assert_that!(sketch.quantile(0.0).unwrap(), near(-5.0, 5.0 * 0.01));
    assert_that!(sketch.quantile(1.0).unwrap(), near(-1.0, 0.0101));
}

#[test]
fn test_insert_mixed() {
    let mut sketch = DDSketch::new(0.01).unwrap();
    for v in [-2.0, -1.0, 0.0, 1.0, 2.0] {
        sketch.insert(v).unwrap();
    }
    assert_eq!(sketch.count(), 5);
    assert_eq!(sketch.zero_count(), 1);
    assert_eq!(sketch.quantile(0.5).unwrap(), 0.0);
    assert_that!(sketch.quantile(0.25).unwrap(), near(-1.0, 0.0101));
    assert_that!(sketch.quantile(0.75).unwrap(), near(1.0, 0.0101));
}

#[test]
fn test_negative_values_disabled() {
    let mut sketch = DDSketch::builder().negative_values(false).build().unwrap();
    sketch.insert(1.0).unwrap();
    let err = sketch.insert(-1.0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValueOutOfDomain);
    assert_eq!(sketch.count(), 1);
    assert!(sketch.negative_store().is_empty());
}

#[test]
fn test_non_finite_rejected() {
    let mut sketch = DDSketch::new(0.01).unwrap();
    sketch.insert(2.0).unwrap();
    let before = sketch.clone();
    for v in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, f64::MAX] {
        let err = sketch.insert(v).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueOutOfDomain);
    }
    assert_eq!(sketch, before);
}

#[test]
fn test_tiny_values_count_as_zero() {
    let mut sketch = DDSketch::new(0.01).unwrap();
    sketch.insert(f64::MIN_POSITIVE / 4.0).unwrap();
    sketch.insert(-0.0).unwrap();
    assert_eq!(sketch.zero_count(), 2);
    assert_eq!(sketch.quantile(1.0).unwrap(), 0.0);
}

#[test]
fn test_extreme_values() {
    let mut sketch = DDSketch::new(0.01).unwrap();
    sketch.insert(1e-100).unwrap();
    sketch.insert(1e100).unwrap();
    assert_eq!(sketch.count(), 2);
    assert_that!(sketch.quantile(0.0).unwrap(), near(1e-100, 2e-102));
    assert_that!(sketch.quantile(1.0).unwrap(), near(1e100, 2e98));
}

#[test]
fn test_delete() {
    let mut sketch = DDSketch::new(0.01).unwrap();
    for v in [1.0, 2.0, 2.0, 3.0, -4.0, 0.0] {
        sketch.insert(v).unwrap();
    }

    assert!(sketch.delete(2.0).unwrap());
    assert_eq!(sketch.count(), 5);
    assert!(sketch.delete(-4.0).unwrap());
    assert!(sketch.delete(0.0).unwrap());
    assert_eq!(sketch.count(), 3);

    // empty buckets leave the sketch untouched
    let before = sketch.clone();
    assert!(!sketch.delete(10.0).unwrap());
    assert!(!sketch.delete(-4.0).unwrap());
    assert!(!sketch.delete(0.0).unwrap());
    assert_eq!(sketch, before);

    let err = sketch.delete(f64::NAN).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValueOutOfDomain);
}

#[test]
fn test_accuracy_per_mapping() {
    let values = random_values(7, 20_000);
    let mut sorted = values.clone();
    sorted.sort_by(f64::total_cmp);

    for mapping in MAPPINGS {
        let mut sketch = sketch_with(mapping, BucketPolicy::Unlimited);
        assert!(sketch.insert_batch(&values).is_complete());
        let bound = sketch.mapping().relative_error_bound() + 1e-12;
        assert_that!(bound, le(0.01 + mapping.error_slack(0.01) + 1e-12));

        for i in 0..=100 {
            let q = i as f64 / 100.0;
            let expected = order_statistic(&sorted, q);
            let actual = sketch.quantile(q).unwrap();
            let error = (actual - expected).abs() / expected;
            assert!(
                error <= bound,
                "{mapping:?}: q={q} expected {expected} got {actual}"
            );
        }
    }
}

#[test]
fn test_accuracy_with_negative_values() {
    let mut rng = StdRng::seed_from_u64(11);
    let values: Vec<f64> = random_values(13, 5_000)
        .into_iter()
        .map(|v| if rng.random::<bool>() { -v } else { v })
        .collect();
    let mut sorted = values.clone();
    sorted.sort_by(f64::total_cmp);

    for mapping in MAPPINGS {
        let mut sketch = sketch_with(mapping, BucketPolicy::Unlimited);
        assert!(sketch.insert_batch(&values).is_complete());
        let bound = sketch.mapping().relative_error_bound() + 1e-12;
        for i in 0..=50 {
            let q = i as f64 / 50.0;
            let expected = order_statistic(&sorted, q);
            let actual = sketch.quantile(q).unwrap();
            assert!((actual - expected).abs() <= bound * expected.abs());
        }
    }
}

#[test]
fn test_monotonicity() {
    let mut rng = StdRng::seed_from_u64(3);
    for policy in [
        BucketPolicy::Unlimited,
        BucketPolicy::Dynamic,
        BucketPolicy::Fixed { max_buckets: 64 },
    ] {
        let mut sketch = sketch_with(MappingKind::CubicInterpolation, policy);
        for _ in 0..10_000 {
            let v = (rng.random::<f64>() * 20.0 - 10.0).exp() * (rng.random::<f64>() - 0.3);
            sketch.insert(v).unwrap();
        }
        let mut previous = f64::NEG_INFINITY;
        for i in 0..=200 {
            let q = sketch.quantile(i as f64 / 200.0).unwrap();
            assert_that!(q, ge(previous));
            previous = q;
        }
    }
}

#[test]
fn test_boundary_quantiles() {
    let values = random_values(5, 1_000);
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let mut sketch = DDSketch::new(0.01).unwrap();
    sketch.insert_batch(&values);
    assert_that!(sketch.min_value().unwrap(), near(min, min * 0.0101));
    assert_that!(sketch.max_value().unwrap(), near(max, max * 0.0101));
}

#[test]
fn test_fixed_policy_bounds_buckets() {
    let mut sketch = sketch_with(
        MappingKind::Logarithmic,
        BucketPolicy::Fixed { max_buckets: 64 },
    );
    for v in random_values(17, 10_000) {
        sketch.insert(v).unwrap();
        sketch.insert(-v).unwrap();
    }
    assert_eq!(sketch.count(), 20_000);
    assert_that!(sketch.positive_store().footprint(), le(64));
    assert_that!(sketch.negative_store().footprint(), le(64));
    assert_that!(sketch.storage_footprint(), le(128));
}

#[test]
fn test_fixed_policy_collapses_sparse_tail() {
    let mut sketch = sketch_with(
        MappingKind::Logarithmic,
        BucketPolicy::Fixed { max_buckets: 10 },
    );
    for _ in 0..1000 {
        sketch.insert(1.0).unwrap();
    }
    sketch.insert(2.0).unwrap();

    assert_eq!(sketch.count(), 1001);
    assert_that!(sketch.storage_footprint(), le(10));
    assert_that!(sketch.quantile(0.0).unwrap(), near(1.0, 0.0101));
    // the lone large value was folded into the buckets next to the bulk
    assert_that!(sketch.quantile(1.0).unwrap(), le(1.5));
}

#[test]
fn test_dynamic_policy_grows_with_count() {
    let mut sketch = sketch_with(MappingKind::Logarithmic, BucketPolicy::Dynamic);
    let mut rng = StdRng::seed_from_u64(23);
    for _ in 0..100_000 {
        sketch.insert((rng.random::<f64>() * 40.0).exp()).unwrap();
    }
    let limit = BucketPolicy::dynamic_limit(100_000);
    assert_eq!(limit, 500);
    assert_that!(sketch.positive_store().footprint(), le(limit));
    assert_eq!(sketch.count(), 100_000);
}

#[test]
fn test_every_policy_answers_median() {
    for policy in [
        BucketPolicy::Fixed { max_buckets: 1000 },
        BucketPolicy::fixed(),
        BucketPolicy::Dynamic,
        BucketPolicy::Unlimited,
    ] {
        let mut sketch = sketch_with(MappingKind::Logarithmic, policy);
        for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
            sketch.insert(v).unwrap();
        }
        assert_that!(sketch.quantile(0.5).unwrap(), near(3.0, 3.0 * 0.01));
    }
}

#[test]
fn test_insert_batch_reports_rejections() {
    let mut sketch = DDSketch::builder().negative_values(false).build().unwrap();
    let outcome = sketch.insert_batch(&[1.0, f64::NAN, 2.0, f64::INFINITY, -3.0]);
    assert_eq!(outcome.inserted(), 2);
    assert!(!outcome.is_complete());
    let positions: Vec<usize> = outcome.rejected().iter().map(|r| r.position).collect();
    assert_eq!(positions, vec![1, 3, 4]);
    assert_eq!(outcome.rejected()[2].value, -3.0);
    assert_eq!(sketch.count(), 2);

    let err = outcome.into_result().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValueOutOfDomain);
    assert!(err.context().iter().any(|(key, value)| *key == "position" && value == "1"));
}

#[test]
fn test_summary_statistics() {
    let mut sketch = DDSketch::new(0.01).unwrap();
    for i in 1..=100 {
        sketch.insert(i as f64).unwrap();
    }
    let stats = sketch.summary_statistics().unwrap();
    assert_eq!(stats.count, 100);
    assert!(!stats.degraded);
    assert_that!(stats.min.unwrap(), near(1.0, 0.0101));
    assert_that!(stats.max.unwrap(), near(100.0, 1.0));
    assert_that!(stats.median.unwrap(), near(51.0, 0.51));
    assert_that!(stats.q1.unwrap(), near(26.0, 0.26));
    assert_that!(stats.q3.unwrap(), near(75.0, 0.75));
    assert_that!(stats.mean.unwrap(), near(50.5, 0.505));
    assert_that!(stats.variance.unwrap(), near(833.25, 833.25 * 0.05));
    assert_that!(stats.skewness.unwrap(), near(0.0, 0.05));
}

#[test]
fn test_storage_footprint() {
    let mut sketch = DDSketch::new(0.01).unwrap();
    for v in [1.0, 2.0, 3.0, 4.0, 5.0, 5.0, -1.0, 0.0] {
        sketch.insert(v).unwrap();
    }
    assert_eq!(sketch.storage_footprint(), 6);
}

#[test]
fn test_clear() {
    let mut sketch = sketch_with(MappingKind::Logarithmic, BucketPolicy::Dynamic);
    sketch.insert_batch(&random_values(29, 1_000));
    sketch.insert(0.0).unwrap();
    sketch.clear();
    assert!(sketch.is_empty());
    assert_eq!(sketch.zero_count(), 0);
    assert_eq!(sketch.storage_footprint(), 0);
    sketch.insert(4.0).unwrap();
    assert_that!(sketch.quantile(0.5).unwrap(), near(4.0, 0.04));
}

#[test]
fn test_merge_halves() {
    let mut a = DDSketch::new(0.01).unwrap();
    let mut b = DDSketch::new(0.01).unwrap();
    for i in 0..100 {
        a.insert(i as f64).unwrap();
    }
    for i in 100..200 {
        b.insert(i as f64).unwrap();
    }
    a.merge(&b).unwrap();
    assert_eq!(a.count(), 200);
    assert_that!(a.quantile(0.75).unwrap(), near(150.0, 1.5));
}

#[test]
fn test_fixed_budget_survives_serialization() {
    let err = DDSketch::builder()
        .bucket_policy(BucketPolicy::Fixed {
            max_buckets: 1 << 33,
        })
        .build()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    assert_that!(err.message(), contains_substring("max_buckets"));

    let policy = BucketPolicy::Fixed {
        max_buckets: u32::MAX as usize,
    };
    let mut sketch = DDSketch::builder().bucket_policy(policy).build().unwrap();
    for v in 1..=100 {
        sketch.insert(v as f64).unwrap();
    }
    let mut restored = DDSketch::deserialize(&sketch.serialize()).unwrap();
    assert_eq!(restored.bucket_policy(), policy);
    restored.merge(&sketch).unwrap();
    assert_eq!(restored.count(), 200);
}

#[test]
fn test_merge_incompatible() {
    let mut sketch = DDSketch::new(0.01).unwrap();
    sketch.insert(1.0).unwrap();
    let before = sketch.clone();

    let mut others = vec![
        DDSketch::new(0.02).unwrap(),
        sketch_with(MappingKind::LinearInterpolation, BucketPolicy::Unlimited),
        sketch_with(MappingKind::Logarithmic, BucketPolicy::Dynamic),
        DDSketch::builder().negative_values(false).build().unwrap(),
    ];
    for other in others.iter_mut() {
        other.insert(5.0).unwrap();
        let err = sketch.merge(other).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IncompatibleMerge);
        assert_eq!(sketch, before);
    }
}
