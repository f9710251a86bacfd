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
use googletest::prelude::ge;
use googletest::prelude::le;
use googletest::prelude::near;
use quantileflow::error::ErrorKind;
use quantileflow::hdr::HdrHistogram;
use quantileflow::hdr::MAX_NUM_BUCKETS;
use quantileflow::hdr::OutOfRangePolicy;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

fn powers_of_two() -> HdrHistogram {
    let mut histogram = HdrHistogram::new(8, 1.0, 256.0).unwrap();
    for exponent in 0..8 {
        histogram.insert(2f64.powi(exponent)).unwrap();
    }
    histogram
}

#[test]
fn test_invalid_config() {
    let cases = [
        (0, 1.0, 10.0),
        (MAX_NUM_BUCKETS + 1, 1.0, 10.0),
        (8, 0.0, 10.0),
        (8, -1.0, 10.0),
        (8, f64::NAN, 10.0),
        (8, 10.0, 10.0),
        (8, 10.0, 5.0),
        (8, 1.0, f64::INFINITY),
    ];
    for (num_buckets, min_value, max_value) in cases {
        let err = HdrHistogram::new(num_buckets, min_value, max_value).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }
    assert!(HdrHistogram::new(1, 1.0, 2.0).is_ok());
}

#[test]
fn test_defaults() {
    let histogram = HdrHistogram::new(16, 1.0, 1e6).unwrap();
    assert_eq!(histogram.num_buckets(), 16);
    assert_eq!(histogram.min_value(), 1.0);
    assert_eq!(histogram.max_value(), 1e6);
    assert_eq!(histogram.out_of_range_policy(), OutOfRangePolicy::Reject);
    assert_eq!(histogram.storage_footprint(), 16);
    assert!(histogram.is_empty());
}

#[test]
fn test_empty() {
    let histogram = HdrHistogram::new(8, 1.0, 256.0).unwrap();
    assert_eq!(
        histogram.quantile(0.5).unwrap_err().kind(),
        ErrorKind::EmptySketch
    );
    assert_eq!(
        histogram.summary_statistics().unwrap_err().kind(),
        ErrorKind::EmptySketch
    );
}

#[test]
fn test_invalid_rank() {
    let histogram = powers_of_two();
    for rank in [-0.1, 1.5, f64::NAN] {
        let err = histogram.quantile(rank).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}

#[test]
fn test_bucket_layout() {
    let histogram = powers_of_two();
    assert_eq!(histogram.total_count(), 8);
    assert_eq!(histogram.counts(), &[1; 8]);
    assert_eq!(histogram.bucket_bounds(0), Some((1.0, 2.0)));
    assert_eq!(histogram.bucket_bounds(4), Some((16.0, 32.0)));
    assert_eq!(histogram.bucket_bounds(7), Some((128.0, 256.0)));
    assert_eq!(histogram.bucket_bounds(8), None);
    assert_eq!(histogram.bucket_count(8), None);
}

#[test]
fn test_median_of_powers_of_two() {
    let histogram = powers_of_two();
    let median = histogram.quantile(0.5).unwrap();
    let (lower, upper) = histogram.bucket_bounds(4).unwrap();
    assert_that!(median, ge(lower));
    assert_that!(median, le(upper));
    assert_eq!(median, 16.0);
}

#[test]
fn test_extreme_ranks() {
    let histogram = powers_of_two();
    assert_eq!(histogram.quantile(0.0).unwrap(), 1.0);
    assert_eq!(histogram.quantile(1.0).unwrap(), 256.0);

    let mut histogram = HdrHistogram::new(8, 1.0, 256.0).unwrap();
    histogram.insert(20.0).unwrap();
    assert_eq!(histogram.quantile(0.0).unwrap(), 16.0);
    assert_eq!(histogram.quantile(1.0).unwrap(), 32.0);
}

#[test]
fn test_interpolation_within_bucket() {
    let mut histogram = HdrHistogram::new(8, 1.0, 256.0).unwrap();
    for v in [1.1, 1.2, 1.3, 1.4] {
        histogram.insert(v).unwrap();
    }
    assert_eq!(histogram.bucket_count(0), Some(4));
    assert_eq!(histogram.quantile(0.5).unwrap(), 1.5);
    assert_eq!(histogram.quantile(0.25).unwrap(), 1.25);
}

#[test]
fn test_reject_policy() {
    let mut histogram = powers_of_two();
    for v in [0.5, 256.5, -1.0, 0.0] {
        let err = histogram.insert(v).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueOutOfDomain);
    }
    assert_eq!(histogram.total_count(), 8);

    // both ends of the range are accepted
    histogram.insert(1.0).unwrap();
    histogram.insert(256.0).unwrap();
    assert_eq!(histogram.bucket_count(0), Some(2));
    assert_eq!(histogram.bucket_count(7), Some(2));
}

#[test]
fn test_clamp_policy() {
    let mut histogram =
        HdrHistogram::with_policy(8, 1.0, 256.0, OutOfRangePolicy::Clamp).unwrap();
    for v in [0.5, -3.0, 0.0, 1e9] {
        histogram.insert(v).unwrap();
    }
    assert_eq!(histogram.bucket_count(0), Some(3));
    assert_eq!(histogram.bucket_count(7), Some(1));
    assert_eq!(histogram.total_count(), 4);
}

#[test]
fn test_non_finite_always_rejected() {
    for policy in [OutOfRangePolicy::Reject, OutOfRangePolicy::Clamp] {
        let mut histogram = HdrHistogram::with_policy(8, 1.0, 256.0, policy).unwrap();
        for v in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = histogram.insert(v).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ValueOutOfDomain);
        }
        assert!(histogram.is_empty());
    }
}

#[test]
fn test_insert_batch() {
    let mut histogram = HdrHistogram::new(8, 1.0, 256.0).unwrap();
    let outcome = histogram.insert_batch(&[2.0, 300.0, 4.0, f64::NAN]);
    assert_eq!(outcome.inserted(), 2);
    let positions: Vec<usize> = outcome.rejected().iter().map(|r| r.position).collect();
    assert_eq!(positions, vec![1, 3]);
    assert_eq!(histogram.total_count(), 2);
    assert!(outcome.into_result().is_err());
}

#[test]
fn test_monotonicity() {
    let mut rng = StdRng::seed_from_u64(17);
    let mut histogram = HdrHistogram::new(40, 0.1, 1e4).unwrap();
    for _ in 0..10_000 {
        histogram.insert((rng.random::<f64>() * 11.0).exp() * 0.1).unwrap();
    }
    let mut previous = f64::NEG_INFINITY;
    for i in 0..=200 {
        let q = histogram.quantile(i as f64 / 200.0).unwrap();
        assert_that!(q, ge(previous));
        previous = q;
    }
}

#[test]
fn test_relative_accuracy_of_bucket_width() {
    let mut rng = StdRng::seed_from_u64(23);
    let mut histogram = HdrHistogram::new(100, 1.0, 1e5).unwrap();
    let mut values: Vec<f64> = (0..20_000)
        .map(|_| (rng.random::<f64>() * 11.0).exp())
        .collect();
    for v in &values {
        histogram.insert(*v).unwrap();
    }
    values.sort_by(f64::total_cmp);

    // the estimate shares a bucket with the value at index rank * n, and each bucket spans a
    // ratio of 10^(5/100)
    let ratio = 10f64.powf(0.05) * (1.0 + 1e-9);
    for rank in [0.1, 0.25, 0.5, 0.75, 0.9, 0.99] {
        let expected = values[(rank * values.len() as f64) as usize];
        let actual = histogram.quantile(rank).unwrap();
        assert_that!(actual, ge(expected / ratio));
        assert_that!(actual, le(expected * ratio));
    }
}

#[test]
fn test_range_wider_than_f64_ratio() {
    // 1e300 / 1e-300 overflows an f64
    let mut histogram = HdrHistogram::new(64, 1e-300, 1e300).unwrap();
    for v in [1.0, 10.0, 100.0] {
        histogram.insert(v).unwrap();
    }

    let mut previous = 0.0;
    for index in 0..64 {
        let (lower, upper) = histogram.bucket_bounds(index).unwrap();
        assert!(lower.is_finite() && upper.is_finite());
        assert_that!(lower, ge(previous));
        assert_that!(upper, ge(lower));
        previous = upper;
    }
    assert_eq!(histogram.bucket_bounds(0).unwrap().0, 1e-300);
    assert_eq!(histogram.bucket_bounds(63).unwrap().1, 1e300);
    assert_eq!(histogram.counts()[0], 0);

    let ratio = ((1e300f64.log2() - 1e-300f64.log2()) / 64.0).exp2() * (1.0 + 1e-9);
    let median = histogram.quantile(0.5).unwrap();
    assert_that!(median, ge(10.0 / ratio));
    assert_that!(median, le(10.0 * ratio));

    let restored = HdrHistogram::deserialize(&histogram.serialize()).unwrap();
    assert_eq!(restored, histogram);
    assert_eq!(restored.quantile(0.5).unwrap(), median);
}

#[test]
fn test_extreme_magnitudes() {
    let mut histogram = HdrHistogram::new(8, 1e-200, 1e200).unwrap();
    histogram.insert(1e150).unwrap();
    let estimate = histogram.quantile(0.5).unwrap();
    assert_that!(estimate, ge(1e99));
    assert_that!(estimate, le(1e200));

    for v in [1e-200, 1e-150, 1e200] {
        histogram.insert(v).unwrap();
    }
    assert_that!(histogram.quantile(0.0).unwrap(), le(1e-150));
    assert_eq!(histogram.quantile(1.0).unwrap(), 1e200);

    let mut clamped =
        HdrHistogram::with_policy(16, f64::MIN_POSITIVE, f64::MAX, OutOfRangePolicy::Clamp)
            .unwrap();
    for v in [0.0, 1e-310, 1.0, 1e308, f64::MAX] {
        clamped.insert(v).unwrap();
    }
    assert_eq!(clamped.total_count(), 5);
    for rank in [0.0, 0.5, 1.0] {
        assert!(clamped.quantile(rank).unwrap().is_finite());
    }
    let restored = HdrHistogram::deserialize(&clamped.serialize()).unwrap();
    assert_eq!(restored, clamped);
}

#[test]
fn test_merge() {
    let mut a = HdrHistogram::new(8, 1.0, 256.0).unwrap();
    let mut b = HdrHistogram::with_policy(8, 1.0, 256.0, OutOfRangePolicy::Clamp).unwrap();
    for exponent in 0..4 {
        a.insert(2f64.powi(exponent)).unwrap();
    }
    for exponent in 4..8 {
        b.insert(2f64.powi(exponent)).unwrap();
    }
    a.merge(&b).unwrap();
    assert_eq!(a, powers_of_two());
    assert_eq!(a.out_of_range_policy(), OutOfRangePolicy::Reject);
}

#[test]
fn test_merge_incompatible() {
    let mut histogram = powers_of_two();
    let before = histogram.clone();
    let others = [
        HdrHistogram::new(16, 1.0, 256.0).unwrap(),
        HdrHistogram::new(8, 2.0, 256.0).unwrap(),
        HdrHistogram::new(8, 1.0, 512.0).unwrap(),
    ];
    for other in &others {
        let err = histogram.merge(other).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IncompatibleMerge);
        assert_eq!(histogram, before);
    }
}

#[test]
fn test_summary_statistics() {
    let stats = powers_of_two().summary_statistics().unwrap();
    assert_eq!(stats.count, 8);
    assert_eq!(stats.min, Some(1.0));
    assert_eq!(stats.median, Some(16.0));
    assert_eq!(stats.max, Some(256.0));
    assert_eq!(stats.q1, Some(4.0));
    assert_eq!(stats.q3, Some(64.0));
    // bucket midpoints: 1.5, 3, 6, ..., 192
    assert_that!(stats.mean.unwrap(), near(47.8125, 1e-9));
    assert_that!(stats.variance.unwrap(), ge(0.0));
    assert!(stats.skewness.unwrap() > 0.0);
    assert!(!stats.degraded);
}

#[test]
fn test_clear() {
    let mut histogram = powers_of_two();
    histogram.clear();
    assert!(histogram.is_empty());
    assert_eq!(histogram.counts(), &[0; 8]);
    histogram.insert(3.0).unwrap();
    assert_eq!(histogram.total_count(), 1);
}
