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
use googletest::prelude::near;
use quantileflow::ddsketch::BucketPolicy;
use quantileflow::ddsketch::DDSketch;
use quantileflow::ddsketch::MappingKind;
use quantileflow::hdr::HdrHistogram;
use quantileflow::moments::MomentSketch;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

const RANKS: [f64; 9] = [0.0, 0.01, 0.1, 0.25, 0.5, 0.75, 0.9, 0.99, 1.0];

fn datasets() -> [Vec<f64>; 3] {
    let mut rng = StdRng::seed_from_u64(42);
    let mut dataset = |scale: f64| -> Vec<f64> {
        (0..2_000)
            .map(|_| 1.0 + scale * rng.random::<f64>())
            .collect()
    };
    [dataset(100.0), dataset(500.0), dataset(50.0)]
}

fn new_ddsketch() -> DDSketch {
    DDSketch::builder()
        .relative_accuracy(0.01)
        .mapping(MappingKind::LinearInterpolation)
        .bucket_policy(BucketPolicy::Unlimited)
        .build()
        .unwrap()
}

fn ddsketch_of(values: &[f64]) -> DDSketch {
    let mut sketch = new_ddsketch();
    assert!(sketch.insert_batch(values).is_complete());
    sketch
}

fn moment_sketch_of(values: &[f64]) -> MomentSketch {
    let mut sketch = MomentSketch::new(10).unwrap();
    assert!(sketch.insert_batch(values).is_complete());
    sketch
}

fn histogram_of(values: &[f64]) -> HdrHistogram {
    let mut histogram = HdrHistogram::new(64, 1.0, 1000.0).unwrap();
    assert!(histogram.insert_batch(values).is_complete());
    histogram
}

fn ddsketch_quantiles(sketch: &DDSketch) -> Vec<f64> {
    RANKS.iter().map(|q| sketch.quantile(*q).unwrap()).collect()
}

fn moment_quantiles(sketch: &mut MomentSketch) -> Vec<f64> {
    RANKS.iter().map(|q| sketch.quantile(*q).unwrap()).collect()
}

fn histogram_quantiles(histogram: &HdrHistogram) -> Vec<f64> {
    RANKS.iter().map(|q| histogram.quantile(*q).unwrap()).collect()
}

#[test]
fn test_ddsketch_merge_order_independent() {
    let [a, b, c] = datasets();

    let mut left = ddsketch_of(&a);
    left.merge(&ddsketch_of(&b)).unwrap();
    left.merge(&ddsketch_of(&c)).unwrap();

    let mut right = ddsketch_of(&b);
    right.merge(&ddsketch_of(&c)).unwrap();
    let mut nested = ddsketch_of(&a);
    nested.merge(&right).unwrap();

    let mut swapped = ddsketch_of(&b);
    swapped.merge(&ddsketch_of(&a)).unwrap();
    swapped.merge(&ddsketch_of(&c)).unwrap();

    assert_eq!(ddsketch_quantiles(&left), ddsketch_quantiles(&nested));
    assert_eq!(ddsketch_quantiles(&left), ddsketch_quantiles(&swapped));
    assert_eq!(left.count(), 6_000);
}

#[test]
fn test_ddsketch_merge_matches_single_sketch() {
    let [a, b, c] = datasets();
    let all: Vec<f64> = [a.as_slice(), b.as_slice(), c.as_slice()].concat();

    let mut merged = ddsketch_of(&a);
    merged.merge(&ddsketch_of(&b)).unwrap();
    merged.merge(&ddsketch_of(&c)).unwrap();
    let single = ddsketch_of(&all);

    assert_eq!(merged, single);
    assert_eq!(
        merged.summary_statistics().unwrap(),
        single.summary_statistics().unwrap()
    );
}

#[test]
fn test_ddsketch_merge_with_empty() {
    let [a, _, _] = datasets();
    let mut sketch = ddsketch_of(&a);
    let before = sketch.clone();
    sketch.merge(&new_ddsketch()).unwrap();
    assert_eq!(sketch, before);

    let mut empty = new_ddsketch();
    empty.merge(&before).unwrap();
    assert_eq!(ddsketch_quantiles(&empty), ddsketch_quantiles(&before));
}

#[test]
fn test_moment_sketch_merge_order_independent() {
    let [a, b, c] = datasets();

    let mut left = moment_sketch_of(&a);
    left.merge(&moment_sketch_of(&b)).unwrap();
    left.merge(&moment_sketch_of(&c)).unwrap();

    let mut right = moment_sketch_of(&b);
    right.merge(&moment_sketch_of(&c)).unwrap();
    let mut nested = moment_sketch_of(&a);
    nested.merge(&right).unwrap();

    let mut swapped = moment_sketch_of(&b);
    swapped.merge(&moment_sketch_of(&a)).unwrap();
    swapped.merge(&moment_sketch_of(&c)).unwrap();

    assert_eq!(left.count(), 6_000);
    assert_eq!(left.min(), nested.min());
    assert_eq!(left.max(), swapped.max());
    let expected = moment_quantiles(&mut left);
    for other in [&mut nested, &mut swapped] {
        for (actual, expected) in moment_quantiles(other).iter().zip(&expected) {
            assert_that!(*actual, near(*expected, 1e-3));
        }
    }
}

#[test]
fn test_moment_sketch_merge_matches_single_sketch() {
    let [a, b, c] = datasets();
    let all: Vec<f64> = [a.as_slice(), b.as_slice(), c.as_slice()].concat();

    let mut merged = moment_sketch_of(&a);
    merged.merge(&moment_sketch_of(&b)).unwrap();
    merged.merge(&moment_sketch_of(&c)).unwrap();
    let mut single = moment_sketch_of(&all);

    for (actual, expected) in merged.power_sums().iter().zip(single.power_sums()) {
        assert_that!(*actual, near(*expected, expected.abs() * 1e-10));
    }
    let merged_stats = merged.summary_statistics().unwrap();
    let single_stats = single.summary_statistics().unwrap();
    assert_eq!(merged_stats.count, single_stats.count);
    assert_that!(
        merged_stats.mean.unwrap(),
        near(single_stats.mean.unwrap(), 1e-9)
    );
    assert_that!(
        merged_stats.variance.unwrap(),
        near(single_stats.variance.unwrap(), 1e-6)
    );
    for (actual, expected) in moment_quantiles(&mut merged)
        .iter()
        .zip(&moment_quantiles(&mut single))
    {
        assert_that!(*actual, near(*expected, 1e-3));
    }
}

#[test]
fn test_histogram_merge_order_independent() {
    let [a, b, c] = datasets();

    let mut left = histogram_of(&a);
    left.merge(&histogram_of(&b)).unwrap();
    left.merge(&histogram_of(&c)).unwrap();

    let mut right = histogram_of(&b);
    right.merge(&histogram_of(&c)).unwrap();
    let mut nested = histogram_of(&a);
    nested.merge(&right).unwrap();

    let mut swapped = histogram_of(&b);
    swapped.merge(&histogram_of(&a)).unwrap();
    swapped.merge(&histogram_of(&c)).unwrap();

    assert_eq!(left, nested);
    assert_eq!(left, swapped);
    assert_eq!(histogram_quantiles(&left), histogram_quantiles(&swapped));
}

#[test]
fn test_histogram_merge_matches_single_histogram() {
    let [a, b, c] = datasets();
    let all: Vec<f64> = [a.as_slice(), b.as_slice(), c.as_slice()].concat();

    let mut merged = histogram_of(&a);
    merged.merge(&histogram_of(&b)).unwrap();
    merged.merge(&histogram_of(&c)).unwrap();
    let single = histogram_of(&all);

    assert_eq!(merged, single);
    assert_eq!(
        merged.summary_statistics().unwrap(),
        single.summary_statistics().unwrap()
    );
}
