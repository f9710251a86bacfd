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

use super::DEFAULT_MAX_BUCKETS;
use super::DYNAMIC_MIN_BUCKETS;
use super::storage::ContiguousStorage;
use super::storage::SparseStorage;
use super::storage::Storage;
use crate::error::Error;

/// How a [`DDSketch`](super::DDSketch) bounds the number of buckets it keeps.
///
/// The policy is chosen at construction and never changes. Sketches can only be merged when their
/// policies are equal.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BucketPolicy {
    /// Each store keeps a span of at most `max_buckets` contiguous buckets, collapsing the
    /// extreme buckets when it would grow past that.
    Fixed {
        /// Maximum span of each store.
        max_buckets: usize,
    },
    /// Buckets are kept in a sparse map and never collapsed.
    #[default]
    Unlimited,
    /// Like `Fixed`, with a budget that grows with the number of counted values, see
    /// [`BucketPolicy::dynamic_limit`].
    Dynamic,
}

impl BucketPolicy {
    /// The fixed policy with [`DEFAULT_MAX_BUCKETS`] buckets per store.
    pub fn fixed() -> Self {
        BucketPolicy::Fixed {
            max_buckets: DEFAULT_MAX_BUCKETS,
        }
    }

    /// Budget of the `Dynamic` policy for `count` values:
    /// `max(DYNAMIC_MIN_BUCKETS, floor(100 * log10(count + 1)))`.
    pub fn dynamic_limit(count: u64) -> usize {
        let grown = (100.0 * ((count as f64) + 1.0).log10()) as usize;
        grown.max(DYNAMIC_MIN_BUCKETS)
    }

    /// Returns the bucket budget of one store after `count` values, if bounded.
    pub fn budget(&self, count: u64) -> Option<usize> {
        match self {
            BucketPolicy::Fixed { max_buckets } => Some(*max_buckets),
            BucketPolicy::Unlimited => None,
            BucketPolicy::Dynamic => Some(Self::dynamic_limit(count)),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        match self {
            BucketPolicy::Fixed { max_buckets } if *max_buckets == 0 => Err(
                Error::config_invalid("max_buckets must be at least 1 for the fixed policy"),
            ),
            // serialized as a u32
            BucketPolicy::Fixed { max_buckets } if u32::try_from(*max_buckets).is_err() => {
                Err(Error::config_invalid(format!(
                    "max_buckets must be at most {}, got {max_buckets}",
                    u32::MAX
                )))
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn new_storage(&self) -> Storage {
        match self {
            BucketPolicy::Fixed { max_buckets } => {
                Storage::Contiguous(ContiguousStorage::new(*max_buckets))
            }
            BucketPolicy::Unlimited => Storage::Sparse(SparseStorage::new()),
            BucketPolicy::Dynamic => {
                Storage::Contiguous(ContiguousStorage::new(Self::dynamic_limit(0)))
            }
        }
    }

    pub(crate) fn id(&self) -> u8 {
        match self {
            BucketPolicy::Fixed { .. } => 0,
            BucketPolicy::Unlimited => 1,
            BucketPolicy::Dynamic => 2,
        }
    }

    pub(crate) fn from_parts(id: u8, max_buckets: u32) -> Option<BucketPolicy> {
        match id {
            0 => Some(BucketPolicy::Fixed {
                max_buckets: max_buckets as usize,
            }),
            1 => Some(BucketPolicy::Unlimited),
            2 => Some(BucketPolicy::Dynamic),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dynamic_limit_grows_logarithmically() {
        assert_eq!(BucketPolicy::dynamic_limit(0), DYNAMIC_MIN_BUCKETS);
        assert_eq!(BucketPolicy::dynamic_limit(1), DYNAMIC_MIN_BUCKETS);
        assert_eq!(BucketPolicy::dynamic_limit(99), 200);
        assert_eq!(BucketPolicy::dynamic_limit(999_999), 600);

        let mut previous = 0;
        for count in (0..100_000).step_by(997) {
            let limit = BucketPolicy::dynamic_limit(count);
            assert!(limit >= previous);
            previous = limit;
        }
    }

    #[test]
    fn test_fixed_requires_buckets() {
        assert!(BucketPolicy::Fixed { max_buckets: 0 }.validate().is_err());
        assert!(BucketPolicy::Fixed { max_buckets: 1 }.validate().is_ok());
    }

    #[test]
    fn test_fixed_budget_fits_u32() {
        let widest = BucketPolicy::Fixed {
            max_buckets: u32::MAX as usize,
        };
        assert!(widest.validate().is_ok());
        assert_eq!(BucketPolicy::from_parts(widest.id(), u32::MAX), Some(widest));

        let too_wide = BucketPolicy::Fixed {
            max_buckets: u32::MAX as usize + 1,
        };
        assert!(too_wide.validate().is_err());
    }
}
