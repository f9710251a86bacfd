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

//! Types shared by every sketch in this crate.

mod batch;
mod summary;

pub use self::batch::BatchOutcome;
pub use self::batch::RejectedValue;
pub use self::summary::SummaryStatistics;
pub(crate) use self::summary::Shape;

use crate::error::Error;

/// Validates that a normalized rank lies in `[0.0, 1.0]`.
pub(crate) fn check_rank(rank: f64) -> Result<(), Error> {
    if (0.0..=1.0).contains(&rank) {
        Ok(())
    } else {
        Err(Error::invalid_rank(rank))
    }
}
