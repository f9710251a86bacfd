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

use crate::error::Error;

/// A value that `insert_batch` refused to count.
#[derive(Debug)]
pub struct RejectedValue {
    /// Position of the value in the batch.
    pub position: usize,
    /// The offending value.
    pub value: f64,
    /// Why the value was rejected.
    pub error: Error,
}

/// Outcome of inserting a batch of values.
///
/// Rejected values are not counted by the sketch; they are reported here so that an ingestion
/// loop can keep going without losing track of them.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    inserted: u64,
    rejected: Vec<RejectedValue>,
}

impl BatchOutcome {
    pub(crate) fn record(&mut self, position: usize, value: f64, result: Result<(), Error>) {
        match result {
            Ok(()) => self.inserted += 1,
            Err(error) => self.rejected.push(RejectedValue {
                position,
                value,
                error,
            }),
        }
    }

    /// Returns the number of values counted by the sketch.
    pub fn inserted(&self) -> u64 {
        self.inserted
    }

    /// Returns the values that were rejected, in batch order.
    pub fn rejected(&self) -> &[RejectedValue] {
        &self.rejected
    }

    /// Returns true if every value of the batch was counted.
    pub fn is_complete(&self) -> bool {
        self.rejected.is_empty()
    }

    /// Converts the outcome into the first rejection, if any.
    pub fn into_result(self) -> Result<u64, Error> {
        match self.rejected.into_iter().next() {
            None => Ok(self.inserted),
            Some(rejected) => Err(rejected.error.with_context("position", rejected.position)),
        }
    }
}
