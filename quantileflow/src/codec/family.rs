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

/// Defines the families of sketches that share a serialized layout.
///
/// A family identifies the sketch that produced a byte image, so a DDSketch image is never
/// decoded as a histogram.
pub struct Family {
    /// The byte ID for this family.
    pub id: u8,
    /// The name for this family.
    pub name: &'static str,
    /// The minimum preamble size for this family in longs (8-bytes integer).
    pub min_pre_longs: u8,
    /// The maximum preamble size for this family in longs (8-bytes integer).
    pub max_pre_longs: u8,
}

impl Family {
    /// DDSketch with relative-error bucket mapping.
    pub const DDSKETCH: Family = Family {
        id: 40,
        name: "DDSKETCH",
        min_pre_longs: 3,
        max_pre_longs: 4,
    };

    /// Moment-based sketch with maximum-entropy reconstruction.
    pub const MOMENTS: Family = Family {
        id: 41,
        name: "MOMENTS",
        min_pre_longs: 2,
        max_pre_longs: 3,
    };

    /// Fixed-range logarithmic histogram.
    pub const HDR_HISTOGRAM: Family = Family {
        id: 42,
        name: "HDR_HISTOGRAM",
        min_pre_longs: 3,
        max_pre_longs: 4,
    };
}

impl Family {
    pub fn validate_id(&self, family_id: u8) -> Result<(), Error> {
        if family_id != self.id {
            Err(Error::invalid_family(self.id, family_id, self.name))
        } else {
            Ok(())
        }
    }
}
