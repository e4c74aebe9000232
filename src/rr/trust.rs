// Copyright 2022 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Implementation of the [`Trust`] type.

use std::fmt;
use std::str::FromStr;

use crate::util::Caseless;

/// The provenance of cached data, following the credibility ranking of
/// [RFC 2181 § 5.4.1]. Variants are ordered from least to most
/// trustworthy, so they can be compared directly.
///
/// [RFC 2181 § 5.4.1]: https://datatracker.ietf.org/doc/html/rfc2181#section-5.4.1
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub enum Trust {
    None,
    /// Received but not yet validated.
    Pending,
    /// From the additional section of a response.
    Additional,
    Glue,
    /// From the answer section of a non-authoritative response.
    Answer,
    AuthAuthority,
    AuthAnswer,
    /// Validated by DNSSEC.
    Secure,
    /// Local configuration; always wins.
    Ultimate,
}

impl Trust {
    const ALL: [Self; 9] = [
        Self::None,
        Self::Pending,
        Self::Additional,
        Self::Glue,
        Self::Answer,
        Self::AuthAuthority,
        Self::AuthAnswer,
        Self::Secure,
        Self::Ultimate,
    ];

    /// Returns the lowercase name of the trust level.
    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Pending => "pending",
            Self::Additional => "additional",
            Self::Glue => "glue",
            Self::Answer => "answer",
            Self::AuthAuthority => "authauthority",
            Self::AuthAnswer => "authanswer",
            Self::Secure => "secure",
            Self::Ultimate => "ultimate",
        }
    }
}

impl Default for Trust {
    fn default() -> Self {
        Self::None
    }
}

impl FromStr for Trust {
    type Err = &'static str;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|trust| Caseless(text) == Caseless(trust.mnemonic()))
            .ok_or("unknown trust level")
    }
}

impl fmt::Display for Trust {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}
