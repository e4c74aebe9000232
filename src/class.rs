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

//! Implementation of the [`Class`] type for DNS classes.

use crate::rr::mnemonic_code;

mnemonic_code! {
    /// Represents a class in the DNS.
    ///
    /// A database holds data of exactly one class; the only class in
    /// common use is [`IN`](Class::IN). NONE and ANY are included for
    /// completeness of the textual forms ([RFC 2136 § 2.4]).
    ///
    /// [RFC 2136 § 2.4]: https://datatracker.ietf.org/doc/html/rfc2136#section-2.4
    pub struct Class, prefix = "CLASS" {
        IN = 1,
        CH = 3,
        HS = 4,
        NONE = 254,
        ANY = 255,
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_displays_according_to_rfc3597() {
        assert_eq!(Class::from(0xff00).to_string(), "CLASS65280");
        assert_eq!(Class::IN.to_string(), "IN");
    }

    #[test]
    fn class_parses_according_to_rfc3597() {
        assert_eq!("in".parse::<Class>(), Ok(Class::IN));
        assert_eq!("CLASS3".parse::<Class>(), Ok(Class::CH));
        assert!("CLASSX".parse::<Class>().is_err());
    }
}
