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

//! Data structures and routines for handling DNS resource record data.

/// Defines a 16-bit code newtype (an RR type or class) with constants
/// for well-known values, conversions to and from `u16`, and
/// [`FromStr`](std::str::FromStr), [`Display`](std::fmt::Display), and
/// [`Debug`](std::fmt::Debug) implementations that fall back to the
/// generic `PREFIXnnn` syntax of [RFC 3597 § 5] for unknown values.
///
/// [RFC 3597 § 5]: https://datatracker.ietf.org/doc/html/rfc3597#section-5
macro_rules! mnemonic_code {
    (
        $(#[$meta:meta])*
        $vis:vis struct $code:ident, prefix = $prefix:literal {
            $($mnemonic:ident = $value:literal,)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Eq, Hash, PartialEq, PartialOrd, Ord)]
        $vis struct $code(u16);

        impl $code {
            $(pub const $mnemonic: $code = $code($value);)*

            /// Wraps a raw value.
            pub const fn from_u16(value: u16) -> Self {
                Self(value)
            }

            /// Returns the raw value.
            pub const fn to_u16(self) -> u16 {
                self.0
            }
        }

        impl From<u16> for $code {
            fn from(raw: u16) -> Self {
                Self(raw)
            }
        }

        impl From<$code> for u16 {
            fn from(code: $code) -> Self {
                code.0
            }
        }

        impl std::str::FromStr for $code {
            type Err = &'static str;

            fn from_str(text: &str) -> Result<Self, Self::Err> {
                use $crate::util::Caseless;
                $(
                    if Caseless(text) == Caseless(stringify!($mnemonic)) {
                        return Ok(Self::$mnemonic);
                    }
                )*
                if text
                    .get(0..$prefix.len())
                    .map_or(false, |prefix| prefix.eq_ignore_ascii_case($prefix))
                {
                    text[$prefix.len()..]
                        .parse::<u16>()
                        .map(Self)
                        .or(Err("value is not a valid unsigned 16-bit integer"))
                } else {
                    Err(concat!("unknown ", stringify!($code)))
                }
            }
        }

        impl std::fmt::Display for $code {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                match *self {
                    $(Self::$mnemonic => f.write_str(stringify!($mnemonic)),)*
                    Self(value) => write!(f, concat!($prefix, "{}"), value),
                }
            }
        }

        impl std::fmt::Debug for $code {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                write!(f, "{self}")
            }
        }
    };
}

pub(crate) use mnemonic_code;

pub mod cmp;
pub mod rdataset;
pub mod rdataslab;
mod rr_type;
mod trust;
mod type_key;
pub use rdataset::{NoQname, Rdataset};
pub use rdataslab::RdataSlab;
pub use rr_type::Type;
pub use trust::Trust;
pub use type_key::TypeKey;
