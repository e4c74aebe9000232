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

//! Implementation of the [`TypeKey`] type.

use std::fmt;

use super::Type;

/// The key under which a record set is stored at a node: an RR type
/// plus the type it "covers."
///
/// The covered type is non-zero in two cases. Signature sets (RRSIG or
/// SIG) are keyed by the type they sign. Negative cache entries have a
/// base type of zero and cover the type whose non-existence they
/// record; the special key [`TypeKey::NCACHE_ANY`] records that the
/// whole name does not exist.
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct TypeKey {
    base: Type,
    covers: Type,
}

impl TypeKey {
    const ZERO: Type = Type::from_u16(0);

    pub const SIG_NSEC: Self = Self::new(Type::RRSIG, Type::NSEC);
    pub const SIG_NS: Self = Self::new(Type::RRSIG, Type::NS);
    pub const SIG_CNAME: Self = Self::new(Type::RRSIG, Type::CNAME);
    pub const SIG_DNAME: Self = Self::new(Type::RRSIG, Type::DNAME);
    pub const NCACHE_ANY: Self = Self::negative(Type::ANY);

    /// Makes a key from a type and a covered type.
    pub const fn new(base: Type, covers: Type) -> Self {
        Self { base, covers }
    }

    /// Makes the key of a plain (non-signature) type.
    pub const fn of(base: Type) -> Self {
        Self::new(base, Self::ZERO)
    }

    /// Makes the key of a negative cache entry covering `covers`.
    pub const fn negative(covers: Type) -> Self {
        Self::new(Self::ZERO, covers)
    }

    /// Makes the key of the RRSIG set that signs `covered`.
    pub const fn signature_of(covered: Type) -> Self {
        Self::new(Type::RRSIG, covered)
    }

    pub fn base(self) -> Type {
        self.base
    }

    pub fn covers(self) -> Type {
        self.covers
    }

    /// Returns whether this key is a negative cache entry.
    pub fn is_negative(self) -> bool {
        self.base == Self::ZERO
    }

    /// Returns the type this key stands for when deciding whether it
    /// conflicts with a CNAME: the covered type for signatures, the
    /// base type otherwise.
    pub fn effective_type(self) -> Type {
        if self.base.is_signature() {
            self.covers
        } else {
            self.base
        }
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_negative() {
            write!(f, "!{}", self.covers)
        } else if self.covers == Self::ZERO {
            write!(f, "{}", self.base)
        } else {
            write!(f, "{}({})", self.base, self.covers)
        }
    }
}
