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

//! Provides the [`Type`] structure for DNS RR types.

////////////////////////////////////////////////////////////////////////
// RR TYPES                                                           //
////////////////////////////////////////////////////////////////////////

mnemonic_code! {
    /// Represents the RR type of a DNS record.
    ///
    /// An RR type is represented on the wire as an unsigned 16-bit
    /// integer. Besides the RFC 1035 types, the DNSSEC types (and their
    /// obsolete predecessors SIG, KEY, and NXT) are named, since the
    /// database gives them special treatment.
    pub struct Type, prefix = "TYPE" {
        A = 1,
        NS = 2,
        MD = 3,
        MF = 4,
        CNAME = 5,
        SOA = 6,
        MB = 7,
        MG = 8,
        MR = 9,
        NULL = 10,
        WKS = 11,
        PTR = 12,
        HINFO = 13,
        MINFO = 14,
        MX = 15,
        TXT = 16,
        SIG = 24,
        KEY = 25,
        AAAA = 28,
        NXT = 30,
        SRV = 33,
        A6 = 38,
        DNAME = 39,
        DS = 43,
        RRSIG = 46,
        NSEC = 47,
        DNSKEY = 48,
        NSEC3 = 50,
        ANY = 255,
    }
}

impl Type {
    /// Returns whether this is one of the signature types, RRSIG or the
    /// obsolete SIG.
    pub fn is_signature(self) -> bool {
        self == Self::RRSIG || self == Self::SIG
    }

    /// Returns whether data of this type may coexist with a CNAME at
    /// the same owner ([RFC 4035 § 2.5], [RFC 2535 § 2.3.5]).
    ///
    /// [RFC 4035 § 2.5]: https://datatracker.ietf.org/doc/html/rfc4035#section-2.5
    /// [RFC 2535 § 2.3.5]: https://datatracker.ietf.org/doc/html/rfc2535#section-2.3.5
    pub fn may_accompany_cname(self) -> bool {
        matches!(
            self,
            Self::NSEC | Self::DNSKEY | Self::NXT | Self::KEY | Self::CNAME
        )
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
