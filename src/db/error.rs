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

//! Implementation of the [`Error`] type for database errors.

use std::fmt;

use crate::name;
use crate::rr::rdataslab;

/// Errors that arise during operations on a
/// [`Database`](super::Database).
///
/// Informational lookup outcomes (NXDOMAIN, delegations, and so on) are
/// not errors; they are reported through
/// [`FindResult`](super::FindResult).
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Error {
    /// The database is internally inconsistent, e.g. a secure zone
    /// lacks an NSEC record where one is required.
    BadDb,

    /// A write version is already open.
    WriterBusy,

    /// The version passed does not suit the operation: it belongs to
    /// another database, is read-only where a write version is needed,
    /// or was passed to a cache (which has no versions), or a zone write
    /// was attempted without one.
    InvalidVersion,

    /// The name is not in the database, or no matching record set
    /// exists.
    NotFound,

    /// An iterator ran off either end of the database.
    NoMore,

    /// An exact merge or subtraction did not match exactly.
    NotExact,

    /// The operation is not supported for this kind of database or
    /// record type.
    NotImplemented,

    /// An SOA record was loaded somewhere other than the zone origin.
    NotZoneTop,

    /// An NS record was loaded at a wildcard name.
    InvalidNs,

    /// Recording a change failed to allocate; the version can no
    /// longer be committed.
    NoMemory,

    /// A version with failed changes was committed; it was rolled back
    /// instead.
    CommitFailed,

    /// Loading was started twice, or after the database was loaded.
    LoadState,

    /// The name is outside the database's origin.
    OutOfZone,

    /// The configured number of node locks is out of range.
    InvalidLockCount,

    /// A name could not be constructed.
    Name(name::Error),

    /// A record set could not be packed.
    Slab(rdataslab::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::BadDb => f.write_str("database is inconsistent"),
            Self::WriterBusy => f.write_str("a write version is already open"),
            Self::InvalidVersion => f.write_str("version is not valid for this operation"),
            Self::NotFound => f.write_str("not found"),
            Self::NoMore => f.write_str("no more nodes"),
            Self::NotExact => f.write_str("records did not match exactly"),
            Self::NotImplemented => f.write_str("operation not implemented"),
            Self::NotZoneTop => f.write_str("SOA record not at the top of the zone"),
            Self::InvalidNs => f.write_str("NS record at a wildcard name"),
            Self::NoMemory => f.write_str("out of memory"),
            Self::CommitFailed => f.write_str("version could not be committed and was rolled back"),
            Self::LoadState => f.write_str("database is already loading or loaded"),
            Self::OutOfZone => f.write_str("name is not within the database's origin"),
            Self::InvalidLockCount => f.write_str("node lock count must be between 1 and 1023"),
            Self::Name(err) => write!(f, "invalid name: {}", err),
            Self::Slab(err) => write!(f, "invalid record set: {}", err),
        }
    }
}

impl From<name::Error> for Error {
    fn from(err: name::Error) -> Self {
        Self::Name(err)
    }
}

impl From<rdataslab::Error> for Error {
    fn from(err: rdataslab::Error) -> Self {
        match err {
            rdataslab::Error::NotExact => Self::NotExact,
            other => Self::Slab(other),
        }
    }
}

impl std::error::Error for Error {}
