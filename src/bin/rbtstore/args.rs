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

//! Implements command-line argument parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use rbtstore::db::FindOptions;
use rbtstore::name::Name;
use rbtstore::rr::Type;

/// Parses the command line arguments.
pub fn parse() -> Args {
    Args::parse()
}

/// Loads a DNS zone or cache into a record store and inspects it
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Look up records
    Query(QueryArgs),

    /// Print every record set in the database
    Dump(DumpArgs),
}

#[derive(Debug, Parser)]
pub struct QueryArgs {
    /// The database description file
    #[clap(value_name = "FILE")]
    pub config: PathBuf,

    /// The name to look up
    #[clap(value_parser)]
    pub name: Name,

    /// The record type to look up
    #[clap(value_parser, default_value = "A")]
    pub rr_type: Type,

    /// Find the deepest zone cut at or above the name instead (caches
    /// only)
    #[clap(long)]
    pub zonecut: bool,

    /// With --zonecut, ignore the name's own node
    #[clap(long, requires = "zonecut")]
    pub no_exact: bool,

    /// Return data found below a zone cut as glue
    #[clap(long)]
    pub glue_ok: bool,

    /// Don't synthesize answers from wildcards
    #[clap(long)]
    pub no_wild: bool,

    /// Return NSEC proofs even if the zone is not signed
    #[clap(long)]
    pub force_nsec: bool,

    /// Only return glue that belongs to the delegation
    #[clap(long)]
    pub validate_glue: bool,

    /// Accept cache data still pending validation
    #[clap(long)]
    pub pending_ok: bool,

    /// Accept cache data learned from additional sections
    #[clap(long)]
    pub additional_ok: bool,

    /// On a cache miss, answer with a covering NSEC record
    #[clap(long)]
    pub covering_nsec: bool,

    /// The time of the lookup, in seconds since the epoch (caches only;
    /// defaults to the current time)
    #[clap(long, value_name = "SECONDS")]
    pub now: Option<u32>,
}

impl QueryArgs {
    /// Collects the lookup flags.
    pub fn options(&self) -> FindOptions {
        [
            (self.no_exact, FindOptions::NO_EXACT),
            (self.glue_ok, FindOptions::GLUE_OK),
            (self.no_wild, FindOptions::NO_WILD),
            (self.force_nsec, FindOptions::FORCE_NSEC),
            (self.validate_glue, FindOptions::VALIDATE_GLUE),
            (self.pending_ok, FindOptions::PENDING_OK),
            (self.additional_ok, FindOptions::ADDITIONAL_OK),
            (self.covering_nsec, FindOptions::COVERING_NSEC),
        ]
        .into_iter()
        .filter(|(set, _)| *set)
        .fold(FindOptions::empty(), |options, (_, flag)| options | flag)
    }
}

#[derive(Debug, Parser)]
pub struct DumpArgs {
    /// The database description file
    #[clap(value_name = "FILE")]
    pub config: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_flags_become_options() {
        let args = Args::parse_from(
            ["rbtstore", "query", "db.toml", "www.example.", "MX", "--glue-ok", "--no-wild"],
        );
        let Command::Query(query) = args.command else {
            panic!("expected a query command");
        };
        assert_eq!(query.rr_type, Type::MX);
        assert_eq!(query.options(), FindOptions::GLUE_OK | FindOptions::NO_WILD);
    }

    #[test]
    fn query_type_defaults_to_a() {
        let args = Args::parse_from(["rbtstore", "query", "db.toml", "www.example."]);
        let Command::Query(query) = args.command else {
            panic!("expected a query command");
        };
        assert_eq!(query.rr_type, Type::A);
        assert_eq!(query.options(), FindOptions::empty());
    }
}
