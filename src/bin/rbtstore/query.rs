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

//! Implements the `query` and `dump` commands.

use std::io::{self, Write};

use anyhow::{Context, Result};
use log::debug;

use rbtstore::class::Class;
use rbtstore::db::{Answer, Database, Error};
use rbtstore::name::Name;
use rbtstore::rr::{Rdataset, Type};

use crate::args::{DumpArgs, QueryArgs};
use crate::load;
use crate::rdata;

/// Runs the `query` command.
pub fn query(args: QueryArgs) -> Result<()> {
    let db = load::load_from_path(&args.config)?;
    let now = args.now.unwrap_or(0);
    let answer = if args.zonecut {
        db.find_zonecut(&args.name, args.options(), now)
    } else {
        db.find(&args.name, None, args.rr_type, args.options(), now)
    }
    .with_context(|| format!("lookup of {}/{} failed", args.name, args.rr_type))?;
    debug!("Lookup of {}/{} answered with {:?}.", args.name, args.rr_type, answer.result);

    let stdout = io::stdout();
    print_answer(&mut stdout.lock(), &answer, db.class()).context("failed to write the answer")
}

/// Runs the `dump` command.
pub fn dump(args: DumpArgs) -> Result<()> {
    let db = load::load_from_path(&args.config)?;
    let stdout = io::stdout();
    dump_database(&mut stdout.lock(), &db).context("failed to dump the database")
}

/// Writes every record set in `db`, in canonical order.
fn dump_database<W: Write>(out: &mut W, db: &Database) -> Result<()> {
    let mut iter = db.iter();
    let mut position = iter.first();
    loop {
        match position {
            Ok(()) => (),
            Err(Error::NoMore) => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        let node = iter.current()?;
        iter.pause()?;
        for rdataset in db.all_rdatasets(&node, None, 0)? {
            print_rdataset(out, node.name(), db.class(), &rdataset)?;
        }
        drop(node);
        position = iter.next();
    }
}

/// Writes a lookup answer in a dig-like format.
fn print_answer<W: Write>(out: &mut W, answer: &Answer, class: Class) -> io::Result<()> {
    writeln!(
        out,
        ";; {:?} at {}{}",
        answer.result, answer.name,
        if answer.wildcard { " (wildcard)" } else { "" },
    )?;
    for rdataset in answer.rdataset.iter().chain(answer.sig_rdataset.iter()) {
        print_rdataset(out, &answer.name, class, rdataset)?;
    }
    Ok(())
}

/// Writes one record set, one record per line.
fn print_rdataset<W: Write>(
    out: &mut W,
    owner: &Name,
    class: Class,
    rdataset: &Rdataset,
) -> io::Result<()> {
    if rdataset.is_negative() {
        let what = if rdataset.nxdomain {
            String::from("NXDOMAIN")
        } else {
            format!("NXRRSET {}", rdataset.covers)
        };
        return writeln!(
            out,
            "; {} {} {} {} ({})",
            owner,
            rdataset.ttl,
            class,
            what,
            rdataset.trust
        );
    }
    // RRSIG data starts with the covered type, so it can be formatted
    // as-is.
    let rr_type = rdataset.rr_type;
    for rdata in rdataset.rdata.iter() {
        writeln!(
            out,
            "{} {} {} {} {}",
            owner, rdataset.ttl,
            class,
            rr_type,
            rdata::format(rr_type, rdata),
        )?;
    }
    if rdataset.rr_type == Type::RRSIG {
        debug!("{} signatures over {} at {}.", rdataset.rdata.count(), rdataset.covers, owner);
    }
    Ok(())
}
