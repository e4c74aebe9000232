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

//! Builds a [`Database`] from a database description.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use log::{info, warn};

use rbtstore::db::{self, Database, WriteOutcome};
use rbtstore::rr::{RdataSlab, Rdataset, Type};

use crate::config::{self, Config, RecordConfig};
use crate::rdata;

/// Loads the description at `path` and builds its database.
pub fn load_from_path(path: &Path) -> Result<Database> {
    info!("Loading the database description from {}.", path.display());
    let config = config::load_from_path(path)?;
    build(&config).with_context(|| format!("failed to load {}", config.origin.0))
}

/// Creates the database described by `config` and loads its records.
pub fn build(config: &Config) -> Result<Database> {
    let db_config = db::Config {
        node_lock_count: config.lock_count,
        virtual_time: config.virtual_time,
        ..Default::default()
    };
    let db = Database::create(config.kind.0, config.origin.0.clone(), config.class.0, db_config)
        .context("failed to create the database")?;

    let mut loader = db.begin_load().context("failed to begin loading")?;
    for record in &config.records {
        let rdataset = make_rdataset(record).with_context(|| {
            format!("invalid records for {}/{}", record.name.0, record.rr_type.0)
        })?;
        let outcome = loader
            .load_rdataset(&record.name.0, &rdataset)
            .with_context(|| format!("failed to load {}/{}", record.name.0, record.rr_type.0))?;
        if outcome == WriteOutcome::CnameAndOtherData {
            warn!(
                "{} has both a CNAME and other data; the {} records were loaded anyway.",
                record.name.0, record.rr_type.0,
            );
        }
    }
    loader.end_load().context("failed to finish loading")?;

    info!(
        "Loaded {} record sets into {} nodes{}.",
        config.records.len(),
        db.node_count(),
        if db.is_secure() { " (signed)" } else { "" },
    );
    Ok(db)
}

/// Converts a record set from the description into an [`Rdataset`].
fn make_rdataset(record: &RecordConfig) -> Result<Rdataset> {
    let rr_type = record.rr_type.0;
    let wire = record
        .rdata
        .iter()
        .map(|text| rdata::parse(rr_type, text))
        .collect::<Result<Vec<_>>>()?;
    let slab = RdataSlab::new(rr_type, wire.iter().map(Vec::as_slice))?;

    let rdataset = if rr_type == Type::RRSIG {
        // The type covered is the first field of every signature.
        let covers = wire
            .first()
            .and_then(|rdata| rdata.get(0..2))
            .map(|octets| Type::from(u16::from_be_bytes([octets[0], octets[1]])))
            .ok_or_else(|| anyhow!("RRSIG records need at least one signature"))?;
        if wire.iter().any(|rdata| rdata.get(0..2) != wire[0].get(0..2)) {
            return Err(anyhow!("RRSIG records in one set must cover the same type"));
        }
        Rdataset::signature(covers, record.ttl, slab)
    } else {
        Rdataset::new(rr_type, record.ttl, slab)
    };
    Ok(rdataset.with_trust(record.trust.0))
}
