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

//! Implements the database description file.
//!
//! A description names the kind of database to create and lists the
//! records to load into it:
//!
//! ```toml
//! kind = "zone"
//! origin = "example."
//!
//! [[records]]
//! name = "example."
//! type = "SOA"
//! ttl = 3600
//! rdata = ["ns.example. hostmaster.example. 1 7200 3600 1209600 300"]
//! ```

use std::fmt::{self, Write};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use log::Level::Debug;
use log::{debug, log_enabled};
use paste::paste;
use serde::{de, Deserialize};

use rbtstore::class::Class;
use rbtstore::db::DbKind;
use rbtstore::name::Name;
use rbtstore::rr::{Trust, Type};

////////////////////////////////////////////////////////////////////////
// CONFIGURATION LOADING                                              //
////////////////////////////////////////////////////////////////////////

/// Loads a database description from the file given by `path`.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let raw_config = fs::read(path.as_ref()).context("failed to read the database description")?;
    let config: Config =
        toml::from_slice(&raw_config).context("failed to parse the database description")?;
    log_config_summary(&config);
    Ok(config)
}

/// Summarizes the description in the log, if the debug log level is
/// enabled.
fn log_config_summary(config: &Config) {
    if !log_enabled!(Debug) {
        return;
    }

    let mut message = format!(
        "Database description loaded:\n\
         Kind:         {:?}\n\
         Origin:       {}/{}\n\
         Node locks:   {}\n\
         Records:      {} sets",
        config.kind.0,
        config.origin.0,
        config.class.0,
        config
            .lock_count
            .map_or_else(|| String::from("default"), |n| n.to_string()),
        config.records.len(),
    );
    for record in &config.records {
        // Writing to a String can't fail.
        let _ = write!(
            message,
            "\n  {} {} {} ({} records)",
            record.name.0,
            record.rr_type.0,
            record.ttl,
            record.rdata.len(),
        );
    }
    debug!("{}", message);
}

////////////////////////////////////////////////////////////////////////
// CONFIGURATION FILE STRUCTURE                                       //
////////////////////////////////////////////////////////////////////////

/// The complete database description.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub kind: ConfigKind,
    pub origin: ConfigName,
    #[serde(default = "default_class")]
    pub class: ConfigClass,

    /// The number of node locks; the database picks a default if this
    /// is missing.
    pub lock_count: Option<usize>,

    /// The window, in seconds, within which cache data counts as
    /// "about to expire".
    #[serde(default = "default_virtual_time")]
    pub virtual_time: u32,

    #[serde(default)]
    pub records: Vec<RecordConfig>,
}

fn default_class() -> ConfigClass {
    ConfigClass(Class::IN)
}

fn default_virtual_time() -> u32 {
    300
}

/// A record set to load.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecordConfig {
    pub name: ConfigName,
    #[serde(rename = "type")]
    pub rr_type: ConfigType,
    pub ttl: u32,

    /// The trust level of cache data. Ignored for zones.
    #[serde(default = "default_trust")]
    pub trust: ConfigTrust,

    /// The records, each in presentation format.
    pub rdata: Vec<String>,
}

fn default_trust() -> ConfigTrust {
    ConfigTrust(Trust::default())
}

////////////////////////////////////////////////////////////////////////
// SERDE HELPERS                                                      //
////////////////////////////////////////////////////////////////////////

/// Wraps a [`DbKind`], which is spelled `zone`, `stub`, or `cache`.
#[derive(Clone, Copy, Debug)]
pub struct ConfigKind(pub DbKind);

impl<'de> Deserialize<'de> for ConfigKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(rename_all = "lowercase")]
        enum Kind {
            Zone,
            Stub,
            Cache,
        }

        Ok(ConfigKind(match Kind::deserialize(deserializer)? {
            Kind::Zone => DbKind::Zone,
            Kind::Stub => DbKind::Stub,
            Kind::Cache => DbKind::Cache,
        }))
    }
}

/// Creates a deserializable wrapper over a type that implements
/// [`FromStr`](std::str::FromStr).
macro_rules! make_serde_wrapper {
    ($wrapper:ident, $over:ty, $description:literal) => {
        /// A macro-generated deserializable wrapper over an
        /// [`rbtstore`] type.
        #[derive(Clone, Debug)]
        pub struct $wrapper(pub $over);

        impl<'de> Deserialize<'de> for $wrapper {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: de::Deserializer<'de>,
            {
                deserializer.deserialize_str(paste! { [<$wrapper Visitor>] })
            }
        }

        paste! {
            /// A macro-generated [`Visitor`](de::Visitor).
            #[derive(Debug)]
            struct [<$wrapper Visitor>];
        }

        impl<'de> de::Visitor<'de> for paste! { [<$wrapper Visitor>] } {
            type Value = $wrapper;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str($description)
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                value
                    .parse()
                    .map($wrapper)
                    .map_err(|e| E::custom(format!("invalid {}: {}", $description, e)))
            }
        }
    };
}

make_serde_wrapper!(ConfigName, Name, "domain name");
make_serde_wrapper!(ConfigClass, Class, "DNS class");
make_serde_wrapper!(ConfigType, Type, "RR type");
make_serde_wrapper!(ConfigTrust, Trust, "trust level");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_cache_description() {
        let config: Config = toml::from_str(
            r#"
            kind = "cache"
            origin = "."
            lock_count = 7

            [[records]]
            name = "www.example."
            type = "A"
            ttl = 300
            trust = "Answer"
            rdata = ["192.0.2.1", "192.0.2.2"]
            "#,
        )
        .unwrap();
        assert_eq!(config.kind.0, DbKind::Cache);
        assert_eq!(config.class.0, Class::IN);
        assert_eq!(config.lock_count, Some(7));
        assert_eq!(config.virtual_time, 300);
        assert_eq!(config.records.len(), 1);
        assert_eq!(config.records[0].rr_type.0, Type::A);
        assert_eq!(config.records[0].trust.0, Trust::Answer);
        assert_eq!(config.records[0].rdata.len(), 2);
    }

    #[test]
    fn rejects_bad_descriptions() {
        assert!(toml::from_str::<Config>("kind = \"forest\"\norigin = \"example.\"").is_err());
        assert!(
            toml::from_str::<Config>("kind = \"zone\"\norigin = \"example.\"\nextra = 1").is_err()
        );
        assert!(toml::from_str::<Config>(
            r#"
            kind = "zone"
            origin = "example."

            [[records]]
            name = "example."
            type = "NOPE"
            ttl = 1
            rdata = []
            "#
        )
        .is_err());
    }
}
