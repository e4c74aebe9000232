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

//! Converts RDATA between presentation format and wire format.
//!
//! Only the handful of types needed to describe test databases are
//! understood; everything else must use the generic `\# LENGTH HEX`
//! syntax of [RFC 3597 § 5].
//!
//! [RFC 3597 § 5]: https://datatracker.ietf.org/doc/html/rfc3597#section-5

use std::fmt::Write;
use std::net::{Ipv4Addr, Ipv6Addr};

use anyhow::{anyhow, bail, Context, Result};

use rbtstore::name::Name;
use rbtstore::rr::Type;

////////////////////////////////////////////////////////////////////////
// PARSING                                                            //
////////////////////////////////////////////////////////////////////////

/// Parses RDATA of type `rr_type` from presentation format.
pub fn parse(rr_type: Type, text: &str) -> Result<Vec<u8>> {
    let fields = split_fields(text)?;
    if fields.first().map(String::as_str) == Some("\\#") {
        return parse_generic(&fields[1..]);
    }

    let mut wire = Vec::new();
    match rr_type {
        Type::A => {
            let [address] = exact_fields::<1>(&fields)?;
            let address: Ipv4Addr = address.parse().context("invalid IPv4 address")?;
            wire.extend_from_slice(&address.octets());
        }
        Type::AAAA => {
            let [address] = exact_fields::<1>(&fields)?;
            let address: Ipv6Addr = address.parse().context("invalid IPv6 address")?;
            wire.extend_from_slice(&address.octets());
        }
        Type::NS | Type::CNAME | Type::DNAME | Type::PTR => {
            let [target] = exact_fields::<1>(&fields)?;
            push_name(&mut wire, target)?;
        }
        Type::MX => {
            let [preference, exchange] = exact_fields::<2>(&fields)?;
            let preference: u16 = preference.parse().context("invalid MX preference")?;
            wire.extend_from_slice(&preference.to_be_bytes());
            push_name(&mut wire, exchange)?;
        }
        Type::SOA => {
            let [mname, rname, serial, refresh, retry, expire, minimum] =
                exact_fields::<7>(&fields)?;
            push_name(&mut wire, mname)?;
            push_name(&mut wire, rname)?;
            for value in [serial, refresh, retry, expire, minimum] {
                let value: u32 = value.parse().context("invalid SOA field")?;
                wire.extend_from_slice(&value.to_be_bytes());
            }
        }
        Type::TXT => {
            if fields.is_empty() {
                bail!("TXT records need at least one string");
            }
            for string in &fields {
                let len = u8::try_from(string.len())
                    .map_err(|_| anyhow!("TXT string is too long"))?;
                wire.push(len);
                wire.extend_from_slice(string.as_bytes());
            }
        }
        _ => bail!("RDATA of type {} must be given in the \\# generic format", rr_type),
    }
    Ok(wire)
}

/// Parses the fields following `\#`: a length and hexadecimal data.
fn parse_generic(fields: &[String]) -> Result<Vec<u8>> {
    let (len, hex) = fields
        .split_first()
        .ok_or_else(|| anyhow!("missing RDATA length"))?;
    let len: usize = len.parse().context("invalid RDATA length")?;
    let hex: String = hex.concat();
    if hex.len() % 2 != 0 {
        bail!("odd number of hexadecimal digits");
    }
    let wire = (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16))
        .collect::<Result<Vec<u8>, _>>()
        .context("invalid hexadecimal data")?;
    if wire.len() != len {
        bail!("RDATA length is {}, but {} octets were given", len, wire.len());
    }
    Ok(wire)
}

/// Splits presentation-format RDATA into whitespace-separated fields.
/// Double quotes group a field containing whitespace, and a backslash
/// includes the next character literally.
fn split_fields(text: &str) -> Result<Vec<String>> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_field = false;
    let mut quoted = false;
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => {
                quoted = !quoted;
                in_field = true;
            }
            '\\' => {
                let escaped = chars.next().ok_or_else(|| anyhow!("dangling backslash"))?;
                // Keep the escape for the generic-format marker.
                if escaped == '#' && !in_field {
                    current.push('\\');
                }
                current.push(escaped);
                in_field = true;
            }
            c if c.is_whitespace() && !quoted => {
                if in_field {
                    fields.push(std::mem::take(&mut current));
                    in_field = false;
                }
            }
            c => {
                current.push(c);
                in_field = true;
            }
        }
    }
    if quoted {
        bail!("unmatched quote");
    }
    if in_field {
        fields.push(current);
    }
    Ok(fields)
}

fn exact_fields<const N: usize>(fields: &[String]) -> Result<[&str; N]> {
    let strs: Vec<&str> = fields.iter().map(String::as_str).collect();
    strs.try_into()
        .map_err(|_| anyhow!("expected {} fields, found {}", N, fields.len()))
}

fn push_name(wire: &mut Vec<u8>, text: &str) -> Result<()> {
    let name: Name = text.parse().with_context(|| format!("invalid name {}", text))?;
    wire.extend_from_slice(name.wire_repr());
    Ok(())
}

////////////////////////////////////////////////////////////////////////
// FORMATTING                                                         //
////////////////////////////////////////////////////////////////////////

/// Formats RDATA of type `rr_type` in presentation format, falling
/// back to the generic format for unknown types or malformed data.
pub fn format(rr_type: Type, rdata: &[u8]) -> String {
    format_known(rr_type, rdata).unwrap_or_else(|| format_generic(rdata))
}

fn format_known(rr_type: Type, rdata: &[u8]) -> Option<String> {
    match rr_type {
        Type::A => {
            let octets: [u8; 4] = rdata.try_into().ok()?;
            Some(Ipv4Addr::from(octets).to_string())
        }
        Type::AAAA => {
            let octets: [u8; 16] = rdata.try_into().ok()?;
            Some(Ipv6Addr::from(octets).to_string())
        }
        Type::NS | Type::CNAME | Type::DNAME | Type::PTR => {
            let (name, len) = Name::try_from_uncompressed(rdata).ok()?;
            (len == rdata.len()).then(|| name.to_string())
        }
        Type::MX => {
            let preference = u16::from_be_bytes(rdata.get(0..2)?.try_into().ok()?);
            let (exchange, len) = Name::try_from_uncompressed(&rdata[2..]).ok()?;
            (len + 2 == rdata.len()).then(|| format!("{} {}", preference, exchange))
        }
        Type::SOA => {
            let (mname, mlen) = Name::try_from_uncompressed(rdata).ok()?;
            let (rname, rlen) = Name::try_from_uncompressed(&rdata[mlen..]).ok()?;
            let numbers = rdata.get(mlen + rlen..)?;
            if numbers.len() != 20 {
                return None;
            }
            let mut text = format!("{} {}", mname, rname);
            for chunk in numbers.chunks_exact(4) {
                let value = u32::from_be_bytes(chunk.try_into().ok()?);
                write!(text, " {}", value).ok()?;
            }
            Some(text)
        }
        Type::TXT => {
            let mut text = String::new();
            let mut rest = rdata;
            while let Some((&len, tail)) = rest.split_first() {
                let string = tail.get(..len as usize)?;
                if !text.is_empty() {
                    text.push(' ');
                }
                text.push('"');
                for &octet in string {
                    match octet {
                        b'"' | b'\\' => write!(text, "\\{}", octet as char).ok()?,
                        0x20..=0x7e => text.push(octet as char),
                        _ => write!(text, "\\{:03}", octet).ok()?,
                    }
                }
                text.push('"');
                rest = &tail[len as usize..];
            }
            Some(text)
        }
        _ => None,
    }
}

fn format_generic(rdata: &[u8]) -> String {
    let mut text = format!("\\# {}", rdata.len());
    if !rdata.is_empty() {
        text.push(' ');
        for octet in rdata {
            // Writing to a String can't fail.
            let _ = write!(text, "{:02x}", octet);
        }
    }
    text
}
