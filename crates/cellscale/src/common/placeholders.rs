use std::borrow::Cow;
use std::fmt::Write;

use nom::IResult;
use nom::bytes::complete::{tag, take_until};
use nom::sequence::delimited;

use crate::Map;

pub const HOSTNAME_PLACEHOLDER: &str = "HOSTNAME";
pub const CELL_PLACEHOLDER: &str = "CELL";
pub const PARTITION_PLACEHOLDER: &str = "PARTITION";
pub const DOMAIN_PLACEHOLDER: &str = "DOMAIN";
pub const OTP_PLACEHOLDER: &str = "OTP";

/// Used when the configuration does not provide its own bootstrap template.
pub const DEFAULT_BOOTSTRAP_TEMPLATE: &str = "#!/bin/sh
export CELL=%{CELL}
export PARTITION=%{PARTITION}
export HOSTNAME=%{HOSTNAME}
export DOMAIN=%{DOMAIN}
export OTP=%{OTP}
";

pub type PlaceholderMap<'a> = Map<&'static str, Cow<'a, str>>;

/// Values known at the moment an instance is launched.
pub struct BootstrapValues<'a> {
    pub hostname: &'a str,
    pub cell: &'a str,
    pub partition: &'a str,
    pub domain: &'a str,
    pub otp: &'a str,
}

/// Renders instance bootstrap data (user data) from a template.
pub fn fill_bootstrap_template(template: &str, values: &BootstrapValues) -> String {
    let mut placeholders = PlaceholderMap::default();
    placeholders.insert(HOSTNAME_PLACEHOLDER, values.hostname.into());
    placeholders.insert(CELL_PLACEHOLDER, values.cell.into());
    placeholders.insert(PARTITION_PLACEHOLDER, values.partition.into());
    placeholders.insert(DOMAIN_PLACEHOLDER, values.domain.into());
    placeholders.insert(OTP_PLACEHOLDER, values.otp.into());
    resolve(&placeholders, template)
}

pub fn resolve(map: &PlaceholderMap, input: &str) -> String {
    let mut buffer = String::with_capacity(input.len());
    for part in parse_resolvable_string(input) {
        match part {
            StringPart::Verbatim(data) => buffer.push_str(data),
            StringPart::Placeholder(placeholder) => match map.get(placeholder) {
                Some(value) => buffer.push_str(value),
                None => {
                    log::warn!("Encountered an unknown placeholder `{placeholder}` in a template");
                    let _ = write!(buffer, "%{{{placeholder}}}");
                }
            },
        }
    }
    buffer
}

#[derive(Debug, Eq, PartialEq)]
pub enum StringPart<'a> {
    Verbatim(&'a str),
    Placeholder(&'a str),
}

fn parse_placeholder(data: &str) -> IResult<&str, &str> {
    delimited(tag("%{"), take_until("}"), tag("}"))(data)
}

/// Splits a string into verbatim parts and `%{NAME}` placeholders.
///
/// An unterminated `%{` is kept verbatim.
pub fn parse_resolvable_string(data: &str) -> Vec<StringPart<'_>> {
    let mut parts = vec![];
    let mut input = data;
    let mut scanned = 0;

    while let Some(offset) = input[scanned..].find("%{") {
        let start = scanned + offset;
        match parse_placeholder(&input[start..]) {
            Ok((rest, placeholder)) => {
                if start > 0 {
                    parts.push(StringPart::Verbatim(&input[..start]));
                }
                parts.push(StringPart::Placeholder(placeholder));
                input = rest;
                scanned = 0;
            }
            Err(_) => {
                scanned = start + 2;
            }
        }
    }

    if !input.is_empty() {
        parts.push(StringPart::Verbatim(input));
    }

    parts
}
