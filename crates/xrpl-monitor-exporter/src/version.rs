// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! rippled version string ordering for the upgrade advisor.

use std::cmp::Ordering;

/// Parsed rippled version, e.g. `rippled-2.2.0` or `rippled-2.3.0-b1`. A
/// release (empty prerelease) ranks higher than any prerelease of the same
/// triple.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RippledVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub prerelease: String,
}

impl RippledVersion {
    /// Accepts the bare triple or the `rippled-` prefixed form, with an
    /// optional `-<prerelease>` tail.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut segments = raw.split('-').peekable();
        // Skip any leading product-name segments ("rippled", "xrpld", ...).
        let triple = loop {
            let segment = segments.next()?;
            if segment.chars().next().is_some_and(|c| c.is_ascii_digit()) {
                break segment;
            }
            segments.peek()?;
        };
        let mut numbers = triple.split('.');
        let major = numbers.next()?.parse().ok()?;
        let minor = numbers.next()?.parse().ok()?;
        let patch = numbers.next()?.parse().ok()?;
        if numbers.next().is_some() {
            return None;
        }
        let prerelease = segments.collect::<Vec<_>>().join("-");
        Some(Self {
            major,
            minor,
            patch,
            prerelease,
        })
    }
}

impl Ord for RippledVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (self.prerelease.is_empty(), other.prerelease.is_empty()) {
                (true, true) => Ordering::Equal,
                // A release outranks its own prereleases.
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => self.prerelease.cmp(&other.prerelease),
            })
    }
}

impl PartialOrd for RippledVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn v(raw: &str) -> RippledVersion {
        RippledVersion::parse(raw).unwrap_or_else(|| panic!("unparsable: {raw}"))
    }

    #[test]
    fn parses_common_shapes() {
        assert_eq!(
            v("rippled-2.2.0"),
            RippledVersion {
                major: 2,
                minor: 2,
                patch: 0,
                prerelease: String::new()
            }
        );
        assert_eq!(v("2.3.1").patch, 1);
        assert_eq!(v("rippled-2.3.0-b1").prerelease, "b1");
        assert_eq!(v("rippled-2.3.0-rc1-hotfix").prerelease, "rc1-hotfix");
        assert_eq!(RippledVersion::parse("garbage"), None);
        assert_eq!(RippledVersion::parse("rippled-2.3"), None);
        assert_eq!(RippledVersion::parse(""), None);
    }

    #[test]
    fn ordering_by_triple() {
        assert!(v("rippled-2.3.0") > v("rippled-2.2.9"));
        assert!(v("rippled-2.2.10") > v("rippled-2.2.9"));
        assert!(v("1.9.4") < v("2.0.0"));
    }

    #[test]
    fn release_outranks_prerelease() {
        assert!(v("rippled-2.2.0") > v("rippled-2.2.0-rc2"));
        assert!(v("rippled-2.2.0-rc2") > v("rippled-2.2.0-rc1"));
        assert!(v("rippled-2.2.1-b1") > v("rippled-2.2.0"));
        assert_eq!(v("rippled-2.2.0").cmp(&v("2.2.0")), Ordering::Equal);
    }
}
