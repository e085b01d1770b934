//! Network ranges and the block-list range index.
//!
//! A [`RangeIndex`] is built once per run from raw block-list lines. Ranges
//! that only cover private, loopback or link-local space are dropped at build
//! time, the rest are normalized and compiled into sorted, disjoint integer
//! spans so that membership is a binary search rather than a scan.

use ipnet::IpNet;
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Address class of a network range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RangeClass {
    /// Publicly routable space, retained in the index.
    Public,
    /// Private or otherwise reserved space.
    Private,
    /// Loopback space.
    Loopback,
    /// Link-local space.
    LinkLocal,
}

impl RangeClass {
    /// Whether ranges of this class are kept in the index.
    pub fn is_public(&self) -> bool {
        matches!(self, RangeClass::Public)
    }
}

impl fmt::Display for RangeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RangeClass::Public => "public",
            RangeClass::Private => "private",
            RangeClass::Loopback => "loopback",
            RangeClass::LinkLocal => "link-local",
        };
        f.write_str(name)
    }
}

/// Reserved blocks, checked in order. A range belongs to a class when the
/// whole range (network through broadcast) sits inside one of its blocks.
const RESERVED_BLOCKS: &[(&str, RangeClass)] = &[
    ("127.0.0.0/8", RangeClass::Loopback),
    ("::1/128", RangeClass::Loopback),
    ("169.254.0.0/16", RangeClass::LinkLocal),
    ("fe80::/10", RangeClass::LinkLocal),
    ("0.0.0.0/8", RangeClass::Private),
    ("10.0.0.0/8", RangeClass::Private),
    ("172.16.0.0/12", RangeClass::Private),
    ("192.0.0.0/29", RangeClass::Private),
    ("192.0.0.170/31", RangeClass::Private),
    ("192.0.2.0/24", RangeClass::Private),
    ("192.168.0.0/16", RangeClass::Private),
    ("198.18.0.0/15", RangeClass::Private),
    ("198.51.100.0/24", RangeClass::Private),
    ("203.0.113.0/24", RangeClass::Private),
    ("240.0.0.0/4", RangeClass::Private),
    ("255.255.255.255/32", RangeClass::Private),
    ("::/128", RangeClass::Private),
    ("::ffff:0:0/96", RangeClass::Private),
    ("100::/64", RangeClass::Private),
    ("2001::/23", RangeClass::Private),
    ("2001:db8::/32", RangeClass::Private),
    ("2001:10::/28", RangeClass::Private),
    ("fc00::/7", RangeClass::Private),
];

static RESERVED: LazyLock<Vec<(IpNet, RangeClass)>> = LazyLock::new(|| {
    RESERVED_BLOCKS
        .iter()
        .filter_map(|(cidr, class)| cidr.parse::<IpNet>().ok().map(|net| (net, *class)))
        .collect()
});

/// Error returned when a block-list entry is not a CIDR or an address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid network range: {0:?}")]
pub struct RangeParseError(pub String);

/// A normalized CIDR block.
///
/// Host bits are always zero. Bare addresses become single-host ranges
/// (`/32` or `/128`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NetworkRange(IpNet);

impl NetworkRange {
    /// Normalize an already-parsed network.
    pub fn new(net: IpNet) -> Self {
        Self(net.trunc())
    }

    /// Single-host range for an address.
    pub fn host(addr: IpAddr) -> Self {
        Self(IpNet::from(addr))
    }

    /// The underlying network.
    pub fn net(&self) -> IpNet {
        self.0
    }

    /// Classify the range as public or one of the discarded classes.
    pub fn class(&self) -> RangeClass {
        RESERVED
            .iter()
            .find(|(block, _)| block.contains(&self.0))
            .map(|(_, class)| *class)
            .unwrap_or(RangeClass::Public)
    }

    /// True CIDR containment. Addresses of the other family never match.
    pub fn contains(&self, addr: &IpAddr) -> bool {
        self.0.contains(addr)
    }

    fn v4_span(&self) -> Option<(u32, u32)> {
        match self.0 {
            IpNet::V4(net) => Some((u32::from(net.network()), u32::from(net.broadcast()))),
            IpNet::V6(_) => None,
        }
    }

    fn v6_span(&self) -> Option<(u128, u128)> {
        match self.0 {
            IpNet::V6(net) => Some((u128::from(net.network()), u128::from(net.broadcast()))),
            IpNet::V4(_) => None,
        }
    }
}

impl FromStr for NetworkRange {
    type Err = RangeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(addr) = s.parse::<IpAddr>() {
            return Ok(Self::host(addr));
        }
        s.parse::<IpNet>()
            .map(Self::new)
            .map_err(|_| RangeParseError(s.to_string()))
    }
}

impl fmt::Display for NetworkRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Counters collected while building an index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStats {
    /// Entries that parsed as a range.
    pub parsed: usize,
    /// Distinct public ranges kept.
    pub retained: usize,
    /// Ranges dropped as private, loopback or link-local.
    pub excluded: usize,
    /// Lines that were neither blank, a comment, nor a range.
    pub malformed: usize,
    /// Public ranges that normalized to one already kept.
    pub duplicates: usize,
}

enum Entry {
    Ignored,
    Malformed,
    Excluded,
    Public(NetworkRange),
}

fn classify_line(line: &str) -> Entry {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Entry::Ignored;
    }
    match line.parse::<NetworkRange>() {
        Ok(range) if range.class().is_public() => Entry::Public(range),
        Ok(range) => {
            debug!(range = %range, class = %range.class(), "Excluding non-public range");
            Entry::Excluded
        }
        Err(e) => {
            warn!(entry = line, error = %e, "Skipping malformed block-list entry");
            Entry::Malformed
        }
    }
}

/// Immutable set of public block-list ranges with logarithmic lookup.
#[derive(Debug, Clone, Default)]
pub struct RangeIndex {
    ranges: BTreeSet<NetworkRange>,
    v4: Vec<(u32, u32)>,
    v6: Vec<(u128, u128)>,
    stats: BuildStats,
}

impl RangeIndex {
    /// Build an index from raw block-list lines.
    ///
    /// Blank lines and `#` comments are ignored, malformed entries are
    /// counted and skipped, and non-public ranges are dropped. Parsing runs
    /// on the rayon pool.
    pub fn build<S>(entries: &[S]) -> Self
    where
        S: AsRef<str> + Sync,
    {
        let classified: Vec<Entry> = entries
            .par_iter()
            .map(|line| classify_line(line.as_ref()))
            .collect();

        let mut stats = BuildStats::default();
        let mut ranges = BTreeSet::new();
        for entry in classified {
            match entry {
                Entry::Ignored => {}
                Entry::Malformed => stats.malformed += 1,
                Entry::Excluded => {
                    stats.parsed += 1;
                    stats.excluded += 1;
                }
                Entry::Public(range) => {
                    stats.parsed += 1;
                    if !ranges.insert(range) {
                        stats.duplicates += 1;
                    }
                }
            }
        }
        stats.retained = ranges.len();

        let v4 = merge_spans(ranges.iter().filter_map(NetworkRange::v4_span).collect());
        let v6 = merge_spans(ranges.iter().filter_map(NetworkRange::v6_span).collect());

        info!(
            retained = stats.retained,
            excluded = stats.excluded,
            malformed = stats.malformed,
            duplicates = stats.duplicates,
            v4_spans = v4.len(),
            v6_spans = v6.len(),
            "Range index built"
        );

        Self {
            ranges,
            v4,
            v6,
            stats,
        }
    }

    /// Whether `addr` lies inside any retained range.
    pub fn contains(&self, addr: &IpAddr) -> bool {
        match addr {
            IpAddr::V4(v4) => span_contains(&self.v4, u32::from(*v4)),
            IpAddr::V6(v6) => span_contains(&self.v6, u128::from(*v6)),
        }
    }

    /// Retained ranges in canonical order.
    pub fn ranges(&self) -> impl Iterator<Item = &NetworkRange> {
        self.ranges.iter()
    }

    /// Number of distinct retained ranges.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Whether no range was retained.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Counters from the build.
    pub fn stats(&self) -> BuildStats {
        self.stats
    }
}

/// Sort spans and coalesce overlapping ones.
fn merge_spans<T: Ord + Copy>(mut spans: Vec<(T, T)>) -> Vec<(T, T)> {
    spans.sort_unstable();
    let mut merged: Vec<(T, T)> = Vec::with_capacity(spans.len());
    for (start, end) in spans {
        match merged.last_mut() {
            Some(last) if start <= last.1 => {
                if end > last.1 {
                    last.1 = end;
                }
            }
            _ => merged.push((start, end)),
        }
    }
    merged
}

/// Binary search over sorted, disjoint spans.
fn span_contains<T: Ord + Copy>(spans: &[(T, T)], value: T) -> bool {
    let idx = spans.partition_point(|(start, _)| *start <= value);
    idx > 0 && spans[idx - 1].1 >= value
}
