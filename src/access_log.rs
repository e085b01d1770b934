//! Visitor address extraction from web server access logs.

use crate::correlator::VisitorSet;
use regex::Regex;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;
use std::sync::LazyLock;
use tracing::info;

static LEADING_IPV4: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})").expect("leading address pattern is valid")
});

/// Client address at the start of a combined-format log line.
///
/// The leftmost dotted quad wins. Lines that start with something that only
/// looks like a dotted quad (`999.1.1.1`) yield nothing; otherwise an IPv6
/// first token is accepted.
pub fn extract_address(line: &str) -> Option<IpAddr> {
    if let Some(caps) = LEADING_IPV4.captures(line) {
        return caps[1].parse::<Ipv4Addr>().ok().map(IpAddr::V4);
    }

    line.split_whitespace()
        .next()
        .map(|token| token.trim_start_matches('[').trim_end_matches(']'))
        .and_then(|token| token.parse::<Ipv6Addr>().ok())
        .map(IpAddr::V6)
}

/// Unique visitor addresses in a log.
pub fn parse(content: &str) -> VisitorSet {
    content.lines().filter_map(extract_address).collect()
}

/// Read and parse a log file.
pub async fn load(path: &Path) -> std::io::Result<VisitorSet> {
    let content = tokio::fs::read_to_string(path).await?;
    let visitors = parse(&content);
    info!(path = %path.display(), visitors = visitors.len(), "Access log parsed");
    Ok(visitors)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = r#"1.186.20.106 - - [10/Oct/2024:13:55:36 +0000] "GET /wp-login.php HTTP/1.1" 404 153 "-" "Mozilla/5.0"
192.168.1.5 - - [10/Oct/2024:13:55:40 +0000] "GET / HTTP/1.1" 200 612 "-" "curl/8.4.0"
1.186.20.106 - - [10/Oct/2024:13:56:01 +0000] "POST /xmlrpc.php HTTP/1.1" 403 0 "-" "-"
2001:db8::7 - - [10/Oct/2024:13:57:12 +0000] "GET /robots.txt HTTP/1.1" 200 24 "-" "bot"
999.10.10.10 - - [10/Oct/2024:13:58:00 +0000] "GET / HTTP/1.1" 400 0 "-" "-"
- - - [10/Oct/2024:13:58:30 +0000] "GET / HTTP/1.1" 400 0 "-" "-"

"#;

    #[test]
    fn test_extract_ipv4() {
        assert_eq!(
            extract_address("8.8.8.8 - - [..] \"GET /\""),
            Some("8.8.8.8".parse().unwrap())
        );
    }

    #[test]
    fn test_extract_requires_line_start() {
        assert_eq!(extract_address("client=8.8.8.8 GET /"), None);
    }

    #[test]
    fn test_extract_invalid_octets() {
        assert_eq!(extract_address("256.1.1.1 - -"), None);
    }

    #[test]
    fn test_extract_ipv6() {
        assert_eq!(
            extract_address("[2001:db8::1] - - \"GET /\""),
            Some("2001:db8::1".parse().unwrap())
        );
    }

    #[test]
    fn test_parse_deduplicates() {
        let visitors = parse(LOG);
        assert_eq!(visitors.len(), 3);
        assert!(visitors.contains(&"1.186.20.106".parse().unwrap()));
        assert!(visitors.contains(&"192.168.1.5".parse().unwrap()));
        assert!(visitors.contains(&"2001:db8::7".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        assert!(load(Path::new("/nonexistent/access.log")).await.is_err());
    }
}
