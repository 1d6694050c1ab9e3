//! Per-package installation timeouts
//!
//! Installer-class tools cannot live with the flat 30-second default:
//! headless-browser packages routinely take minutes to download and build.
//! Such tools feed their package argument through this table from
//! [`Tool::timeout_for`].
//!
//! [`Tool::timeout_for`]: super::Tool::timeout_for

use std::time::Duration;

/// Known large packages and their install timeouts, in seconds.
const PACKAGE_TIMEOUTS: &[(&str, u64)] = &[
    ("puppeteer-mcp-server", 600),
    ("playwright-mcp-server", 600),
    ("@modelcontextprotocol/server-browser", 480),
    ("browser-automation", 480),
];

/// Keywords marking browser-adjacent packages that need the long timeout.
const BROWSER_KEYWORDS: &[&str] = &["browser", "puppeteer", "playwright", "chrome", "firefox"];

/// Install timeout for packages not otherwise classified.
const DEFAULT_INSTALL_TIMEOUT: Duration = Duration::from_secs(300);

/// Timeout for installing `package`.
///
/// Exact table match first, then partial match in either direction, then a
/// browser-keyword heuristic (ten minutes), then the five-minute default.
pub fn package_install_timeout(package: &str) -> Duration {
    for (name, secs) in PACKAGE_TIMEOUTS {
        if *name == package {
            return Duration::from_secs(*secs);
        }
    }
    for (name, secs) in PACKAGE_TIMEOUTS {
        if package.contains(name) || name.contains(package) {
            return Duration::from_secs(*secs);
        }
    }
    let lower = package.to_lowercase();
    if BROWSER_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        return Duration::from_secs(600);
    }
    DEFAULT_INSTALL_TIMEOUT
}
