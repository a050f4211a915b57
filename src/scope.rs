//! Engagement scope: the IPs, domains and networks the operator has put in
//! play, plus the direct commands that manage them.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::OnceLock;

use regex::Regex;

const IP_PATTERN: &str =
    r"\b(?:(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.){3}(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\b";
const NETWORK_PATTERN: &str = r"\b(?:(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.){3}(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)/(?:[0-9]|[1-2][0-9]|3[0-2])\b";
const DOMAIN_PATTERN: &str = r"\b(?:[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?\.)+[a-zA-Z]{2,}\b";

/// Name endings that mark files or local names rather than targets.
const EXCLUDED_SUFFIXES: &[&str] = &[
    ".txt", ".log", ".xml", ".json", ".csv", ".html", ".htm", ".php", ".js", ".css", ".py",
    ".sh", ".conf", ".cfg", ".home", ".local", ".lan", ".internal",
];

/// Reference and placeholder sites, excluded along with their subdomains.
const EXCLUDED_SITES: &[&str] = &[
    "example.com",
    "example.org",
    "test.com",
    "nmap.org",
    "github.com",
    "exploit-db.com",
];

fn ip_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(IP_PATTERN).expect("valid ip regex"))
}

fn network_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(NETWORK_PATTERN).expect("valid network regex"))
}

fn domain_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(DOMAIN_PATTERN).expect("valid domain regex"))
}

/// An IPv4 CIDR block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Network {
    base: Ipv4Addr,
    prefix: u8,
}

impl Ipv4Network {
    pub fn parse(cidr: &str) -> Option<Self> {
        let (addr, prefix) = cidr.trim().split_once('/')?;
        let base: Ipv4Addr = addr.parse().ok()?;
        let prefix: u8 = prefix.parse().ok()?;
        (prefix <= 32).then_some(Self { base, prefix })
    }

    fn mask(&self) -> u32 {
        if self.prefix == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(self.prefix))
        }
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        let mask = self.mask();
        u32::from(self.base) & mask == u32::from(ip) & mask
    }
}

/// A target picked out of free text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectedTarget {
    Network(String),
    Ip(String),
    Domain(String),
}

impl fmt::Display for DetectedTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectedTarget::Network(t) => write!(f, "Network: {t}"),
            DetectedTarget::Ip(t) => write!(f, "IP: {t}"),
            DetectedTarget::Domain(t) => write!(f, "Domain: {t}"),
        }
    }
}

/// Whether a domain-shaped token names a plausible target.
pub fn is_valid_target_domain(domain: &str) -> bool {
    let domain = domain.trim().to_lowercase();
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 || domain.contains('/') || domain.starts_with("localhost") {
        return false;
    }
    if EXCLUDED_SUFFIXES.iter().any(|s| domain.ends_with(s)) {
        return false;
    }
    if EXCLUDED_SITES
        .iter()
        .any(|site| domain == *site || domain.ends_with(&format!(".{site}")))
    {
        return false;
    }
    let tld = labels[labels.len() - 1];
    tld.len() >= 2 && !tld.contains('-')
}

#[derive(Debug, Clone, Default)]
pub struct ScopeRegistry {
    ips: BTreeSet<String>,
    domains: BTreeSet<String>,
    networks: BTreeSet<String>,
    notes: BTreeMap<String, String>,
}

impl ScopeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_ip(&mut self, ip: &str) -> bool {
        let ip = ip.trim();
        ip.parse::<IpAddr>().is_ok() && self.ips.insert(ip.to_string())
    }

    pub fn add_domain(&mut self, domain: &str) -> bool {
        let domain = domain.trim().to_lowercase();
        !domain.is_empty() && self.domains.insert(domain)
    }

    pub fn add_network(&mut self, network: &str) -> bool {
        let network = network.trim();
        Ipv4Network::parse(network).is_some() && self.networks.insert(network.to_string())
    }

    /// Remove `target` from whichever sets hold it.
    pub fn remove(&mut self, target: &str) -> bool {
        let target = target.trim();
        let lowered = target.to_lowercase();
        let removed_ip = self.ips.remove(target);
        let removed_domain = self.domains.remove(&lowered);
        let removed_network = self.networks.remove(target);
        if removed_ip || removed_domain || removed_network {
            self.notes.remove(target);
            true
        } else {
            false
        }
    }

    pub fn add_note(&mut self, target: impl Into<String>, note: impl Into<String>) {
        self.notes.insert(target.into(), note.into());
    }

    pub fn clear(&mut self) {
        self.ips.clear();
        self.domains.clear();
        self.networks.clear();
        self.notes.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.ips.is_empty() && self.domains.is_empty() && self.networks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ips.len() + self.domains.len() + self.networks.len()
    }

    pub fn all_targets(&self) -> Vec<String> {
        self.ips
            .iter()
            .chain(&self.domains)
            .chain(&self.networks)
            .cloned()
            .collect()
    }

    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "No targets in scope".to_string();
        }
        let mut lines = vec!["=== CURRENT SCOPE ===".to_string()];
        for (heading, set) in [
            ("IPs", &self.ips),
            ("Domains", &self.domains),
            ("Networks", &self.networks),
        ] {
            if set.is_empty() {
                continue;
            }
            lines.push(format!("{heading} ({}):", set.len()));
            for target in set {
                match self.notes.get(target) {
                    Some(note) => lines.push(format!("  • {target} - {note}")),
                    None => lines.push(format!("  • {target}")),
                }
            }
        }
        lines.push("=====================".to_string());
        lines.join("\n")
    }

    /// Add every network, IP and domain found in `text`. IPs inside a network
    /// found in the same text are skipped.
    pub fn auto_detect(&mut self, text: &str) -> Vec<DetectedTarget> {
        let mut added = Vec::new();

        let networks: Vec<&str> = network_regex().find_iter(text).map(|m| m.as_str()).collect();
        for network in &networks {
            if self.add_network(network) {
                added.push(DetectedTarget::Network(network.to_string()));
            }
        }

        let parsed_networks: Vec<Ipv4Network> =
            networks.iter().filter_map(|n| Ipv4Network::parse(n)).collect();
        for found in ip_regex().find_iter(text) {
            let ip = found.as_str();
            let inside_network = ip
                .parse::<Ipv4Addr>()
                .map(|addr| parsed_networks.iter().any(|n| n.contains(addr)))
                .unwrap_or(false);
            if !inside_network && self.add_ip(ip) {
                added.push(DetectedTarget::Ip(ip.to_string()));
            }
        }

        for found in domain_regex().find_iter(text) {
            let domain = found.as_str();
            if is_valid_target_domain(domain) && self.add_domain(domain) {
                added.push(DetectedTarget::Domain(domain.to_lowercase()));
            }
        }

        if !added.is_empty() {
            tracing::info!(count = added.len(), "targets added to scope");
        }
        added
    }

    /// Run a scope command and return its reply.
    pub fn execute(&mut self, command: &ScopeCommand) -> String {
        match command {
            ScopeCommand::Show => self.summary(),
            ScopeCommand::Clear => {
                if self.is_empty() {
                    "Scope is already empty.".to_string()
                } else {
                    self.clear();
                    "Scope cleared. All targets removed.".to_string()
                }
            }
            ScopeCommand::Add(None) => "No valid target found. Please specify an IP address, domain, or network (e.g., 'add 192.168.1.1 to scope').".to_string(),
            ScopeCommand::Add(Some(target)) => match target {
                DetectedTarget::Network(t) => {
                    if self.add_network(t) {
                        format!("Added network {t} to scope.")
                    } else {
                        format!("Failed to add {t} to scope (invalid network or already exists).")
                    }
                }
                DetectedTarget::Ip(t) => {
                    if self.add_ip(t) {
                        format!("Added IP {t} to scope.")
                    } else {
                        format!("Failed to add {t} to scope (invalid IP or already exists).")
                    }
                }
                DetectedTarget::Domain(t) => {
                    if self.add_domain(t) {
                        format!("Added domain {t} to scope.")
                    } else {
                        format!("Failed to add {t} to scope (already exists).")
                    }
                }
            },
            ScopeCommand::Remove(None) => "No valid target found to remove. Please specify an IP address, domain, or network.".to_string(),
            ScopeCommand::Remove(Some(target)) => {
                let t = target.value();
                if self.remove(t) {
                    format!("Removed {t} from scope.")
                } else {
                    format!("{t} was not in scope.")
                }
            }
        }
    }
}

impl DetectedTarget {
    pub fn value(&self) -> &str {
        match self {
            DetectedTarget::Network(t) | DetectedTarget::Ip(t) | DetectedTarget::Domain(t) => t,
        }
    }
}

/// Direct scope management requests that bypass the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeCommand {
    Show,
    Clear,
    Add(Option<DetectedTarget>),
    Remove(Option<DetectedTarget>),
}

impl ScopeCommand {
    /// Recognize a scope command. Show and clear match exactly; add and
    /// remove match `add <target> ... scope` and `remove <target> ... scope`.
    pub fn parse(input: &str) -> Option<Self> {
        let normalized = input.trim().trim_end_matches(['.', '!']).to_lowercase();
        match normalized.as_str() {
            "show scope" | "scope" | "list scope" | "current scope" => return Some(Self::Show),
            "clear scope" | "reset scope" => return Some(Self::Clear),
            _ => {}
        }
        if !normalized.ends_with("scope") {
            return None;
        }
        if normalized.starts_with("add ") {
            return Some(Self::Add(first_target(input)));
        }
        if normalized.starts_with("remove ") {
            return Some(Self::Remove(first_target(input)));
        }
        None
    }
}

/// First target in `text`, preferring networks over IPs over domains.
fn first_target(text: &str) -> Option<DetectedTarget> {
    if let Some(m) = network_regex().find(text) {
        return Some(DetectedTarget::Network(m.as_str().to_string()));
    }
    if let Some(m) = ip_regex().find(text) {
        return Some(DetectedTarget::Ip(m.as_str().to_string()));
    }
    domain_regex()
        .find(text)
        .map(|m| DetectedTarget::Domain(m.as_str().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_scope_summary() {
        let mut scope = ScopeRegistry::new();
        assert_eq!(scope.execute(&ScopeCommand::Show), "No targets in scope");
        assert_eq!(scope.execute(&ScopeCommand::Clear), "Scope is already empty.");
    }

    #[test]
    fn parses_commands() {
        assert_eq!(ScopeCommand::parse("Show Scope"), Some(ScopeCommand::Show));
        assert_eq!(ScopeCommand::parse("reset scope"), Some(ScopeCommand::Clear));
        assert_eq!(
            ScopeCommand::parse("add 10.0.0.5 to scope"),
            Some(ScopeCommand::Add(Some(DetectedTarget::Ip("10.0.0.5".into()))))
        );
        assert_eq!(
            ScopeCommand::parse("add 10.0.0.0/24 to scope"),
            Some(ScopeCommand::Add(Some(DetectedTarget::Network("10.0.0.0/24".into()))))
        );
        assert_eq!(
            ScopeCommand::parse("remove Target.io from scope"),
            Some(ScopeCommand::Remove(Some(DetectedTarget::Domain("Target.io".into()))))
        );
        assert_eq!(ScopeCommand::parse("add something to scope"), Some(ScopeCommand::Add(None)));
        assert_eq!(ScopeCommand::parse("what is the scope of this project"), None);
        assert_eq!(ScopeCommand::parse("scan 10.0.0.5"), None);
    }

    #[test]
    fn add_remove_replies() {
        let mut scope = ScopeRegistry::new();
        let add = ScopeCommand::parse("add 10.0.0.5 to scope").unwrap();
        assert_eq!(scope.execute(&add), "Added IP 10.0.0.5 to scope.");
        assert_eq!(
            scope.execute(&add),
            "Failed to add 10.0.0.5 to scope (invalid IP or already exists)."
        );
        let add = ScopeCommand::parse("add Target.io to scope").unwrap();
        assert_eq!(scope.execute(&add), "Added domain target.io to scope.");

        let remove = ScopeCommand::parse("remove target.io from scope").unwrap();
        assert_eq!(scope.execute(&remove), "Removed target.io from scope.");
        assert_eq!(scope.execute(&remove), "target.io was not in scope.");
        assert_eq!(
            scope.execute(&ScopeCommand::Remove(None)),
            "No valid target found to remove. Please specify an IP address, domain, or network."
        );
        assert_eq!(scope.execute(&ScopeCommand::Clear), "Scope cleared. All targets removed.");
        assert!(scope.is_empty());
    }

    #[test]
    fn summary_lists_sorted_sections() {
        let mut scope = ScopeRegistry::new();
        scope.add_ip("10.0.0.9");
        scope.add_ip("10.0.0.10");
        scope.add_domain("acme.io");
        scope.add_network("192.168.1.0/24");
        scope.add_note("acme.io", "primary");
        assert_eq!(
            scope.summary(),
            "=== CURRENT SCOPE ===\nIPs (2):\n  • 10.0.0.10\n  • 10.0.0.9\nDomains (1):\n  • acme.io - primary\nNetworks (1):\n  • 192.168.1.0/24\n====================="
        );
        assert_eq!(scope.len(), 4);
    }

    #[test]
    fn auto_detection_filters_noise() {
        let mut scope = ScopeRegistry::new();
        let added = scope.auto_detect(
            "scan 10.1.0.0/16 and 10.1.2.3 plus 172.16.0.4, save to scan.txt, \
             see nmap.org and docs.github.com, then hit api.acme.io",
        );
        assert_eq!(
            added,
            vec![
                DetectedTarget::Network("10.1.0.0/16".into()),
                DetectedTarget::Ip("172.16.0.4".into()),
                DetectedTarget::Domain("api.acme.io".into()),
            ]
        );
        assert!(scope.auto_detect("again 172.16.0.4").is_empty());
        assert_eq!(added[0].to_string(), "Network: 10.1.0.0/16");
    }

    #[test]
    fn network_containment() {
        let net = Ipv4Network::parse("10.0.0.0/8").unwrap();
        assert!(net.contains("10.200.3.4".parse().unwrap()));
        assert!(!net.contains("11.0.0.1".parse().unwrap()));
        assert!(Ipv4Network::parse("10.0.0.0/33").is_none());
        assert!(Ipv4Network::parse("0.0.0.0/0").unwrap().contains("8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn domain_validation() {
        assert!(is_valid_target_domain("target.co.uk"));
        assert!(!is_valid_target_domain("report.json"));
        assert!(!is_valid_target_domain("printer.lan"));
        assert!(!is_valid_target_domain("www.example.com"));
        assert!(!is_valid_target_domain("localhost.localdomain"));
    }
}
