//! WHOIS aggregation over port 43.
//!
//! One lookup fans out into a referral chain: the IANA root names the
//! registry (or RIR), which may refer onward to a registrar. Every hop's
//! raw answer is kept as a segment and the segments merge into one
//! [`WhoisRecord`]. A single attempt per request, fail-fast; timeouts and
//! transport errors surface without retry.

use crate::{config::Config, errors::GatewayError, record::WhoisRecord};
use once_cell::sync::Lazy;
use publicsuffix::{List, Psl};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::RwLock,
    time::timeout,
};
use tracing::{debug, warn};

static PSL: Lazy<List> = Lazy::new(List::new);

const IANA_WHOIS_SERVER: &str = "whois.iana.org";
const WHOIS_PORT: u16 = 43;

pub struct WhoisAggregator {
    config: Arc<Config>,
    // Memoized TLD -> whois server discoveries
    tld_servers: RwLock<HashMap<String, String>>,
}

impl WhoisAggregator {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            tld_servers: RwLock::new(HashMap::new()),
        }
    }

    /// Lookup for an IP literal. Loopback addresses short-circuit to the
    /// sentinel record without touching any upstream server.
    pub async fn lookup_ip(&self, ip: &str) -> Result<WhoisRecord, GatewayError> {
        if is_loopback(ip) {
            debug!("Loopback lookup for {}, returning sentinel", ip);
            return Ok(WhoisRecord::loopback_sentinel());
        }

        // The IANA root names the responsible RIR; the RIR may refer onward.
        let root_segment = self.query(IANA_WHOIS_SERVER, ip).await?;
        let mut segments = vec![root_segment];

        if let Some(rir_server) = referral_target(&segments[0]) {
            self.follow_referrals(rir_server, ip, &mut segments).await;
        }

        Ok(WhoisRecord::from_segments(&segments))
    }

    /// Lookup for a domain hostname. Referral depth is bounded; a chain
    /// longer than `max_referrals` hops is cut off at the bound.
    pub async fn lookup_domain(&self, domain: &str) -> Result<WhoisRecord, GatewayError> {
        let tld = self.extract_tld(domain)?;
        let registry_server = self.find_whois_server(&tld).await?;

        let first_segment = self.query(&registry_server, domain).await?;
        let mut segments = vec![first_segment];

        if let Some(next_server) = referral_target(&segments[0]) {
            if next_server != registry_server {
                self.follow_referrals(next_server, domain, &mut segments).await;
            }
        }

        Ok(WhoisRecord::from_segments(&segments))
    }

    /// Follow a referral chain, appending each hop's answer as a segment.
    /// The chain is capped at `max_referrals` servers in total, counting
    /// the initial query; a registry -> registrar -> sub-registrar chain
    /// collapses there even if further referrals exist. A hop that fails
    /// ends the chain; segments gathered so far stand.
    async fn follow_referrals(&self, first_server: String, query: &str, segments: &mut Vec<String>) {
        let mut visited: Vec<String> = Vec::new();
        let mut server = first_server;

        while segments.len() < self.config.max_referrals {
            if visited.contains(&server) {
                break;
            }
            visited.push(server.clone());

            debug!("Following referral to {} for {}", server, query);
            match self.query(&server, query).await {
                Ok(data) => {
                    let next = referral_target(&data);
                    segments.push(data);
                    match next {
                        Some(next_server) if next_server != server => server = next_server,
                        _ => break,
                    }
                }
                Err(e) => {
                    warn!("Referral query to {} failed for {}: {}", server, query, e);
                    break;
                }
            }
        }
    }

    fn extract_tld(&self, domain: &str) -> Result<String, GatewayError> {
        if let Some(parsed) = PSL.domain(domain.as_bytes()) {
            let suffix = parsed.suffix();
            if let Ok(tld) = std::str::from_utf8(suffix.as_bytes()) {
                return Ok(tld.to_string());
            }
        }

        // PSL miss (single-label hosts, odd input): take the last label
        domain
            .rsplit('.')
            .next()
            .filter(|label| !label.is_empty())
            .map(|label| label.to_string())
            .ok_or_else(|| GatewayError::NoWhoisServer(domain.to_string()))
    }

    async fn find_whois_server(&self, tld: &str) -> Result<String, GatewayError> {
        {
            let servers = self.tld_servers.read().await;
            if let Some(server) = servers.get(tld) {
                return Ok(server.clone());
            }
        }

        let root_answer = self.query(IANA_WHOIS_SERVER, tld).await?;
        match referral_target(&root_answer) {
            Some(server) => {
                let mut servers = self.tld_servers.write().await;
                servers.insert(tld.to_string(), server.clone());
                Ok(server)
            }
            None => Err(GatewayError::NoWhoisServer(tld.to_string())),
        }
    }

    /// One raw whois exchange with a bounded timeout and response size.
    /// Servers default to port 43; a referral may carry an explicit port.
    async fn query(&self, server: &str, query: &str) -> Result<String, GatewayError> {
        let query_timeout = Duration::from_secs(self.config.whois_timeout_seconds);

        let (host, port) = split_server_port(server);
        let mut stream = timeout(query_timeout, TcpStream::connect((host, port))).await??;

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY: {}", e);
        }

        let query_line = format!("{}\r\n", format_query(server, query));
        stream.write_all(query_line.as_bytes()).await?;

        let mut response = Vec::new();
        let mut buffer = [0u8; 4096];

        loop {
            match timeout(query_timeout, stream.read(&mut buffer)).await? {
                Ok(0) => break,
                Ok(n) => {
                    response.extend_from_slice(&buffer[..n]);
                    if response.len() > self.config.max_response_size {
                        return Err(GatewayError::ResponseTooLarge);
                    }
                }
                Err(e) => return Err(GatewayError::IoError(e)),
            }
        }

        String::from_utf8(response).map_err(|_| GatewayError::InvalidUtf8)
    }
}

fn is_loopback(target: &str) -> bool {
    matches!(target, "127.0.0.1" | "::1" | "localhost")
}

/// ARIN needs a flag to return the full record; every other server takes
/// the bare query.
fn format_query(server: &str, query: &str) -> String {
    if server.contains("arin.net") {
        format!("n + {}", query)
    } else {
        query.to_string()
    }
}

/// Find the next server in a referral chain. Covers the IANA `refer:` and
/// `whois:` forms, registry `Registrar WHOIS Server:` lines, and the RIR
/// `ReferralServer: whois://host` form.
fn referral_target(data: &str) -> Option<String> {
    for line in data.lines() {
        let line = line.trim();
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim().to_lowercase();
            let value = value.trim();
            if value.is_empty() {
                continue;
            }

            let is_referral_key = key == "refer"
                || key == "whois"
                || key.contains("referral")
                || (key.contains("whois") && key.contains("server"));

            if is_referral_key {
                return Some(clean_server_name(value));
            }
        }
    }
    None
}

/// Strip the scheme from a referral value like `whois://host:4321`.
/// An explicit port is kept and honored when the hop is queried.
fn clean_server_name(value: &str) -> String {
    value
        .strip_prefix("whois://")
        .or_else(|| value.strip_prefix("rwhois://"))
        .unwrap_or(value)
        .to_string()
}

fn split_server_port(server: &str) -> (&str, u16) {
    match server.rsplit_once(':') {
        Some((host, port)) if !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()) => {
            (host, port.parse().unwrap_or(WHOIS_PORT))
        }
        _ => (server, WHOIS_PORT),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Arc<Config> {
        Arc::new(Config::load().unwrap())
    }

    #[tokio::test]
    async fn loopback_literals_short_circuit_to_sentinel() {
        let aggregator = WhoisAggregator::new(test_config());

        for target in ["127.0.0.1", "::1", "localhost"] {
            let record = aggregator.lookup_ip(target).await.unwrap();
            assert!(record.fields.is_empty());
            assert_eq!(
                record.raw,
                "This is a localhost address. No WHOIS data exists for local interfaces."
            );
        }
    }

    #[test]
    fn referral_target_reads_iana_refer_lines() {
        let data = "% IANA WHOIS server\nrefer: whois.verisign-grs.com\ndomain: COM\n";
        assert_eq!(
            referral_target(data),
            Some("whois.verisign-grs.com".to_string())
        );
    }

    #[test]
    fn referral_target_reads_registrar_whois_server_lines() {
        let data = "Domain Name: EXAMPLE.COM\nRegistrar WHOIS Server: whois.example-registrar.com\n";
        assert_eq!(
            referral_target(data),
            Some("whois.example-registrar.com".to_string())
        );
    }

    #[test]
    fn referral_target_strips_scheme_and_keeps_explicit_port() {
        let data = "ReferralServer: whois://whois.ripe.net:43\n";
        assert_eq!(referral_target(data), Some("whois.ripe.net:43".to_string()));
    }

    #[test]
    fn server_port_defaults_to_43() {
        assert_eq!(split_server_port("whois.iana.org"), ("whois.iana.org", 43));
        assert_eq!(split_server_port("whois.ripe.net:4321"), ("whois.ripe.net", 4321));
        // Not a port suffix, leave the name intact
        assert_eq!(split_server_port("whois.example:abc"), ("whois.example:abc", 43));
    }

    #[test]
    fn no_referral_in_terminal_answer() {
        let data = "NetRange: 8.8.8.0 - 8.8.8.255\nOrgName: Google LLC\n";
        assert_eq!(referral_target(data), None);
    }

    #[test]
    fn arin_queries_request_the_full_record() {
        assert_eq!(format_query("whois.arin.net", "8.8.8.8"), "n + 8.8.8.8");
        assert_eq!(format_query("whois.iana.org", "8.8.8.8"), "8.8.8.8");
    }

    /// Minimal whois server: reads the query line, writes a canned
    /// answer, closes the connection.
    async fn spawn_whois_stub(response: String) -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let response = response.clone();
                tokio::spawn(async move {
                    let mut buffer = [0u8; 256];
                    let _ = stream.read(&mut buffer).await;
                    let _ = stream.write_all(response.as_bytes()).await;
                });
            }
        });

        addr
    }

    #[tokio::test]
    async fn referral_chain_collapses_at_three_servers_total() {
        // sub-sub-registrar exists but must never be reached
        let third = spawn_whois_stub("level: sub-sub-registrar\n".to_string()).await;
        let second =
            spawn_whois_stub(format!("level: sub-registrar\nrefer: {}\n", third)).await;
        let first =
            spawn_whois_stub(format!("level: registrar\nrefer: {}\n", second)).await;

        let aggregator = WhoisAggregator::new(test_config());
        assert_eq!(aggregator.config.max_referrals, 3);

        // The registry's own answer is already a segment when the chain starts
        let mut segments = vec!["level: registry\n".to_string()];
        aggregator
            .follow_referrals(first.to_string(), "example.com", &mut segments)
            .await;

        assert_eq!(segments.len(), 3);
        assert!(segments[1].contains("level: registrar"));
        assert!(segments[2].contains("level: sub-registrar"));
    }

    #[test]
    fn tld_extraction_falls_back_to_last_label() {
        let aggregator = WhoisAggregator::new(test_config());
        assert_eq!(aggregator.extract_tld("example.com").unwrap(), "com");
        assert_eq!(aggregator.extract_tld("intranet").unwrap(), "intranet");
    }
}
