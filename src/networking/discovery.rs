//! Server discovery over the local network.
//!
//! Locates the classroom server by TCP-probing candidate hosts on the
//! service port. Preferred hosts and the default gateway are tried first,
//! then every local /24 subnet is swept with bounded parallelism.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::watch;

use crate::networking::DEFAULT_SERVER_PORT;
use crate::state::StateCell;

/// Candidates probed between progress updates during the subnet sweep.
const SWEEP_LOG_INTERVAL: usize = 32;

/// Tuning knobs for a network scan.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Port the server is expected to listen on.
    pub port: u16,
    /// How long a single connect attempt may take before it counts as closed.
    pub probe_timeout: Duration,
    /// Upper bound on concurrent probes during the subnet sweep.
    pub max_parallel_probes: usize,
    /// Hosts to try before the gateway and the sweep.
    pub preferred_hosts: Vec<Ipv4Addr>,
    /// Addresses treated as the device's own when deriving sweep subnets;
    /// `None` asks the platform network stack.
    pub local_addresses: Option<Vec<Ipv4Addr>>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_SERVER_PORT,
            probe_timeout: Duration::from_millis(400),
            max_parallel_probes: 32,
            preferred_hosts: Vec::new(),
            local_addresses: None,
        }
    }
}

/// Progress of a network scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanStatus {
    /// No scan has been started yet.
    Idle,

    /// A scan is running.
    Scanning,

    /// A server answered at this address.
    Found(Ipv4Addr),

    /// Every candidate was probed without an answer.
    NotFound,

    /// The scan could not run at all.
    Failed(String),
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanStatus::Idle => write!(f, "Idle"),
            ScanStatus::Scanning => write!(f, "Scanning"),
            ScanStatus::Found(addr) => write!(f, "Found server at {}", addr),
            ScanStatus::NotFound => write!(f, "No server found"),
            ScanStatus::Failed(detail) => write!(f, "Scan failed: {}", detail),
        }
    }
}

/// Probes the local network for a running classroom server.
pub struct ServerScanner {
    config: ScanConfig,
    status: StateCell<ScanStatus>,
    log: StateCell<String>,
}

impl ServerScanner {
    /// Creates a scanner with the given configuration.
    pub fn new(config: ScanConfig) -> Self {
        Self {
            config,
            status: StateCell::new(ScanStatus::Idle),
            log: StateCell::new(String::new()),
        }
    }

    /// Current scan status.
    pub fn status(&self) -> ScanStatus {
        self.status.get()
    }

    /// Subscribes to status changes, starting from the current value.
    pub fn subscribe_status(&self) -> watch::Receiver<ScanStatus> {
        self.status.subscribe()
    }

    /// Most recent progress line.
    pub fn last_log(&self) -> String {
        self.log.get()
    }

    /// Subscribes to progress lines, starting from the current one.
    pub fn subscribe_log(&self) -> watch::Receiver<String> {
        self.log.subscribe()
    }

    /// Runs a full scan and returns the first address that answered.
    ///
    /// Preferred hosts and the default gateway are probed one at a time in
    /// order. If none answers, every local /24 subnet is swept with up to
    /// `max_parallel_probes` connects in flight and the first open port wins.
    pub async fn discover(&self) -> Result<Ipv4Addr, ScanError> {
        self.status.set(ScanStatus::Scanning);
        self.progress(format!(
            "Scanning the local network on port {}...",
            self.config.port
        ));

        let local = self
            .config
            .local_addresses
            .clone()
            .unwrap_or_else(local_ipv4_addresses);
        let gateway = default_gateway();
        let front = front_candidates(&self.config.preferred_hosts, gateway);
        let sweep = sweep_candidates(&local, &front);

        if front.is_empty() && sweep.is_empty() {
            tracing::warn!("Network scan aborted: no usable interface");
            self.progress("No usable network interface found".to_string());
            self.status
                .set(ScanStatus::Failed("no usable network interface".to_string()));
            return Err(ScanError::NoInterfaces);
        }

        let mut probed = 0usize;

        for addr in front {
            probed += 1;
            self.progress(format!("Probing {}:{}...", addr, self.config.port));
            if probe(addr, self.config.port, self.config.probe_timeout).await {
                return Ok(self.report_found(addr));
            }
        }

        let port = self.config.port;
        let timeout = self.config.probe_timeout;
        let mut probes = stream::iter(sweep)
            .map(|addr| async move { (addr, probe(addr, port, timeout).await) })
            .buffer_unordered(self.config.max_parallel_probes.max(1));

        while let Some((addr, open)) = probes.next().await {
            probed += 1;
            if open {
                return Ok(self.report_found(addr));
            }
            if probed % SWEEP_LOG_INTERVAL == 0 {
                self.progress(format!("Probed {} hosts...", probed));
            }
        }

        tracing::info!("Network scan finished without a match ({} hosts probed)", probed);
        self.progress(format!("No server found after probing {} hosts", probed));
        self.status.set(ScanStatus::NotFound);
        Err(ScanError::NotFound { probed })
    }

    fn report_found(&self, addr: Ipv4Addr) -> Ipv4Addr {
        tracing::info!("Found server at {}:{}", addr, self.config.port);
        self.progress(format!("Found server at {}:{}", addr, self.config.port));
        self.status.set(ScanStatus::Found(addr));
        addr
    }

    fn progress(&self, line: String) {
        tracing::debug!("{}", line);
        self.log.set(line);
    }
}

/// Attempts a TCP connect and reports whether the port was open.
async fn probe(addr: Ipv4Addr, port: u16, timeout: Duration) -> bool {
    let target = SocketAddr::from((addr, port));
    match tokio::time::timeout(timeout, TcpStream::connect(target)).await {
        Ok(Ok(_)) => true,
        Ok(Err(_)) | Err(_) => false,
    }
}

/// IPv4 addresses assigned to this device, loopback and link-local excluded.
fn local_ipv4_addresses() -> Vec<Ipv4Addr> {
    default_net::get_interfaces()
        .into_iter()
        .flat_map(|iface| iface.ipv4.into_iter().map(|net| net.addr))
        .filter(|addr| !addr.is_loopback() && !addr.is_link_local() && !addr.is_unspecified())
        .collect()
}

/// Default gateway address, if the platform reports an IPv4 one.
fn default_gateway() -> Option<Ipv4Addr> {
    match default_net::get_default_gateway() {
        Ok(gateway) => match gateway.ip_addr {
            IpAddr::V4(addr) => Some(addr),
            IpAddr::V6(_) => None,
        },
        Err(e) => {
            tracing::debug!("No default gateway: {}", e);
            None
        }
    }
}

/// Preferred hosts followed by the gateway, first occurrence wins.
fn front_candidates(preferred: &[Ipv4Addr], gateway: Option<Ipv4Addr>) -> Vec<Ipv4Addr> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for addr in preferred.iter().copied().chain(gateway) {
        if seen.insert(addr) {
            out.push(addr);
        }
    }
    out
}

/// Every /24 host address around the local interfaces, skipping the device's
/// own addresses and anything already probed up front.
fn sweep_candidates(local: &[Ipv4Addr], skip: &[Ipv4Addr]) -> Vec<Ipv4Addr> {
    let mut seen: HashSet<Ipv4Addr> = skip.iter().copied().collect();
    seen.extend(local.iter().copied());

    let mut subnets = Vec::new();
    let mut subnet_seen = HashSet::new();
    for addr in local {
        let [a, b, c, _] = addr.octets();
        if subnet_seen.insert((a, b, c)) {
            subnets.push((a, b, c));
        }
    }

    let mut out = Vec::new();
    for (a, b, c) in subnets {
        for host in 1..=254u8 {
            let candidate = Ipv4Addr::new(a, b, c, host);
            if seen.insert(candidate) {
                out.push(candidate);
            }
        }
    }
    out
}

/// Errors a scan can end with.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// No candidate hosts could be derived from the local interfaces.
    #[error("No usable network interface found")]
    NoInterfaces,

    /// Every candidate host was probed without finding an open port.
    #[error("No server found after probing {probed} hosts")]
    NotFound { probed: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn addr(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    #[test]
    fn test_front_candidates_order_and_dedup() {
        let preferred = vec![addr("192.168.1.50"), addr("192.168.1.1")];
        let out = front_candidates(&preferred, Some(addr("192.168.1.1")));

        assert_eq!(out, vec![addr("192.168.1.50"), addr("192.168.1.1")]);
    }

    #[test]
    fn test_front_candidates_without_gateway() {
        let out = front_candidates(&[], None);
        assert!(out.is_empty());
    }

    #[test]
    fn test_sweep_covers_subnet_and_skips_own_address() {
        let local = vec![addr("192.168.1.17")];
        let out = sweep_candidates(&local, &[addr("192.168.1.1")]);

        assert_eq!(out.len(), 252);
        assert!(!out.contains(&addr("192.168.1.17")));
        assert!(!out.contains(&addr("192.168.1.1")));
        assert!(out.contains(&addr("192.168.1.2")));
        assert!(out.contains(&addr("192.168.1.254")));
        assert!(!out.contains(&addr("192.168.1.0")));
        assert!(!out.contains(&addr("192.168.1.255")));
    }

    #[test]
    fn test_sweep_merges_interfaces_on_same_subnet() {
        let local = vec![addr("10.0.0.5"), addr("10.0.0.9")];
        let out = sweep_candidates(&local, &[]);

        assert_eq!(out.len(), 252);
    }

    #[tokio::test]
    async fn test_probe_detects_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        assert!(probe(addr("127.0.0.1"), port, Duration::from_millis(400)).await);
    }

    #[tokio::test]
    async fn test_probe_rejects_closed_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        assert!(!probe(addr("127.0.0.1"), port, Duration::from_millis(400)).await);
    }

    #[tokio::test]
    async fn test_discover_finds_preferred_host() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let scanner = ServerScanner::new(ScanConfig {
            port,
            preferred_hosts: vec![addr("127.0.0.1")],
            ..ScanConfig::default()
        });

        let found = scanner.discover().await.unwrap();
        assert_eq!(found, addr("127.0.0.1"));
        assert_eq!(scanner.status(), ScanStatus::Found(addr("127.0.0.1")));
        assert!(scanner.last_log().contains("Found server"));
    }
}
