//! Network availability check.

use std::{
    fmt::Debug,
    fs,
    path::{Path, PathBuf},
};

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Wifi,
    Cellular,
    Ethernet,
    Other,
}

/// Platform network-status service.
pub trait NetworkStatus: Send + Sync + Debug {
    /// Transports of the currently active links, or `None` if the status service is unavailable.
    fn active_transports(&self) -> Option<Vec<Transport>>;
}

/// True iff a WiFi, cellular or ethernet transport is active.
pub fn is_network_available(status: &dyn NetworkStatus) -> bool {
    let Some(transports) = status.active_transports() else {
        debug!("Network status service unavailable");
        return false;
    };

    transports
        .iter()
        .any(|t| matches!(t, Transport::Wifi | Transport::Cellular | Transport::Ethernet))
}

/// Reads link state from Linux sysfs (`/sys/class/net`).
#[derive(Debug, Clone)]
pub struct SysfsNetworkStatus {
    root: PathBuf,
}

impl Default for SysfsNetworkStatus {
    fn default() -> Self {
        Self::new("/sys/class/net")
    }
}

impl SysfsNetworkStatus {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn classify(dir: &Path, name: &str) -> Transport {
        if dir.join("wireless").exists() || dir.join("phy80211").exists() {
            return Transport::Wifi;
        }
        if ["wwan", "rmnet", "ppp"].iter().any(|p| name.starts_with(p)) {
            return Transport::Cellular;
        }
        // ARPHRD_ETHER
        match read_trimmed(&dir.join("type")).as_deref() {
            Some("1") => Transport::Ethernet,
            _ => Transport::Other,
        }
    }
}

impl NetworkStatus for SysfsNetworkStatus {
    fn active_transports(&self) -> Option<Vec<Transport>> {
        let entries = fs::read_dir(&self.root).ok()?;

        let transports = entries
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                if name == "lo" {
                    return None;
                }
                let dir = entry.path();
                if read_trimmed(&dir.join("operstate")).as_deref() != Some("up") {
                    return None;
                }
                let transport = Self::classify(&dir, &name);
                debug!(interface = %name, ?transport, "Active network interface");
                Some(transport)
            })
            .collect();

        Some(transports)
    }
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}
