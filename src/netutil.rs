use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::process::ProcessRunner;

pub const PROC_NET_ROUTE: &str = "/proc/net/route";

/// Destination column value of the default route in the kernel routing table.
const DEFAULT_DESTINATION: &str = "00000000";

/// Finds the host's default outbound device for NAT masquerading.
#[derive(Clone)]
pub struct InterfaceDetector {
    runner: Arc<dyn ProcessRunner>,
    route_table: PathBuf,
}

impl InterfaceDetector {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            runner,
            route_table: PathBuf::from(PROC_NET_ROUTE),
        }
    }

    pub fn with_route_table(mut self, path: impl Into<PathBuf>) -> Self {
        self.route_table = path.into();
        self
    }

    /// Asks `ip route show default` first. The routing table is only scanned
    /// when that invocation itself fails; a successful query that names no
    /// device is reported as [`Error::NotFound`].
    pub async fn detect(&self) -> Result<String> {
        let reason = match self
            .runner
            .run("ip", &["route", "show", "default"], None)
            .await
        {
            Ok(output) if output.success => {
                return parse_dev_from_route(&output.stdout).ok_or_else(|| {
                    Error::NotFound("default route device not found".to_string())
                });
            }
            Ok(output) => format!("ip route exited with {}", output.describe_exit()),
            Err(err) => err.to_string(),
        };
        tracing::debug!(%reason, table = ?self.route_table, "falling back to kernel routing table");

        let text = fs::read_to_string(&self.route_table).map_err(|source| Error::Io {
            path: self.route_table.clone(),
            source,
        })?;
        parse_route_table(&text).ok_or_else(|| {
            Error::NotFound(format!(
                "no default route in {} ({reason})",
                self.route_table.display()
            ))
        })
    }
}

/// Device token following `dev` in `ip route` output.
pub fn parse_dev_from_route(text: &str) -> Option<String> {
    for line in text.lines() {
        let mut iter = line.split_whitespace();
        while let Some(token) = iter.next() {
            if token == "dev"
                && let Some(dev) = iter.next()
            {
                return Some(dev.to_string());
            }
        }
    }
    None
}

/// First interface whose destination is the default sentinel, skipping the header.
pub fn parse_route_table(text: &str) -> Option<String> {
    text.lines().skip(1).find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            [iface, destination, ..] if *destination == DEFAULT_DESTINATION => {
                Some(iface.to_string())
            }
            _ => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::Output;
    use crate::process::testing::{FakeRunner, Reply};
    use std::io::Write;

    const ROUTE_TABLE: &str = "\
Iface\tDestination\tGateway \tFlags\tRefCnt\tUse\tMetric\tMask\t\tMTU\tWindow\tIRTT
ens3\t0071A8C0\t00000000\t0001\t0\t0\t0\t00FFFFFF\t0\t0\t0
ens4\t00000000\t0100A8C0\t0003\t0\t0\t100\t00000000\t0\t0\t0
";

    fn table_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn parses_dev_token_from_default_route() {
        let line = "default via 10.0.0.1 dev eth0 proto dhcp src 10.0.0.5";
        assert_eq!(parse_dev_from_route(line).as_deref(), Some("eth0"));
        assert_eq!(parse_dev_from_route("default via 10.0.0.1"), None);
        assert_eq!(parse_dev_from_route("default dev"), None);
    }

    #[test]
    fn parses_default_entry_from_route_table() {
        assert_eq!(parse_route_table(ROUTE_TABLE).as_deref(), Some("ens4"));
        assert_eq!(parse_route_table(""), None);
        assert_eq!(parse_route_table("Iface\tDestination\n"), None);
    }

    #[tokio::test]
    async fn primary_strategy_wins() {
        let runner = Arc::new(FakeRunner::new());
        runner.on(
            "ip route show default",
            Reply::Output(Output::ok(
                "default via 10.0.0.1 dev eth0 proto dhcp src 10.0.0.5 metric 100\n",
            )),
        );
        let detector = InterfaceDetector::new(runner).with_route_table("/nonexistent/route");
        assert_eq!(detector.detect().await.unwrap(), "eth0");
    }

    #[tokio::test]
    async fn no_default_route_does_not_fall_back() {
        let runner = Arc::new(FakeRunner::new());
        runner.on("ip route show default", Reply::Output(Output::ok("")));
        let table = table_file(ROUTE_TABLE);
        let detector = InterfaceDetector::new(runner).with_route_table(table.path());
        assert!(matches!(detector.detect().await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn failed_invocation_falls_back_to_route_table() {
        let table = table_file(ROUTE_TABLE);

        let missing_ip = Arc::new(FakeRunner::new());
        let detector = InterfaceDetector::new(missing_ip).with_route_table(table.path());
        assert_eq!(detector.detect().await.unwrap(), "ens4");

        let failing_ip = Arc::new(FakeRunner::new());
        failing_ip.on(
            "ip route show default",
            Reply::Output(Output::failed(2, "RTNETLINK answers: Operation not permitted")),
        );
        let detector = InterfaceDetector::new(failing_ip).with_route_table(table.path());
        assert_eq!(detector.detect().await.unwrap(), "ens4");
    }

    #[tokio::test]
    async fn unreadable_route_table_is_io_error() {
        let runner = Arc::new(FakeRunner::new());
        let detector = InterfaceDetector::new(runner).with_route_table("/nonexistent/route");
        assert!(matches!(detector.detect().await, Err(Error::Io { .. })));
    }

    #[tokio::test]
    async fn route_table_without_default_is_not_found() {
        let runner = Arc::new(FakeRunner::new());
        let table = table_file("Iface\tDestination\nens3\t0071A8C0\n");
        let detector = InterfaceDetector::new(runner).with_route_table(table.path());
        assert!(matches!(detector.detect().await, Err(Error::NotFound(_))));
    }
}
