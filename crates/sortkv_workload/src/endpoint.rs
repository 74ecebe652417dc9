/// A lookup server target plus the label its metrics are reported under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub name: String,
    pub addr: String,
}

impl Endpoint {
    /// Parse `host:port` or `name=host:port`. A leading `http://` is
    /// dropped. Without an explicit name the label is the address with `.`,
    /// `:` and `/` replaced by `_`.
    pub fn parse(spec: &str) -> anyhow::Result<Self> {
        let spec = spec.trim();
        let (name, addr) = match spec.split_once('=') {
            Some((name, addr)) => (name.trim().to_string(), strip_scheme(addr.trim())),
            None => {
                let addr = strip_scheme(spec);
                (default_label(&addr), addr)
            }
        };
        anyhow::ensure!(!addr.is_empty(), "empty server address in {spec:?}");
        anyhow::ensure!(!name.is_empty(), "empty server label in {spec:?}");
        Ok(Self { name, addr })
    }
}

fn strip_scheme(addr: &str) -> String {
    addr.strip_prefix("http://").unwrap_or(addr).to_string()
}

fn default_label(addr: &str) -> String {
    addr.replace(['.', ':', '/'], "_")
}

/// Latency series prefixes for the primary and (optional) shadow targets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetricNames {
    pub primary: String,
    pub shadow: Option<String>,
}

impl MetricNames {
    /// `rtt` alone when there is no shadow; otherwise each target reports
    /// under `rtt.<label>` so the two series can be told apart.
    pub fn new(primary: &Endpoint, shadow: Option<&Endpoint>) -> Self {
        match shadow {
            None => Self {
                primary: "rtt".to_string(),
                shadow: None,
            },
            Some(shadow) => Self {
                primary: format!("rtt.{}", primary.name),
                shadow: Some(format!("rtt.{}", shadow.name)),
            },
        }
    }
}
