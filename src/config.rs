//! Relay configuration file and reverse aliases

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use log::{debug, info, warn};

use crate::error::Error;
use crate::message::address::DEFAULT_UID_CEILING;
use crate::stream::Timeouts;

/// Configuration file read when `-C` is not given
pub const DEFAULT_CONFIG_FILE: &str = "/etc/sendmail-relay/sendmail-relay.conf";
/// Reverse aliases, looked up beside the configuration file
pub const REVALIASES_FILE_NAME: &str = "revaliases";
/// Client certificate used when `UseTLSCert` is on and `TLSCert` is unset
pub const DEFAULT_TLS_CERT: &str = "/etc/ssl/certs/sendmail-relay.pem";
/// Standard SMTP port
pub const SMTP_PORT: u16 = 25;

/// Everything the configuration file can set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Recipient for mail to system accounts
    pub root: Option<String>,
    pub mailhub: String,
    pub port: u16,
    /// Name announced in HELO/EHLO and used for unqualified addresses
    pub hostname: Option<String>,
    pub rewrite_domain: Option<String>,
    pub from_line_override: bool,
    pub use_tls: bool,
    pub use_starttls: bool,
    pub use_tls_cert: bool,
    pub tls_cert: PathBuf,
    pub tls_verify: bool,
    pub auth_user: Option<String>,
    pub auth_pass: Option<String>,
    pub auth_method: Option<String>,
    pub timeouts: Timeouts,
    pub uid_ceiling: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            root: None,
            mailhub: "mailhub".to_string(),
            port: SMTP_PORT,
            hostname: None,
            rewrite_domain: None,
            from_line_override: false,
            use_tls: false,
            use_starttls: false,
            use_tls_cert: false,
            tls_cert: PathBuf::from(DEFAULT_TLS_CERT),
            tls_verify: true,
            auth_user: None,
            auth_pass: None,
            auth_method: None,
            timeouts: Timeouts::default(),
            uid_ceiling: DEFAULT_UID_CEILING,
        }
    }
}

fn yes(value: &str) -> bool {
    value.eq_ignore_ascii_case("yes")
}

fn number<T: FromStr>(key: &str, value: &str) -> Option<T> {
    match value.parse() {
        Ok(n) => Some(n),
        Err(_) => {
            warn!("{}: {:?} is not a number", key, value);
            None
        }
    }
}

/// Splits `host[:port]`
pub fn split_host_port(value: &str) -> (String, Option<u16>) {
    match value.rsplit_once(':') {
        Some((host, port)) => (host.to_string(), number("port", port)),
        None => (value.to_string(), None),
    }
}

impl Settings {
    /// Applies every `key = value` line of `text` on top of the defaults
    pub fn parse(text: &str) -> Settings {
        let mut settings = Settings::default();
        for line in text.lines() {
            let line = line.split('#').next().unwrap_or("");
            if let Some((key, value)) = line.split_once('=') {
                settings.apply(key.trim(), value.trim());
            }
        }
        settings
    }

    /// Reads the configuration file; a missing file leaves the defaults.
    pub async fn load(path: &Path) -> Result<Settings, Error> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Ok(Settings::parse(&text)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("{} not found", path.display());
                Ok(Settings::default())
            }
            Err(e) => Err(Error::Config(format!("{}: {}", path.display(), e))),
        }
    }

    /// Sets one key, case-insensitively
    pub fn apply(&mut self, key: &str, value: &str) {
        if value.is_empty() {
            debug!("ignoring {} without value", key);
            return;
        }
        match key.to_ascii_lowercase().as_str() {
            "root" => self.root = Some(value.to_string()),
            "mailhub" => {
                let (host, port) = split_host_port(value);
                self.mailhub = host;
                if let Some(port) = port {
                    self.port = port;
                }
            }
            "remoteport" => {
                if let Some(port) = number(key, value) {
                    self.port = port;
                }
            }
            "hostname" => self.hostname = Some(value.to_string()),
            "rewritedomain" => {
                let domain = match value.rfind('@') {
                    Some(at) => {
                        let domain = &value[at + 1..];
                        warn!("RewriteDomain={:?} is invalid, using {:?}", value, domain);
                        domain
                    }
                    None => value,
                };
                self.rewrite_domain = Some(domain.to_string());
            }
            "fromlineoverride" => self.from_line_override = yes(value),
            "usetls" => {
                self.use_tls = yes(value);
                if !self.use_tls {
                    self.use_starttls = false;
                }
            }
            "usestarttls" => {
                self.use_starttls = yes(value);
                if self.use_starttls {
                    self.use_tls = true;
                }
            }
            "usetlscert" => self.use_tls_cert = yes(value),
            "tlscert" => self.tls_cert = PathBuf::from(value),
            "tlsverify" => self.tls_verify = !value.eq_ignore_ascii_case("no"),
            "authuser" => self.auth_user = Some(value.to_string()),
            "authpass" => self.auth_pass = Some(value.to_string()),
            "authmethod" => self.auth_method = Some(value.to_string()),
            "connecttimeout" => {
                if let Some(ms) = number(key, value) {
                    self.timeouts.connect = Duration::from_millis(ms);
                }
            }
            "readtimeout" => {
                if let Some(ms) = number(key, value) {
                    self.timeouts.read = Duration::from_millis(ms);
                }
            }
            "writetimeout" => {
                if let Some(ms) = number(key, value) {
                    self.timeouts.write = Duration::from_millis(ms);
                }
            }
            "maxwait" => {
                if let Some(s) = number(key, value) {
                    self.timeouts.session = Duration::from_secs(s);
                }
            }
            "medwait" => {
                if let Some(s) = number(key, value) {
                    self.timeouts.exchange = Duration::from_secs(s);
                }
            }
            _ => {
                info!("unable to set {}={:?}", key, value);
                return;
            }
        }
        if key.eq_ignore_ascii_case("authpass") {
            debug!("set {}", key);
        } else {
            debug!("set {}={:?}", key, value);
        }
    }
}

/// Entry of the reverse aliases file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReverseAlias {
    /// Sender address for the account
    pub address: String,
    /// Mailhub to use instead of the configured one
    pub mailhub: Option<String>,
    pub port: Option<u16>,
}

impl ReverseAlias {
    /// Finds the entry for `account`; the last one wins.
    ///
    /// Lines read `account:address[:mailhub[:port]]`.
    pub fn find(text: &str, account: &str) -> Option<ReverseAlias> {
        text.lines()
            .filter_map(|line| {
                let line = line.split('#').next().unwrap_or("");
                let mut fields = line.split(':').map(str::trim);
                if fields.next()? != account {
                    return None;
                }
                let address = fields.next().filter(|a| !a.is_empty())?;
                let mailhub = fields.next().filter(|h| !h.is_empty());
                let port = fields.next().and_then(|p| number("port", p));
                Some(ReverseAlias {
                    address: address.to_string(),
                    mailhub: mailhub.map(str::to_string),
                    port,
                })
            })
            .last()
    }

    /// Reads the file beside `config` and looks `account` up
    pub async fn load(config: &Path, account: &str) -> Option<ReverseAlias> {
        let path = config
            .parent()
            .unwrap_or_else(|| Path::new("/"))
            .join(REVALIASES_FILE_NAME);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => ReverseAlias::find(&text, account),
            Err(e) => {
                debug!("{}: {}", path.display(), e);
                None
            }
        }
    }
}
