//! RFC822 address tokens and local address rewriting

use crate::accounts::AccountDirectory;

/// Highest UID still counted as a system account
pub const DEFAULT_UID_CEILING: u32 = 999;

/// Extracts the bare address from one RFC822 address token.
///
/// `Name <a@b.c>` gives what sits between the brackets. Otherwise one leading
/// and one trailing parenthesized comment are dropped along with the
/// surrounding whitespace.
pub fn parse_address_token(text: &str) -> String {
    if let Some(open) = text.find('<') {
        let inner = &text[open + 1..];
        let end = inner.find('>').unwrap_or_else(|| inner.len());
        return inner[..end].to_string();
    }

    let mut address = text.trim_start();
    if address.starts_with('(') {
        address = address
            .find(')')
            .map_or("", |close| &address[close + 1..])
            .trim_start();
    }

    address = address.trim_end();
    if address.ends_with(')') {
        if let Some(open) = address.rfind('(') {
            address = &address[..open];
        }
    }
    address.trim_end().to_string()
}

/// Splits an address list on commas outside double quotes.
///
/// Group terminators (tokens ending in `;`) and empty tokens are dropped.
pub fn split_address_list(text: &str) -> Vec<String> {
    let text: String = text
        .chars()
        .map(|c| match c {
            '\t' | '\r' | '\n' => ' ',
            c => c,
        })
        .collect();

    let mut tokens = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                tokens.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    tokens.push(&text[start..]);

    tokens
        .into_iter()
        .filter(|token| !token.trim_end().ends_with(';'))
        .map(parse_address_token)
        .filter(|address| !address.is_empty())
        .collect()
}

/// Completes and remaps addresses relative to this host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewriter {
    hostname: String,
    rewrite_domain: Option<String>,
    root: Option<String>,
    uid_ceiling: u32,
}

impl Rewriter {
    pub fn new(hostname: String) -> Rewriter {
        Rewriter {
            hostname,
            rewrite_domain: None,
            root: None,
            uid_ceiling: DEFAULT_UID_CEILING,
        }
    }

    /// Domain used instead of the hostname for unqualified addresses
    pub fn rewrite_domain(self, domain: Option<String>) -> Rewriter {
        Rewriter {
            rewrite_domain: domain.filter(|d| !d.is_empty()),
            ..self
        }
    }

    /// Recipient standing in for local system accounts
    pub fn root(self, root: Option<String>) -> Rewriter {
        Rewriter {
            root: root.filter(|r| !r.is_empty()),
            ..self
        }
    }

    pub fn uid_ceiling(self, uid_ceiling: u32) -> Rewriter {
        Rewriter {
            uid_ceiling,
            ..self
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Qualifies an address that has no domain
    pub fn append_domain(&self, address: &str) -> String {
        if address.contains('@') {
            return address.to_string();
        }
        let domain = self.rewrite_domain.as_ref().unwrap_or(&self.hostname);
        format!("{}@{}", address, domain)
    }

    /// Sends mail for system accounts to the root recipient
    pub fn remap_local_user(&self, address: &str, accounts: &dyn AccountDirectory) -> String {
        match self.root {
            Some(ref root)
                if !address.contains('@')
                    && accounts
                        .by_name(address)
                        .map_or(false, |account| account.uid <= self.uid_ceiling) =>
            {
                self.append_domain(root)
            }
            _ => self.append_domain(address),
        }
    }
}
