// src/forwarder/rules.rs

//! Parses the whitespace-delimited `rinetd`-style rule file.

use crate::core::PpdbError;
use std::net::SocketAddr;

const MAX_RULES: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardRule {
    pub src_addr: String,
    pub src_port: u16,
    pub dst_addr: String,
    pub dst_port: u16,
}

impl ForwardRule {
    /// Resolves `src_addr` the same way `dst_addr` already resolves on
    /// connect: both sides of a rule may be a dotted-quad or a hostname.
    pub async fn src_socket_addr(&self) -> Result<SocketAddr, PpdbError> {
        tokio::net::lookup_host((self.src_addr.as_str(), self.src_port))
            .await?
            .next()
            .ok_or_else(|| {
                PpdbError::InvalidConfig(format!("could not resolve source address in rule: {self:?}"))
            })
    }
}

fn parse_port(token: &str) -> Result<u16, PpdbError> {
    let port: u32 = token
        .parse()
        .map_err(|_| PpdbError::InvalidConfig(format!("not a valid port: {token}")))?;
    if port == 0 || port > u16::MAX as u32 {
        return Err(PpdbError::InvalidConfig(format!(
            "port out of range 1..=65535: {port}"
        )));
    }
    Ok(port as u16)
}

/// Parses a rules file's contents. `#`-prefixed and blank lines are
/// skipped; each remaining line must be `src_addr src_port dst_addr
/// dst_port`.
pub fn parse_rules(contents: &str) -> Result<Vec<ForwardRule>, PpdbError> {
    let mut rules = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let [src_addr, src_port, dst_addr, dst_port] = tokens.as_slice() else {
            return Err(PpdbError::InvalidConfig(format!(
                "malformed rule line: {line}"
            )));
        };
        rules.push(ForwardRule {
            src_addr: src_addr.to_string(),
            src_port: parse_port(src_port)?,
            dst_addr: dst_addr.to_string(),
            dst_port: parse_port(dst_port)?,
        });
        if rules.len() > MAX_RULES {
            return Err(PpdbError::InvalidConfig(format!(
                "more than {MAX_RULES} forwarding rules configured"
            )));
        }
    }
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rules_skipping_comments_and_blanks() {
        let contents = "# comment\n\n127.0.0.1 20001 127.0.0.1 20002\n";
        let rules = parse_rules(contents).unwrap();
        assert_eq!(
            rules,
            vec![ForwardRule {
                src_addr: "127.0.0.1".to_string(),
                src_port: 20001,
                dst_addr: "127.0.0.1".to_string(),
                dst_port: 20002,
            }]
        );
    }

    #[test]
    fn rejects_malformed_line() {
        assert!(parse_rules("127.0.0.1 20001 127.0.0.1\n").is_err());
    }

    #[test]
    fn rejects_out_of_range_port() {
        assert!(parse_rules("127.0.0.1 0 127.0.0.1 20002\n").is_err());
        assert!(parse_rules("127.0.0.1 70000 127.0.0.1 20002\n").is_err());
    }

    #[test]
    fn rejects_more_than_max_rules() {
        let mut contents = String::new();
        for port in 20000..20130u32 {
            contents.push_str(&format!("127.0.0.1 {port} 127.0.0.1 30000\n"));
        }
        assert!(parse_rules(&contents).is_err());
    }
}
