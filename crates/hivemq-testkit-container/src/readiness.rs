//! Readiness probes
//!
//! A probe is satisfied when every log pattern has matched often enough and every
//! listed container port accepts a TCP connection from the host. Log evaluation is
//! pure over the lines handed in; the controller decides which lines count.

use regex::Regex;
use std::fmt;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::engine::LogLine;

#[derive(Debug, Clone)]
enum Matcher {
    Literal(String),
    Regex(Regex),
}

/// A log line pattern with a required number of occurrences
#[derive(Debug, Clone)]
pub struct LogPattern {
    matcher: Matcher,
    times: usize,
}

impl LogPattern {
    /// Match lines containing `text`
    pub fn literal(text: impl Into<String>) -> Self {
        Self {
            matcher: Matcher::Literal(text.into()),
            times: 1,
        }
    }

    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            matcher: Matcher::Regex(Regex::new(pattern)?),
            times: 1,
        })
    }

    /// Require `times` matching lines (at least one)
    pub fn times(mut self, times: usize) -> Self {
        self.times = times.max(1);
        self
    }

    pub fn as_str(&self) -> &str {
        match &self.matcher {
            Matcher::Literal(text) => text.as_str(),
            Matcher::Regex(regex) => regex.as_str(),
        }
    }

    pub fn matches(&self, line: &str) -> bool {
        match &self.matcher {
            Matcher::Literal(text) => line.contains(text.as_str()),
            Matcher::Regex(regex) => regex.is_match(line),
        }
    }

    pub fn required(&self) -> usize {
        self.times
    }

    pub fn count(&self, lines: &[LogLine]) -> usize {
        lines.iter().filter(|l| self.matches(&l.text)).count()
    }

    pub fn is_satisfied(&self, lines: &[LogLine]) -> bool {
        self.count(lines) >= self.times
    }
}

impl fmt::Display for LogPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.matcher {
            Matcher::Literal(text) => write!(f, "{:?}", text)?,
            Matcher::Regex(regex) => write!(f, "/{}/", regex)?,
        }
        if self.times > 1 {
            write!(f, " x{}", self.times)?;
        }
        Ok(())
    }
}

/// What has to hold before a container counts as ready
#[derive(Debug, Clone, Default)]
pub struct ReadinessProbe {
    log_patterns: Vec<LogPattern>,
    ports: Vec<u16>,
}

impl ReadinessProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(mut self, pattern: LogPattern) -> Self {
        self.log_patterns.push(pattern);
        self
    }

    /// Container port that must accept connections through its host binding
    pub fn port(mut self, port: u16) -> Self {
        if !self.ports.contains(&port) {
            self.ports.push(port);
        }
        self
    }

    /// A probe without checks is satisfied immediately
    pub fn is_empty(&self) -> bool {
        self.log_patterns.is_empty() && self.ports.is_empty()
    }

    pub fn log_patterns(&self) -> &[LogPattern] {
        &self.log_patterns
    }

    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    pub fn logs_satisfied(&self, lines: &[LogLine]) -> bool {
        self.log_patterns.iter().all(|p| p.is_satisfied(lines))
    }

    /// Patterns that have not matched often enough yet
    pub fn pending_patterns<'a>(
        &'a self,
        lines: &'a [LogLine],
    ) -> impl Iterator<Item = &'a LogPattern> {
        self.log_patterns.iter().filter(move |p| !p.is_satisfied(lines))
    }
}

/// Whether `host:port` accepts a TCP connection within `timeout`
pub fn port_accepts(host: &str, port: u16, timeout: Duration) -> bool {
    let Ok(addrs) = (host, port).to_socket_addrs() else {
        return false;
    };
    addrs
        .into_iter()
        .any(|addr| TcpStream::connect_timeout(&addr, timeout).is_ok())
}
