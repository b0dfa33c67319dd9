// src/core/connection/cli.rs

use super::{Connection, Connector, ProxyConfig};
use crate::config::AuditConfig;
use crate::core::error::ConnectError;
use crate::core::models::SessionCredentials;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, warn};

// Telnet negotiation bytes (RFC 854).
const IAC: u8 = 255;
const DONT: u8 = 254;
const DO: u8 = 253;
const WONT: u8 = 252;
const WILL: u8 = 251;
const SB: u8 = 250;
const SE: u8 = 240;

// Anything that needs an answer during login, or the CLI prompt that ends it.
// A prompt marker must be the last thing received: banner lines end in a newline.
static RE_LOGIN_EVENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:(?:user ?name\s*:|login\s*:|password\s*:|\(yes/no[^)]*\)\?)\s*|[>#$] ?)$").unwrap()
});
static RE_USERNAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(?:user ?name|login)\s*:\s*$").unwrap());
static RE_PASSWORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)password\s*:\s*$").unwrap());
static RE_HOST_KEY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\(yes/no[^)]*\)\?\s*$").unwrap());

/// Opens line-oriented CLI sessions over TCP (telnet-style), optionally
/// logging in to a jumphost first and typing a hop command there.
///
/// The stream is cleartext, so credentials and command output cross the
/// network unencrypted. Devices that must be reached over SSH need their own
/// [`Connector`] implementation.
#[derive(Debug, Clone)]
pub struct CliConnector {
    port: u16,
    connect_timeout: Duration,
    command_timeout: Duration,
    jump_command: String,
}

impl CliConnector {
    pub fn new(config: &AuditConfig) -> Self {
        Self {
            port: config.port,
            connect_timeout: config.connect_timeout(),
            command_timeout: config.command_timeout(),
            jump_command: config.jump_command.clone(),
        }
    }

    fn hop_command(&self, device: &str, username: &str) -> String {
        self.jump_command
            .replace("{hostname}", device)
            .replace("{username}", username)
    }
}

#[async_trait]
impl Connector for CliConnector {
    async fn connect(
        &self,
        device: &str,
        credentials: &SessionCredentials,
    ) -> Result<Box<dyn Connection>, ConnectError> {
        let proxy = ProxyConfig::from_credentials(credentials);
        let first_hop = proxy.as_ref().map_or(device, |p| p.hostname.as_str());

        debug!(device, first_hop, port = self.port, "Connecting TCP stream.");
        let stream = timeout(self.connect_timeout, TcpStream::connect((first_hop, self.port)))
            .await
            .map_err(|_| ConnectError::Timeout(format!("TCP connect to {first_hop}")))?
            .map_err(|source| ConnectError::Tcp {
                host: first_hop.to_string(),
                source,
            })?;

        let mut session = CliSession::new(device, stream, self.command_timeout);

        if let Some(proxy) = &proxy {
            debug!(device, jumphost = %proxy.hostname, "Logging in to jumphost.");
            session
                .login(&proxy.username, &proxy.password, self.connect_timeout)
                .await?;
            session
                .write_line(&self.hop_command(device, &credentials.network_username))
                .await?;
        }

        let base = session
            .login(
                &credentials.network_username,
                &credentials.network_password,
                self.connect_timeout,
            )
            .await?;
        session.set_base_prompt(base)?;
        session.disable_paging().await;
        Ok(Box::new(session))
    }
}

/// One authenticated CLI session.
pub struct CliSession {
    device: String,
    stream: TcpStream,
    filter: TelnetFilter,
    decoder: Utf8Decoder,
    buffer: String,
    base_prompt: String,
    prompt: Option<Regex>,
    command_timeout: Duration,
    /// Set once a command reply went unread; later output would be misattributed.
    desynced: bool,
}

impl CliSession {
    fn new(device: &str, stream: TcpStream, command_timeout: Duration) -> Self {
        Self {
            device: device.to_string(),
            stream,
            filter: TelnetFilter::default(),
            decoder: Utf8Decoder::default(),
            buffer: String::new(),
            base_prompt: String::new(),
            prompt: None,
            command_timeout,
            desynced: false,
        }
    }

    fn set_base_prompt(&mut self, base: String) -> Result<(), ConnectError> {
        let pattern = format!(r"{}[^\r\n]*[>#] ?$", regex::escape(&base));
        self.prompt = Some(Regex::new(&pattern).map_err(|e| ConnectError::Protocol(e.to_string()))?);
        self.base_prompt = base;
        Ok(())
    }

    async fn write_line(&mut self, line: &str) -> Result<(), ConnectError> {
        self.stream.write_all(format!("{line}\n").as_bytes()).await?;
        Ok(())
    }

    /// Reads until `pattern` matches the end of what has been received so far.
    async fn read_until(&mut self, pattern: &Regex, limit: Duration, what: &str) -> Result<String, ConnectError> {
        let deadline = Instant::now() + limit;
        let mut chunk = [0u8; 4096];
        loop {
            if let Some(m) = pattern.find(&self.buffer) {
                let end = m.end();
                let text = self.buffer[..end].to_string();
                self.buffer.replace_range(..end, "");
                return Ok(text);
            }

            let read = timeout_at(deadline, self.stream.read(&mut chunk))
                .await
                .map_err(|_| ConnectError::Timeout(format!("{what} from {}", self.device)))??;
            if read == 0 {
                return Err(ConnectError::Closed);
            }

            let (data, replies) = self.filter.feed(&chunk[..read]);
            if !replies.is_empty() {
                self.stream.write_all(&replies).await?;
            }
            let text = self.decoder.decode(&data);
            self.buffer.push_str(&text);
        }
    }

    /// Answers username/password/host-key prompts until a CLI prompt shows up.
    /// Returns the prompt's base name.
    async fn login(&mut self, username: &str, password: &str, limit: Duration) -> Result<String, ConnectError> {
        let mut sent_username = false;
        let mut sent_password = false;
        loop {
            let text = self.read_until(&RE_LOGIN_EVENT, limit, "login prompt").await?;
            if RE_HOST_KEY.is_match(&text) {
                self.write_line("yes").await?;
            } else if RE_USERNAME.is_match(&text) {
                // Asked again after a password: credentials were rejected.
                if sent_password {
                    return Err(ConnectError::AuthenticationFailed(self.device.clone()));
                }
                self.write_line(username).await?;
                sent_username = true;
            } else if RE_PASSWORD.is_match(&text) {
                if sent_password {
                    return Err(ConnectError::AuthenticationFailed(self.device.clone()));
                }
                self.write_line(password).await?;
                sent_password = true;
            } else if let Some(base) = prompt_base(&text) {
                if sent_username && !sent_password {
                    return Err(ConnectError::Protocol(format!(
                        "{} showed a prompt before asking for a password",
                        self.device
                    )));
                }
                return Ok(base);
            }
        }
    }

    async fn disable_paging(&mut self) {
        if let Err(e) = self.send("terminal length 0").await {
            warn!(device = %self.device, error = %e, "Could not disable paging.");
        }
    }
}

#[async_trait]
impl Connection for CliSession {
    fn device(&self) -> &str {
        &self.device
    }

    fn base_prompt(&self) -> &str {
        &self.base_prompt
    }

    async fn send(&mut self, command: &str) -> Result<String, ConnectError> {
        if self.desynced {
            return Err(ConnectError::Protocol(format!(
                "session to {} lost track of a command reply",
                self.device
            )));
        }
        let prompt = self
            .prompt
            .clone()
            .ok_or_else(|| ConnectError::Protocol("command sent before login completed".into()))?;
        debug!(device = %self.device, command, "Sending command.");
        self.write_line(command).await?;
        match self.read_until(&prompt, self.command_timeout, "command output").await {
            Ok(raw) => Ok(clean_output(&raw, command)),
            Err(e) => {
                self.desynced = true;
                Err(e)
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.write_all(b"exit\n").await;
        let _ = self.stream.shutdown().await;
        debug!(device = %self.device, "Session closed.");
    }
}

/// Base name of the CLI prompt on the last non-empty line, e.g. `core-1` for `core-1#`.
fn prompt_base(text: &str) -> Option<String> {
    let last = text.rsplit(['\n', '\r']).find(|l| !l.trim().is_empty())?.trim();
    let base = last.strip_suffix(['>', '#', '$'])?.trim_end();
    (!base.is_empty()).then(|| base.to_string())
}

/// Drops the echoed command line and the trailing prompt.
fn clean_output(raw: &str, command: &str) -> String {
    let text = raw.replace("\r\n", "\n").replace('\r', "");
    let mut lines: Vec<&str> = text.lines().collect();
    if lines
        .first()
        .is_some_and(|l| l.trim_end().ends_with(command.trim()))
    {
        lines.remove(0);
    }
    lines.pop();
    lines.join("\n")
}

/// Decodes UTF-8 across reads, holding back a character split between two of them.
#[derive(Debug, Default)]
struct Utf8Decoder {
    partial: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, bytes: &[u8]) -> String {
        let mut input = std::mem::take(&mut self.partial);
        input.extend_from_slice(bytes);

        let mut out = String::with_capacity(input.len());
        let mut rest = input.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    out.push_str(text);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            self.partial = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }
}

/// Strips telnet negotiation from the byte stream and refuses every option.
#[derive(Debug, Default)]
struct TelnetFilter {
    pending: Vec<u8>,
}

impl TelnetFilter {
    /// Returns (printable data, negotiation replies). Incomplete sequences are kept for the next call.
    fn feed(&mut self, bytes: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let mut input = std::mem::take(&mut self.pending);
        input.extend_from_slice(bytes);

        let mut data = Vec::with_capacity(input.len());
        let mut replies = Vec::new();
        let mut i = 0;
        while i < input.len() {
            if input[i] != IAC {
                data.push(input[i]);
                i += 1;
                continue;
            }
            let Some(&cmd) = input.get(i + 1) else { break };
            match cmd {
                IAC => {
                    data.push(IAC);
                    i += 2;
                }
                DO | DONT | WILL | WONT => {
                    let Some(&option) = input.get(i + 2) else { break };
                    if cmd == DO {
                        replies.extend_from_slice(&[IAC, WONT, option]);
                    } else if cmd == WILL {
                        replies.extend_from_slice(&[IAC, DONT, option]);
                    }
                    i += 3;
                }
                SB => match input[i + 2..].windows(2).position(|w| w == [IAC, SE]) {
                    Some(end) => i += 2 + end + 2,
                    None => break,
                },
                _ => i += 2,
            }
        }
        if i < input.len() {
            self.pending = input[i..].to_vec();
        }
        (data, replies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_base_strips_marker_and_ignores_banner() {
        assert_eq!(prompt_base("Welcome\r\ncore-1#"), Some("core-1".to_string()));
        assert_eq!(prompt_base("edge-2> "), Some("edge-2".to_string()));
        assert_eq!(prompt_base("ops@jump:~$ "), Some("ops@jump:~".to_string()));
        assert_eq!(prompt_base("#"), None);
        assert_eq!(prompt_base("Password:"), None);
    }

    #[test]
    fn clean_output_removes_echo_and_prompt() {
        let raw = "show clock\r\n*10:00:01 UTC Mon Jan 1 2024\r\ncore-1#";
        assert_eq!(clean_output(raw, "show clock"), "*10:00:01 UTC Mon Jan 1 2024");
        assert_eq!(clean_output("core-1#", "show clock"), "");
    }

    #[test]
    fn login_events_ignore_banner_lines() {
        assert!(!RE_LOGIN_EVENT.is_match("\r\n##########\r\n"));
        assert!(!RE_LOGIN_EVENT.is_match("Welcome to core-1 >>>\n"));
        assert!(RE_LOGIN_EVENT.is_match("\r\ncore-1#"));
        assert!(RE_LOGIN_EVENT.is_match("ops@jump:~$ "));
        assert!(RE_LOGIN_EVENT.is_match("Username: "));
        assert!(RE_LOGIN_EVENT.is_match("Continue (yes/no)? "));
    }

    #[test]
    fn decoder_joins_characters_split_across_reads() {
        let bytes = "Zürich uplink".as_bytes();
        let split = bytes.iter().position(|&b| b == 0xC3).unwrap() + 1;
        let mut decoder = Utf8Decoder::default();

        let mut text = decoder.decode(&bytes[..split]);
        text.push_str(&decoder.decode(&bytes[split..]));
        assert_eq!(text, "Zürich uplink");
    }

    #[test]
    fn decoder_replaces_invalid_bytes_and_moves_on() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(&[b'a', 0xFF, b'b']), "a\u{FFFD}b");
        assert!(decoder.partial.is_empty());
    }

    #[test]
    fn telnet_filter_refuses_options_and_keeps_data() {
        let mut filter = TelnetFilter::default();
        let (data, replies) = filter.feed(&[IAC, DO, 1, b'h', b'i', IAC, WILL, 3]);
        assert_eq!(data, b"hi");
        assert_eq!(replies, vec![IAC, WONT, 1, IAC, DONT, 3]);
    }

    #[test]
    fn telnet_filter_carries_split_sequences() {
        let mut filter = TelnetFilter::default();
        let (data, replies) = filter.feed(&[b'a', IAC]);
        assert_eq!(data, b"a");
        assert!(replies.is_empty());

        let (data, replies) = filter.feed(&[DO, 24, b'b']);
        assert_eq!(data, b"b");
        assert_eq!(replies, vec![IAC, WONT, 24]);

        let (data, _) = filter.feed(&[IAC, SB, 24, 1, IAC, SE, b'c', IAC, IAC]);
        assert_eq!(data, vec![b'c', IAC]);
    }
}
