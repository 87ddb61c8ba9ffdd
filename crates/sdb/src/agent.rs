//! Client for a gpg-agent style passphrase cache
//!
//! The wire format is newline-terminated text over a Unix socket. After
//! connecting the agent greets with `OK ...`, the client announces its
//! display with `OPTION display=...`, and from then on every request gets a
//! reply before the next one is sent. Any reply that breaks this shape
//! closes the client for good.

use std::env;
use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// Environment variable holding the agent descriptor
pub const INFO_VAR: &str = "GPG_AGENT_INFO";

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("No passphrase agent available: {0}")]
    Unavailable(String),

    #[error("Passphrase agent protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Passphrase agent refused: {0}")]
    Cancelled(String),

    #[error("Passphrase agent I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Socket path from a descriptor such as `/run/gnupg/S.gpg-agent:1234:1`.
///
/// A leading `NAME=` is skipped so the file written by `gpg-agent
/// --write-env-file` can be read as is.
pub fn parse_descriptor(text: &str) -> Option<PathBuf> {
    let value = match text.split_once('=') {
        Some((_, value)) => value,
        None => text,
    };
    let socket = value.trim().split(':').next()?.trim();
    if socket.is_empty() {
        None
    } else {
        Some(PathBuf::from(socket))
    }
}

/// Locate the agent socket from the environment, falling back to `info_file`
pub fn discover(info_file: Option<&Path>) -> Result<PathBuf, AgentError> {
    discover_from(env::var(INFO_VAR).ok(), info_file)
}

fn discover_from(env_value: Option<String>, info_file: Option<&Path>) -> Result<PathBuf, AgentError> {
    if let Some(value) = env_value {
        return parse_descriptor(&value)
            .ok_or_else(|| AgentError::Unavailable(format!("{} has no socket path", INFO_VAR)));
    }
    let Some(file) = info_file else {
        return Err(AgentError::Unavailable(format!("{} is not set", INFO_VAR)));
    };
    let text = fs::read_to_string(file)
        .map_err(|e| AgentError::Unavailable(format!("{}: {}", file.display(), e)))?;
    parse_descriptor(&text)
        .ok_or_else(|| AgentError::Unavailable(format!("{} has no socket path", file.display())))
}

/// Escape a free-text parameter for the space-delimited command line
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '%' => out.push_str("%25"),
            '+' => out.push_str("%2B"),
            '\r' => out.push_str("%0D"),
            '\n' => out.push_str("%0A"),
            ' ' => out.push('+'),
            c => out.push(c),
        }
    }
    out
}

/// Missing parameters go on the wire as `X`
fn param(value: Option<&str>) -> String {
    match value {
        Some(v) if !v.is_empty() => escape(v),
        _ => "X".to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Connecting,
    Greeted,
    Ready,
    Querying,
    Closed,
}

/// One connection to the agent
pub struct AgentClient {
    reader: BufReader<UnixStream>,
    writer: UnixStream,
    state: State,
}

impl AgentClient {
    /// Discover the socket, then connect announcing `$DISPLAY`
    pub fn from_env(info_file: Option<&Path>) -> Result<Self, AgentError> {
        let socket = discover(info_file)?;
        let display = env::var("DISPLAY")
            .map_err(|_| AgentError::Unavailable("DISPLAY is not set".to_string()))?;
        Self::connect(&socket, &display)
    }

    pub fn connect(socket: &Path, display: &str) -> Result<Self, AgentError> {
        let stream = UnixStream::connect(socket)
            .map_err(|e| AgentError::Unavailable(format!("{}: {}", socket.display(), e)))?;
        let writer = stream.try_clone()?;
        let mut client = Self {
            reader: BufReader::new(stream),
            writer,
            state: State::Connecting,
        };

        let greeting = client.read_line()?;
        if !greeting.starts_with("OK") {
            return Err(client.violation(format!("unexpected greeting {:?}", greeting)));
        }
        client.state = State::Greeted;

        client.send(&format!("OPTION display={}", display))?;
        let ack = client.read_line()?;
        if !ack.starts_with("OK") {
            return Err(client.violation(format!("display option refused with {:?}", ack)));
        }
        client.state = State::Ready;
        debug!(socket = %socket.display(), "connected to passphrase agent");
        Ok(client)
    }

    pub fn is_closed(&self) -> bool {
        self.state == State::Closed
    }

    /// Ask the agent for the passphrase cached under `cache_id`, prompting
    /// the user through the agent when it has none.
    ///
    /// An empty answer comes back as an empty string.
    pub fn get_passphrase(
        &mut self,
        cache_id: &str,
        error: Option<&str>,
        prompt: Option<&str>,
        description: Option<&str>,
        repeat: u32,
    ) -> Result<Zeroizing<String>, AgentError> {
        self.begin_query()?;
        self.send(&format!(
            "GET_PASSPHRASE --repeat={} --data {} {} {} {}",
            repeat,
            escape(cache_id),
            param(error),
            param(prompt),
            param(description),
        ))?;

        let response = Zeroizing::new(self.read_line()?);
        if response.as_str() == "OK" {
            self.state = State::Ready;
            return Ok(Zeroizing::new(String::new()));
        }
        if response.starts_with("ERR ") {
            self.state = State::Ready;
            warn!(reply = %response.as_str(), "agent declined passphrase request");
            return Err(AgentError::Cancelled(response.to_string()));
        }
        if let Some(data) = response.strip_prefix("D ") {
            let passphrase = Zeroizing::new(data.to_string());
            self.expect_ok()?;
            self.state = State::Ready;
            return Ok(passphrase);
        }
        Err(self.violation("reply is neither OK, ERR nor data".to_string()))
    }

    /// Drop the cached passphrase for `cache_id`
    pub fn clear_passphrase(&mut self, cache_id: &str) -> Result<(), AgentError> {
        self.begin_query()?;
        self.send(&format!("CLEAR_PASSPHRASE {}", escape(cache_id)))?;
        self.expect_ok()?;
        self.state = State::Ready;
        debug!(cache_id, "cached passphrase cleared");
        Ok(())
    }

    fn begin_query(&mut self) -> Result<(), AgentError> {
        if self.state != State::Ready {
            return Err(AgentError::ProtocolViolation(format!(
                "client is not ready ({:?})",
                self.state
            )));
        }
        self.state = State::Querying;
        Ok(())
    }

    fn expect_ok(&mut self) -> Result<(), AgentError> {
        let line = self.read_line()?;
        if line != "OK" {
            return Err(self.violation(format!("expected OK, got {:?}", line)));
        }
        Ok(())
    }

    fn send(&mut self, line: &str) -> Result<(), AgentError> {
        let mut framed = Zeroizing::new(Vec::with_capacity(line.len() + 1));
        framed.extend_from_slice(line.as_bytes());
        framed.push(b'\n');
        match self.writer.write_all(&framed).and_then(|()| self.writer.flush()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                Err(self.violation("connection closed by agent".to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// One line without its terminator. End of stream is a violation.
    fn read_line(&mut self) -> Result<String, AgentError> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Err(self.violation("connection closed by agent".to_string()));
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(line)
    }

    fn violation(&mut self, what: String) -> AgentError {
        self.state = State::Closed;
        let _ = self.writer.shutdown(Shutdown::Both);
        AgentError::ProtocolViolation(what)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;
    use std::thread::{self, JoinHandle};
    use tempfile::TempDir;

    /// A scripted agent: sends `greeting`, then answers each request line
    /// with the next reply. Returns the request lines it saw.
    fn serve(greeting: &'static str, replies: Vec<&'static str>) -> (TempDir, PathBuf, JoinHandle<Vec<String>>) {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("S.gpg-agent");
        let listener = UnixListener::bind(&path).unwrap();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut writer = stream.try_clone().unwrap();
            let mut reader = BufReader::new(stream);
            writer.write_all(greeting.as_bytes()).unwrap();
            let mut seen = Vec::new();
            for reply in replies {
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap_or(0) == 0 {
                    break;
                }
                seen.push(line.trim_end().to_string());
                if writer.write_all(reply.as_bytes()).is_err() {
                    break;
                }
            }
            seen
        });
        (tmp, path, handle)
    }

    #[test]
    fn test_get_passphrase_data() {
        let (_tmp, path, agent) = serve("OK Pleased to meet you\n", vec!["OK\n", "D hunter2\nOK\n"]);
        let mut client = AgentClient::connect(&path, ":0").unwrap();
        let passphrase = client
            .get_passphrase("sdb", None, Some("Passphrase:"), Some("Unlock the store"), 0)
            .unwrap();
        assert_eq!(passphrase.as_str(), "hunter2");
        drop(client);

        assert_eq!(
            agent.join().unwrap(),
            vec![
                "OPTION display=:0".to_string(),
                "GET_PASSPHRASE --repeat=0 --data sdb X Passphrase: Unlock+the+store".to_string(),
            ]
        );
    }

    #[test]
    fn test_empty_answer() {
        let (_tmp, path, agent) = serve("OK\n", vec!["OK\n", "OK\n"]);
        let mut client = AgentClient::connect(&path, ":0").unwrap();
        assert_eq!(client.get_passphrase("sdb", None, None, None, 1).unwrap().as_str(), "");
        drop(client);
        agent.join().unwrap();
    }

    #[test]
    fn test_cancel_keeps_client_usable() {
        let (_tmp, path, agent) = serve(
            "OK\n",
            vec!["OK\n", "ERR 83886179 Operation cancelled\n", "OK\n"],
        );
        let mut client = AgentClient::connect(&path, ":0").unwrap();
        let err = client.get_passphrase("sdb", None, None, None, 0).unwrap_err();
        match err {
            AgentError::Cancelled(line) => assert!(line.contains("Operation cancelled")),
            other => panic!("unexpected {other:?}"),
        }
        client.clear_passphrase("sdb").unwrap();
        drop(client);

        let seen = agent.join().unwrap();
        assert_eq!(seen[2], "CLEAR_PASSPHRASE sdb");
    }

    #[test]
    fn test_bad_greeting() {
        let (_tmp, path, agent) = serve("HELLO\n", vec![]);
        assert!(matches!(
            AgentClient::connect(&path, ":0"),
            Err(AgentError::ProtocolViolation(_))
        ));
        agent.join().unwrap();
    }

    #[test]
    fn test_refused_display_option() {
        let (_tmp, path, agent) = serve("OK\n", vec!["ERR 1 no display\n"]);
        assert!(matches!(
            AgentClient::connect(&path, ":0"),
            Err(AgentError::ProtocolViolation(_))
        ));
        agent.join().unwrap();
    }

    #[test]
    fn test_data_without_ok_closes_client() {
        let (_tmp, path, agent) = serve("OK\n", vec!["OK\n", "D secret\nBOGUS\n"]);
        let mut client = AgentClient::connect(&path, ":0").unwrap();
        assert!(matches!(
            client.get_passphrase("sdb", None, None, None, 0),
            Err(AgentError::ProtocolViolation(_))
        ));
        assert!(client.is_closed());
        assert!(matches!(
            client.clear_passphrase("sdb"),
            Err(AgentError::ProtocolViolation(_))
        ));
        agent.join().unwrap();
    }

    #[test]
    fn test_unknown_reply_is_violation() {
        let (_tmp, path, agent) = serve("OK\n", vec!["OK\n", "WHAT\n"]);
        let mut client = AgentClient::connect(&path, ":0").unwrap();
        assert!(matches!(
            client.get_passphrase("sdb", None, None, None, 0),
            Err(AgentError::ProtocolViolation(_))
        ));
        agent.join().unwrap();
    }

    #[test]
    fn test_agent_hangup_is_violation() {
        let (_tmp, path, agent) = serve("OK\n", vec!["OK\n"]);
        let mut client = AgentClient::connect(&path, ":0").unwrap();
        agent.join().unwrap();
        assert!(matches!(
            client.clear_passphrase("sdb"),
            Err(AgentError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_missing_socket_is_unavailable() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            AgentClient::connect(&tmp.path().join("absent"), ":0"),
            Err(AgentError::Unavailable(_))
        ));
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("a b"), "a+b");
        assert_eq!(escape("100% +1"), "100%25+%2B1");
        assert_eq!(escape("two\r\nlines"), "two%0D%0Alines");
        assert_eq!(param(None), "X");
        assert_eq!(param(Some("")), "X");
    }

    #[test]
    fn test_parse_descriptor() {
        assert_eq!(
            parse_descriptor("/run/user/1000/gnupg/S.gpg-agent:1234:1"),
            Some(PathBuf::from("/run/user/1000/gnupg/S.gpg-agent"))
        );
        assert_eq!(
            parse_descriptor("GPG_AGENT_INFO=/tmp/gpg-x/S.gpg-agent:99:1\n"),
            Some(PathBuf::from("/tmp/gpg-x/S.gpg-agent"))
        );
        assert_eq!(parse_descriptor(":1234:1"), None);
        assert_eq!(parse_descriptor(""), None);
    }

    #[test]
    fn test_discover_sources() {
        let tmp = TempDir::new().unwrap();
        let info = tmp.path().join("gpg-agent-info");
        fs::write(&info, "GPG_AGENT_INFO=/from/file:1:1\n").unwrap();

        assert_eq!(
            discover_from(Some("/from/env:1:1".to_string()), Some(&info)).unwrap(),
            PathBuf::from("/from/env")
        );
        assert_eq!(discover_from(None, Some(&info)).unwrap(), PathBuf::from("/from/file"));
        assert!(matches!(discover_from(None, None), Err(AgentError::Unavailable(_))));
        assert!(matches!(
            discover_from(None, Some(&tmp.path().join("missing"))),
            Err(AgentError::Unavailable(_))
        ));
    }
}
