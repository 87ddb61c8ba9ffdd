use super::{ClipboardError, Holder, Transport};
use sdb_core::Selection;
use std::io::Write;
use std::process::{Command, Stdio};

/// The `xsel` command-line tool as a selection transport
#[derive(Debug, Clone)]
pub struct Xsel {
    program: String,
    selection: Selection,
}

impl Xsel {
    pub fn new(selection: Selection) -> Self {
        Self::with_program("xsel", selection)
    }

    pub fn with_program(program: impl Into<String>, selection: Selection) -> Self {
        Self {
            program: program.into(),
            selection,
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        let flag = match self.selection {
            Selection::Primary => "-p",
            Selection::Clipboard => "-b",
        };
        let mut command = Command::new(&self.program);
        command.arg(flag).args(args);
        command
    }

    fn unavailable(&self, status: String, output: impl Into<String>) -> ClipboardError {
        ClipboardError::TransportUnavailable {
            command: self.program.clone(),
            status,
            output: output.into(),
        }
    }
}

impl Transport for Xsel {
    fn read(&self) -> Result<Vec<u8>, ClipboardError> {
        let output = self
            .command(&["-o"])
            .stdin(Stdio::null())
            .output()
            .map_err(|e| self.unavailable("not started".to_string(), e.to_string()))?;
        if !output.status.success() {
            return Err(self.unavailable(
                output.status.to_string(),
                String::from_utf8_lossy(&output.stderr),
            ));
        }
        Ok(output.stdout)
    }

    fn write(&self, bytes: &[u8]) -> Result<(), ClipboardError> {
        let mut child = self
            .command(&["-i"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.unavailable("not started".to_string(), e.to_string()))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(bytes)?;
        }
        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(self.unavailable(
                output.status.to_string(),
                String::from_utf8_lossy(&output.stderr),
            ));
        }
        Ok(())
    }

    fn hold(&self, bytes: &[u8]) -> Result<Holder, ClipboardError> {
        // -n keeps xsel in the foreground, -vvvv logs each transfer to stderr
        Holder::spawn(self.command(&["-i", "-vvvv", "-n"]), bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clipboard::Clipboard;

    #[test]
    fn test_missing_program_is_unavailable() {
        let xsel = Xsel::with_program("/nonexistent/xsel", Selection::Primary);
        assert!(matches!(
            xsel.write(b"x"),
            Err(ClipboardError::TransportUnavailable { .. })
        ));

        let clipboard = Clipboard::new(xsel).with_cancel(None);
        assert!(clipboard.peek().is_empty());
        assert!(clipboard.set_once(b"x").is_err());
    }

    #[test]
    #[ignore = "requires an X display and xsel"]
    fn test_real_selection_set_and_peek() {
        let clipboard = Clipboard::new(Xsel::new(Selection::Primary));
        clipboard.set(b"sdb test value").unwrap();
        assert_eq!(clipboard.peek(), b"sdb test value");
    }
}
