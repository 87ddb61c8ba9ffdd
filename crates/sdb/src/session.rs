//! Interactive add/show/edit/delete over a line-oriented terminal

use crate::clipboard::{ClipboardError, SecretSink};
use crate::codec;
use crate::crypto::Cipher;
use crate::editor;
use crate::generate::{gen_password_entropy, ALPHANUMERIC, DEFAULT_ENTROPY_BITS};
use crate::record::Record;
use crate::resolver::{self, Resolution};
use crate::store::Store;
use anyhow::{bail, Result};
use std::io::{BufRead, Write};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("No matching record for {0:?}")]
    NoMatch(String),

    #[error("Invalid choice {0:?}")]
    InvalidChoice(String),

    #[error("Input ended while a value was required")]
    EndOfInput,
}

/// Line prompts over any reader/writer pair
pub struct Prompter<R, W> {
    input: R,
    output: W,
    /// Read hidden values from the terminal instead of `input`
    terminal: bool,
    notes_editor: fn(&str) -> Result<String>,
}

impl<R: BufRead, W: Write> Prompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            terminal: false,
            notes_editor: editor::edit_in_editor,
        }
    }

    /// Whether `input` is a terminal, enabling hidden password entry
    pub fn with_terminal(mut self, terminal: bool) -> Self {
        self.terminal = terminal;
        self
    }

    pub fn with_editor(mut self, notes_editor: fn(&str) -> Result<String>) -> Self {
        self.notes_editor = notes_editor;
        self
    }

    pub fn output(&mut self) -> &mut W {
        &mut self.output
    }

    /// Ask until a non-empty answer arrives, unless `required` is false.
    /// End of input yields an empty answer for optional prompts.
    pub fn prompt(&mut self, prompt: &str, required: bool, hidden: bool) -> Result<String> {
        loop {
            let line = if hidden && self.terminal {
                rpassword::prompt_password(prompt)?
            } else {
                write!(self.output, "{}", prompt)?;
                self.output.flush()?;
                let mut line = String::new();
                if self.input.read_line(&mut line)? == 0 {
                    if required {
                        bail!(SessionError::EndOfInput);
                    }
                    return Ok(String::new());
                }
                if line.ends_with('\n') {
                    line.pop();
                    if line.ends_with('\r') {
                        line.pop();
                    }
                }
                line
            };
            if !required || !line.is_empty() {
                return Ok(line);
            }
        }
    }

    /// Prompt for a new record. A blank password is generated.
    pub fn get_record(&mut self, domain: Option<&str>) -> Result<Record> {
        let domain = match domain {
            Some(d) => d.to_string(),
            None => self.prompt("Domain: ", true, false)?,
        };
        let username = self.prompt("Username: ", true, false)?;
        let mut password = self.prompt("Password [blank to generate]: ", false, true)?;
        if password.is_empty() {
            password = gen_password_entropy(DEFAULT_ENTROPY_BITS, ALPHANUMERIC)?;
        }
        let notes = self.prompt("Notes: ", false, false)?;
        Ok(Record::new(domain, username, password, notes))
    }

    /// Prompt field by field; blank keeps the current value, `g` for the
    /// password generates a new one
    pub fn edit_record(&mut self, record: &Record) -> Result<Record> {
        let mut edited = record.clone();

        let domain = self.prompt(&format!("Name [{}]: ", record.domain), false, false)?;
        if !domain.is_empty() {
            edited.domain = domain;
        }
        let username = self.prompt(&format!("Username [{}]: ", record.username), false, false)?;
        if !username.is_empty() {
            edited.username = username;
        }
        match self.prompt("Password []/g: ", false, true)?.as_str() {
            "" => {}
            "g" => edited.password = gen_password_entropy(DEFAULT_ENTROPY_BITS, ALPHANUMERIC)?,
            other => edited.password = other.to_string(),
        }

        writeln!(self.output, "Notes: {}", record.notes)?;
        if self.prompt("Edit? [n]: ", false, false)?.starts_with('y') {
            edited.notes = (self.notes_editor)(&record.notes)?;
        }
        Ok(edited)
    }

    /// Resolve `query` to the index of one record, asking the user to pick
    /// when several match
    pub fn find_record(&mut self, query: &str, records: &[Record]) -> Result<usize> {
        match resolver::resolve(query, records) {
            Resolution::NoMatch => bail!(SessionError::NoMatch(query.to_string())),
            Resolution::One(index) => Ok(index),
            Resolution::Ambiguous(candidates) => {
                for (i, (_, key)) in candidates.iter().enumerate() {
                    writeln!(self.output, "{}) {}", i, key)?;
                }
                let answer = self.prompt("Which did you mean? [0]: ", false, false)?;
                let choice = if answer.is_empty() {
                    0
                } else {
                    answer
                        .trim()
                        .parse::<usize>()
                        .map_err(|_| SessionError::InvalidChoice(answer.clone()))?
                };
                match candidates.get(choice) {
                    Some((index, _)) => Ok(*index),
                    None => bail!(SessionError::InvalidChoice(answer)),
                }
            }
        }
    }
}

/// A prompter bound to a store, plus where secrets are handed off to
pub struct Session<R, W, C> {
    prompter: Prompter<R, W>,
    store: Store<C>,
    sink: Option<Box<dyn SecretSink>>,
}

impl<R: BufRead, W: Write, C: Cipher> Session<R, W, C> {
    pub fn new(prompter: Prompter<R, W>, store: Store<C>) -> Self {
        Self {
            prompter,
            store,
            sink: None,
        }
    }

    /// Hand shown credentials to `sink` instead of returning the password
    pub fn with_sink(mut self, sink: Box<dyn SecretSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn prompter(&mut self) -> &mut Prompter<R, W> {
        &mut self.prompter
    }

    pub fn store(&self) -> &Store<C> {
        &self.store
    }

    fn query(&mut self, domain: Option<&str>) -> Result<String> {
        match domain {
            Some(d) => Ok(d.to_string()),
            None => self.prompter.prompt("Domain: ", true, false),
        }
    }

    pub fn add(&mut self, domain: Option<&str>) -> Result<()> {
        let record = self.prompter.get_record(domain)?;
        self.store.transact(|mut records| {
            records.push(record);
            Ok(records)
        })?;
        Ok(())
    }

    /// Print the summary line, then hand off username and password.
    ///
    /// Without a sink the password is returned instead. When the hand-off
    /// fails the password is printed.
    pub fn show(&mut self, domain: Option<&str>) -> Result<Option<String>> {
        let query = self.query(domain)?;
        let mut records = self.store.read()?;
        let index = self.prompter.find_record(&query, &records)?;
        let record = records.swap_remove(index);
        writeln!(self.prompter.output, "{}", record.pretty())?;

        let Some(sink) = self.sink.as_deref() else {
            return Ok(Some(record.password));
        };
        if let Err(e) = hand_off(sink, &mut self.prompter.output, &record) {
            debug!(error = %e, "clipboard hand-off failed, printing instead");
            writeln!(self.prompter.output, "couldn't set clipboard: {}", reason(&e))?;
            writeln!(self.prompter.output, "{}", record.password)?;
        }
        Ok(None)
    }

    pub fn edit(&mut self, domain: Option<&str>) -> Result<()> {
        let query = self.query(domain)?;
        let prompter = &mut self.prompter;
        self.store.transact(|mut records| {
            let index = prompter.find_record(&query, &records)?;
            records[index] = prompter.edit_record(&records[index])?;
            Ok(records)
        })?;
        Ok(())
    }

    pub fn delete(&mut self, domain: Option<&str>) -> Result<()> {
        let query = self.query(domain)?;
        let prompter = &mut self.prompter;
        self.store.transact(|mut records| {
            let index = prompter.find_record(&query, &records)?;
            writeln!(prompter.output, "{}", records[index].pretty())?;
            if prompter.prompt("Really? [n]: ", false, false)?.starts_with('y') {
                records.remove(index);
            } else {
                writeln!(prompter.output, "Ok, cancelled")?;
            }
            Ok(records)
        })?;
        Ok(())
    }

    /// Print every record matching `term`, best first. Returns the count.
    pub fn search(&mut self, term: &str) -> Result<usize> {
        let records = self.store.read()?;
        let hits = resolver::search(term, &records);
        for record in &hits {
            writeln!(self.prompter.output, "{}", record.pretty())?;
        }
        Ok(hits.len())
    }

    /// Write the decrypted store body
    pub fn raw(&mut self) -> Result<()> {
        let records = self.store.read()?;
        self.prompter.output.write_all(&codec::encode(&records))?;
        self.prompter.output.flush()?;
        Ok(())
    }
}

fn hand_off<W: Write>(sink: &dyn SecretSink, output: &mut W, record: &Record) -> Result<(), ClipboardError> {
    writeln!(output, "username in clipboard")?;
    output.flush()?;
    sink.offer(record.username.as_bytes())?;
    writeln!(output, "password in clipboard")?;
    output.flush()?;
    sink.offer(record.password.as_bytes())
}

fn reason(e: &ClipboardError) -> String {
    match e.output().lines().next().map(str::trim) {
        Some(line) if !line.is_empty() => line.to_string(),
        _ => e.to_string(),
    }
}
