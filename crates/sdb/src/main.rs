//! sdb - local encrypted password store
//!
//! Commands:
//! - add [DOMAIN]: Add a record (blank password generates one)
//! - show [DOMAIN]: Print a record and hand its credentials to the selection
//! - edit [DOMAIN]: Edit a record field by field
//! - delete [DOMAIN]: Delete a record after confirmation
//! - search <TERM>: List matching records, best first
//! - raw: Dump the decrypted store
//! - export: Write a portable copy (raw, json or age)
//! - generate: Print a random password
//! - forget: Clear the agent-cached passphrase

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use sdb::clipboard::Mode;
use sdb::export::{self, ExportFormat};
use sdb::generate::{self, ALPHANUMERIC, EVERYTHING};
use sdb::{
    AgentClient, Cipher, Clipboard, CryptoError, FdReader, GpgCipher, KdfParams, Passphrase, Prompter,
    SealedCipher, Session, Store, Xsel,
};
use sdb_core::{CipherKind, Config, HandoffMode, Paths};
use std::fs::{self, OpenOptions};
use std::io::{self, IsTerminal, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sdb")]
#[command(about = "Local encrypted password store with fuzzy lookup and one-shot clipboard hand-off")]
#[command(version)]
#[command(after_help = r#"LOOKUP:
    DOMAIN is a fuzzy query over domain, username and notes. When several
    records match you are asked to pick one.

CLIPBOARD:
    show puts the username, then the password, into the X selection for
    exactly one paste each. Press enter to skip ahead. Use --print to write
    the password to stdout instead.

ENVIRONMENT:
    GPG_AGENT_INFO   agent socket descriptor used with --agent
    EDITOR           editor for notes (default: vim)
    RUST_LOG         log filter, e.g. RUST_LOG=sdb=debug"#)]
struct Cli {
    /// Store file (default: ~/.local/share/sdb/passwords.sdb)
    #[arg(short, long, global = true)]
    file: Option<PathBuf>,

    /// Config file (default: ~/.config/sdb/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Ask gpg-agent for the passphrase
    #[arg(long, global = true)]
    agent: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(flatten)]
    Store(StoreCommand),

    /// Generate a random password
    Generate {
        /// Bits of entropy
        #[arg(long, default_value_t = generate::DEFAULT_ENTROPY_BITS)]
        entropy: u32,
        #[arg(long, value_enum, default_value_t = CharsetArg::Alnum)]
        charset: CharsetArg,
        /// Characters that must all appear
        #[arg(long)]
        require: Option<String>,
    },

    /// Clear the passphrase cached by gpg-agent
    Forget,
}

/// Commands that unlock the store
#[derive(Subcommand, Debug)]
enum StoreCommand {
    /// Add a record
    Add {
        /// Domain of the new record (prompted if omitted)
        domain: Option<String>,
    },

    /// Show a record and hand off its credentials
    Show {
        /// Query (prompted if omitted)
        domain: Option<String>,
        /// Print the password instead of using the selection
        #[arg(long)]
        print: bool,
        /// Hold the selection for SECS seconds instead of one paste
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },

    /// Edit a record
    Edit {
        /// Query (prompted if omitted)
        domain: Option<String>,
    },

    /// Delete a record
    Delete {
        /// Query (prompted if omitted)
        domain: Option<String>,
    },

    /// List records matching a query
    Search {
        term: String,
    },

    /// Dump the decrypted store to stdout
    Raw,

    /// Export all records
    Export {
        /// Output format (age is encrypted with the store passphrase)
        #[arg(long, value_enum, default_value_t = FormatArg::Age)]
        format: FormatArg,
        /// Output file, created with mode 600 (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FormatArg {
    Raw,
    Json,
    Age,
}

impl From<FormatArg> for ExportFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Raw => ExportFormat::Raw,
            FormatArg::Json => ExportFormat::Json,
            FormatArg::Age => ExportFormat::Age,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CharsetArg {
    /// Letters and digits
    Alnum,
    /// Letters, digits and punctuation
    All,
}

impl CharsetArg {
    fn chars(self) -> &'static str {
        match self {
            CharsetArg::Alnum => ALPHANUMERIC,
            CharsetArg::All => EVERYTHING,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let paths = Paths::new();
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let store_path = cli.file.clone().unwrap_or_else(|| config.store_path(&paths));
    let cache_id = cache_id(&config, &store_path);
    let use_agent = cli.agent || config.agent.enabled;

    match cli.command {
        Commands::Generate {
            entropy,
            charset,
            require,
        } => cmd_generate(entropy, charset, require.as_deref()),
        Commands::Forget => cmd_forget(&config, &cache_id),
        Commands::Store(command) => {
            if let Some(parent) = store_path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }

            let passphrase = if use_agent {
                agent_passphrase(&config, &cache_id, &store_path)?
            } else {
                prompt_passphrase()?
            };
            let store = Store::new(&store_path, build_cipher(&config), passphrase.clone());

            let result = run(command, store, &config, &passphrase);
            if use_agent && is_wrong_passphrase(&result) {
                // don't keep serving a bad cached passphrase
                if let Err(e) = forget(&config, &cache_id) {
                    warn!(error = %e, "could not clear cached passphrase");
                }
            }
            result
        }
    }
}

fn run<C: Cipher>(command: StoreCommand, store: Store<C>, config: &Config, passphrase: &Passphrase) -> Result<()> {
    // unbuffered, so the clipboard sees every cancel line left on stdin
    let terminal = io::stdin().is_terminal();
    let prompter = Prompter::new(FdReader::stdin(), io::stdout()).with_terminal(terminal);
    let mut session = Session::new(prompter, store);

    match command {
        StoreCommand::Add { domain } => session.add(domain.as_deref()),
        StoreCommand::Show {
            domain,
            print,
            timeout,
        } => {
            if !print && config.clipboard.enabled {
                let clipboard = Clipboard::new(Xsel::new(config.clipboard.selection))
                    .with_mode(handoff_mode(timeout, config));
                session = session.with_sink(Box::new(clipboard));
            }
            if let Some(password) = session.show(domain.as_deref())? {
                println!("{}", password);
            }
            Ok(())
        }
        StoreCommand::Edit { domain } => session.edit(domain.as_deref()),
        StoreCommand::Delete { domain } => session.delete(domain.as_deref()),
        StoreCommand::Search { term } => {
            if session.search(&term)? == 0 {
                eprintln!("No matching records");
            }
            Ok(())
        }
        StoreCommand::Raw => session.raw(),
        StoreCommand::Export { format, output } => {
            let records = session.store().read()?;
            let bytes = export::export(&records, format.into(), passphrase)?;
            write_export(&bytes, output.as_deref())
        }
    }
}

/// Generate a password
fn cmd_generate(entropy: u32, charset: CharsetArg, require: Option<&str>) -> Result<()> {
    let password = match require {
        Some(required) => {
            let length = generate::length_for_entropy(entropy, charset.chars())?;
            generate::gen_password_require(required, charset.chars(), length)?
        }
        None => generate::gen_password_entropy(entropy, charset.chars())?,
    };
    println!("{}", password);
    Ok(())
}

/// Clear the cached passphrase
fn cmd_forget(config: &Config, cache_id: &str) -> Result<()> {
    forget(config, cache_id)?;
    println!("Cached passphrase cleared");
    Ok(())
}

fn forget(config: &Config, cache_id: &str) -> Result<()> {
    let mut agent = AgentClient::from_env(config.agent.info_file.as_deref())?;
    agent.clear_passphrase(cache_id)?;
    Ok(())
}

fn agent_passphrase(config: &Config, cache_id: &str, store_path: &Path) -> Result<Passphrase> {
    let mut agent = AgentClient::from_env(config.agent.info_file.as_deref())?;
    let description = format!("Unlock password store {}", store_path.display());
    let secret = agent.get_passphrase(cache_id, None, Some("Passphrase:"), Some(&description), 0)?;
    if secret.is_empty() {
        bail!("Agent returned an empty passphrase");
    }
    debug!(cache_id, "passphrase obtained from agent");
    Ok(Passphrase::new(secret.as_str())?)
}

fn prompt_passphrase() -> Result<Passphrase> {
    let secret = rpassword::prompt_password("Passphrase: ").context("Failed to read passphrase")?;
    Ok(Passphrase::new(secret)?)
}

fn build_cipher(config: &Config) -> Box<dyn Cipher> {
    match config.cipher.kind {
        CipherKind::Sealed => Box::new(SealedCipher::new(KdfParams {
            m_cost: config.cipher.m_cost,
            t_cost: config.cipher.t_cost,
            p_cost: config.cipher.p_cost,
        })),
        CipherKind::Gpg => Box::new(GpgCipher::new(&config.cipher.gpg_program)),
    }
}

fn cache_id(config: &Config, store_path: &Path) -> String {
    config
        .agent
        .cache_id
        .clone()
        .unwrap_or_else(|| format!("sdb:{}", store_path.display()))
}

fn handoff_mode(timeout: Option<u64>, config: &Config) -> Mode {
    match (timeout, config.clipboard.mode) {
        (Some(secs), _) => Mode::Timeout(Duration::from_secs(secs)),
        (None, HandoffMode::Timeout) => Mode::Timeout(Duration::from_secs(config.clipboard.timeout_secs)),
        (None, HandoffMode::Once) => Mode::Once,
    }
}

fn is_wrong_passphrase(result: &Result<()>) -> bool {
    matches!(
        result.as_ref().err().and_then(|e| e.downcast_ref::<CryptoError>()),
        Some(CryptoError::WrongPassphrase)
    )
}

fn write_export(bytes: &[u8], output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            let mut file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(0o600)
                .open(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            file.write_all(bytes)?;
            file.sync_all()?;
            eprintln!("Exported to {}", path.display());
        }
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(bytes)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["sdb", "--help"]);
        assert!(cli.is_err()); // --help exits

        let cli = Cli::try_parse_from(["sdb", "show", "github", "--print", "--timeout", "5"]).unwrap();
        match cli.command {
            Commands::Store(StoreCommand::Show {
                domain,
                print,
                timeout,
            }) => {
                assert_eq!(domain.as_deref(), Some("github"));
                assert!(print);
                assert_eq!(timeout, Some(5));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["sdb", "add", "example.com", "--file", "/tmp/p.sdb", "--agent"]).unwrap();
        assert_eq!(cli.file, Some(PathBuf::from("/tmp/p.sdb")));
        assert!(cli.agent);
    }

    #[test]
    fn test_export_and_generate_defaults() {
        let cli = Cli::try_parse_from(["sdb", "export"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Store(StoreCommand::Export {
                format: FormatArg::Age,
                output: None
            })
        ));

        let cli = Cli::try_parse_from(["sdb", "generate", "--charset", "all"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Generate {
                entropy: 128,
                charset: CharsetArg::All,
                require: None
            }
        ));

        assert!(Cli::try_parse_from(["sdb", "export", "--format", "xml"]).is_err());
        assert!(Cli::try_parse_from(["sdb"]).is_err());
    }

    #[test]
    fn test_only_store_commands_unlock() {
        let cli = Cli::try_parse_from(["sdb", "raw"]).unwrap();
        assert!(matches!(cli.command, Commands::Store(StoreCommand::Raw)));

        let cli = Cli::try_parse_from(["sdb", "search", "git"]).unwrap();
        assert!(matches!(cli.command, Commands::Store(StoreCommand::Search { .. })));

        let cli = Cli::try_parse_from(["sdb", "forget"]).unwrap();
        assert!(matches!(cli.command, Commands::Forget));
    }

    #[test]
    fn test_handoff_mode() {
        let mut config = Config::default();
        assert_eq!(handoff_mode(None, &config), Mode::Once);
        assert_eq!(handoff_mode(Some(3), &config), Mode::Timeout(Duration::from_secs(3)));

        config.clipboard.mode = HandoffMode::Timeout;
        assert_eq!(handoff_mode(None, &config), Mode::Timeout(Duration::from_secs(10)));
    }

    #[test]
    fn test_cache_id() {
        let mut config = Config::default();
        assert_eq!(cache_id(&config, Path::new("/s/p.sdb")), "sdb:/s/p.sdb");
        config.agent.cache_id = Some("mine".into());
        assert_eq!(cache_id(&config, Path::new("/s/p.sdb")), "mine");
    }

    #[test]
    fn test_wrong_passphrase_detection() {
        let wrong: Result<()> = Err(CryptoError::WrongPassphrase.into());
        let other: Result<()> = Err(CryptoError::NotCiphertext.into());
        assert!(is_wrong_passphrase(&wrong));
        assert!(!is_wrong_passphrase(&other));
        assert!(!is_wrong_passphrase(&Ok(())));
    }
}
