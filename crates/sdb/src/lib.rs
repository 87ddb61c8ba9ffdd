//! sdb - a local encrypted password store
//!
//! Records (domain, username, password, notes) live in one encrypted file.
//! Every change is a transaction that re-encrypts the whole file, checks the
//! result decrypts back to what was intended, and renames it into place.
//! Lookups are fuzzy. Shown passwords go to the X selection for exactly one
//! paste. The passphrase can come from a running gpg-agent.

pub mod agent;
pub mod clipboard;
pub mod codec;
pub mod crypto;
pub mod editor;
pub mod export;
pub mod generate;
pub mod input;
pub mod matcher;
pub mod record;
pub mod resolver;
pub mod session;
pub mod store;

pub use agent::{AgentClient, AgentError};
pub use clipboard::{Clipboard, ClipboardError, Release, SecretSink, Xsel};
pub use codec::CodecError;
pub use input::FdReader;
pub use crypto::{Cipher, CryptoError, GpgCipher, KdfParams, Passphrase, SealedCipher};
pub use record::{Record, RecordSet};
pub use resolver::{DisplayKey, Resolution};
pub use session::{Prompter, Session, SessionError};
pub use store::{Store, TransactionError};
