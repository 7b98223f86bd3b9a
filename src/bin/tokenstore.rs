use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::mem::MaybeUninit;
use std::os::fd::{AsRawFd, RawFd};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error};

use tokenstore::{
    api::{EncryptionAlgorithm, ModuleConfig, Pin, RecordKind, SignatureAlgorithm},
    config::MAX_PROVIDERS,
    ports::{PromptKind, PromptReply, PromptRequest, PromptResponder},
    use_cases::{decrypt_with_entry, find_entry, sign_with_entry},
    ProviderConfig,
};

#[derive(Parser, Debug)]
#[command(name = "tokenstore")]
#[command(about = "Key stores on PKCS#11 tokens", version)]
pub struct Cli {
    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    /// JSON configuration (flat provider_NN_* map)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// PKCS#11 module to load, in addition to the configuration
    #[arg(long = "module", global = true)]
    pub modules: Vec<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List tokens present in the loaded modules
    Stores,

    /// List the entries of one token
    Entries {
        /// Store number as printed by `stores`
        store: u32,
    },

    /// Sign data provided via stdin, printing the signature in hex
    Sign {
        /// Serialized reference, entry id or display name
        #[arg(long)]
        entry: String,

        #[arg(long, default_value = "sha256")]
        algorithm: SignatureArg,
    },

    /// Decrypt data provided via stdin, writing the plaintext to stdout
    Decrypt {
        /// Serialized reference, entry id or display name
        #[arg(long)]
        entry: String,

        #[arg(long, default_value = "pkcs1v15")]
        algorithm: EncryptionArg,
    },

    /// Print the public key of an entry as PEM
    PublicKey {
        /// Serialized reference, entry id or display name
        #[arg(long)]
        entry: String,
    },

    /// Print the configuration template
    ConfigTemplate,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SignatureArg {
    Sha1,
    Sha256,
    Md5,
    Md2,
    Raw,
}

impl From<SignatureArg> for SignatureAlgorithm {
    fn from(arg: SignatureArg) -> Self {
        match arg {
            SignatureArg::Sha1 => SignatureAlgorithm::Emsa3Sha1,
            SignatureArg::Sha256 => SignatureAlgorithm::Emsa3Sha256,
            SignatureArg::Md5 => SignatureAlgorithm::Emsa3Md5,
            SignatureArg::Md2 => SignatureAlgorithm::Emsa3Md2,
            SignatureArg::Raw => SignatureAlgorithm::Emsa3Raw,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum EncryptionArg {
    Pkcs1v15,
    Oaep,
}

impl From<EncryptionArg> for EncryptionAlgorithm {
    fn from(arg: EncryptionArg) -> Self {
        match arg {
            EncryptionArg::Pkcs1v15 => EncryptionAlgorithm::Pkcs1v15,
            EncryptionArg::Oaep => EncryptionAlgorithm::Pkcs1Oaep,
        }
    }
}

/// Terminal mode with input echo off; the newline still echoes.
fn without_echo(mut mode: libc::termios) -> libc::termios {
    mode.c_lflag &= !libc::ECHO;
    mode.c_lflag |= libc::ECHONL;
    mode
}

/// Keeps echo off on a terminal until dropped
struct EchoOff {
    fd: RawFd,
    saved: libc::termios,
}

impl EchoOff {
    fn new(tty: &File) -> io::Result<Self> {
        let fd = tty.as_raw_fd();
        let mut saved = MaybeUninit::<libc::termios>::uninit();
        // SAFETY: `fd` is open for the lifetime of `tty` and `saved` is a
        // valid out pointer.
        if unsafe { libc::tcgetattr(fd, saved.as_mut_ptr()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: initialized by the successful `tcgetattr` above.
        let saved = unsafe { saved.assume_init() };
        // SAFETY: `fd` is open and the mode is a valid termios.
        if unsafe { libc::tcsetattr(fd, libc::TCSAFLUSH, &without_echo(saved)) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { fd, saved })
    }
}

impl Drop for EchoOff {
    fn drop(&mut self) {
        // SAFETY: the descriptor outlives the guard; see `read_line`.
        if unsafe { libc::tcsetattr(self.fd, libc::TCSAFLUSH, &self.saved) } != 0 {
            error!("Cannot restore terminal echo: {}", io::Error::last_os_error());
        }
    }
}

/// Answers prompts on the controlling terminal
///
/// `TOKENSTORE_PIN` answers PIN prompts without asking.
struct TerminalPrompter;

impl TerminalPrompter {
    fn read_line(question: &str, echo: bool) -> Option<String> {
        eprint!("{question}");
        io::stderr().flush().ok()?;
        let tty = File::open("/dev/tty").ok()?;
        let _echo_off = if echo {
            None
        } else {
            match EchoOff::new(&tty) {
                Ok(guard) => Some(guard),
                Err(e) => {
                    error!("Cannot turn terminal echo off: {}", e);
                    return None;
                }
            }
        };
        let mut line = String::new();
        match BufReader::new(&tty).read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
        }
    }
}

impl PromptResponder for TerminalPrompter {
    fn ask(&self, request: PromptRequest, reply: PromptReply) {
        match request.kind {
            PromptKind::Token => {
                let question = format!("Insert token '{}' and press Enter: ", request.store_name);
                match Self::read_line(&question, true) {
                    Some(_) => reply.accept(),
                    None => reply.cancel(),
                }
            }
            PromptKind::Pin => {
                let pin = std::env::var("TOKENSTORE_PIN").ok().or_else(|| {
                    Self::read_line(&format!("PIN for '{}': ", request.store_name), false)
                });
                match pin.map(|pin| Pin::from_str(&pin)) {
                    Some(Ok(pin)) => reply.accept_with_pin(pin),
                    Some(Err(e)) => {
                        error!("Invalid PIN: {}", e);
                        reply.cancel();
                    }
                    None => reply.cancel(),
                }
            }
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<ProviderConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read {}", path.display()))?;
            ProviderConfig::from_json_str(&json).context("invalid configuration")?
        }
        None => ProviderConfig::default(),
    };

    let mut free = config
        .modules
        .iter_mut()
        .filter(|m| !m.enabled && m.library.as_os_str().is_empty());
    for library in &cli.modules {
        let Some(module) = free.next() else {
            bail!("at most {} modules can be loaded", MAX_PROVIDERS);
        };
        *module = ModuleConfig::for_library(module.index, library.clone());
    }

    Ok(config)
}

fn read_stdin() -> anyhow::Result<Vec<u8>> {
    let mut data = Vec::new();
    io::stdin().read_to_end(&mut data)?;
    Ok(data)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .with_writer(io::stderr)
        .init();

    if let Commands::ConfigTemplate = cli.command {
        let template = serde_json::Value::Object(ProviderConfig::default_map());
        println!("{}", serde_json::to_string_pretty(&template)?);
        return Ok(());
    }

    let config = load_config(&cli)?;
    let (provider, mut events) = tokenstore::open_provider(&config, Arc::new(TerminalPrompter))
        .context("failed to open provider")?;
    for diagnostic in events.drain_diagnostics() {
        error!("{}", diagnostic);
    }
    debug!(providers = ?provider.loaded_providers(), "loaded");

    match cli.command {
        Commands::Stores => {
            for store in provider.key_stores() {
                let store_id = provider.store_id(store.id).unwrap_or_default();
                println!("{}\t{}\t{}", store.id, store.token.label, store_id);
            }
        }

        Commands::Entries { store } => {
            for entry in provider.entries(store) {
                let kind = match entry.kind {
                    RecordKind::KeyBundle { .. } => "key",
                    RecordKind::Certificate(_) => "cert",
                };
                println!(
                    "{}\t{}\t{}\t{}",
                    entry.id, kind, entry.display_name, entry.serialized
                );
            }
        }

        Commands::Sign { entry, algorithm } => {
            let data = read_stdin()?;
            let mut record = find_entry(&provider, &entry)?;
            let signature = sign_with_entry(&mut record, algorithm.into(), &data)
                .context("failed to sign")?;
            println!("{}", hex::encode(signature));
        }

        Commands::Decrypt { entry, algorithm } => {
            let data = read_stdin()?;
            let record = find_entry(&provider, &entry)?;
            let plaintext = decrypt_with_entry(&record, algorithm.into(), &data)
                .context("failed to decrypt")?;
            io::stdout().write_all(&plaintext)?;
        }

        Commands::PublicKey { entry } => {
            let record = find_entry(&provider, &entry)?;
            let Some(key) = record.key() else {
                bail!("entry '{}' has no private key", entry);
            };
            print!("{}", key.public_key_pem()?);
        }

        Commands::ConfigTemplate => {}
    }

    for diagnostic in events.drain_diagnostics() {
        error!("{}", diagnostic);
    }

    Ok(())
}
