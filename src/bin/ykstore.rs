use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use p256::pkcs8::{DecodePrivateKey, EncodePublicKey, LineEnding};
use p256::SecretKey;
use std::io::{self, Read};
use std::path::PathBuf;

use ykstore::api::{Credential, HardwareSlot, KeyMode, PinPolicy, Role, SlotId, TouchPolicy};
use ykstore::logic::public_key;
use ykstore::{KeyStore, Pkcs11Session, Pkcs11Token, StoreConfig};

#[derive(Parser, Debug)]
#[command(name = "ykstore")]
#[command(about = "Role-tagged P-256 signing keys on a YubiKey", version)]
pub struct Cli {
    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    /// Path to libykcs11; searched in the usual install locations if omitted
    #[arg(long, global = true)]
    pub library: Option<PathBuf>,

    /// PIN requirement for keys imported by this run
    #[arg(long, global = true, default_value = "once")]
    pub pin_mode: PinModeArg,

    /// Also require touch to sign with imported keys
    #[arg(long, global = true)]
    pub touch: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List stored keys as "fingerprint slot role"
    List,

    /// Print the slot the next import would use
    NextSlot,

    /// Import a PEM P-256 private key (SEC1 or PKCS#8) read from stdin
    Import {
        /// Role recorded with the key (root, targets, snapshot, timestamp)
        #[arg(long)]
        role: Role,

        /// Slot to write to (0-3); the next free slot if omitted
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..4))]
        slot: Option<u8>,

        /// Management key in hex (48 hex chars). Uses the factory default if not provided
        #[arg(long)]
        so_pin: Option<String>,
    },

    /// Print the public key (PEM) and role stored in a slot
    PublicKey {
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..4))]
        slot: u8,
    },

    /// Sign data provided via stdin, print the hex signature
    Sign {
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..4))]
        slot: u8,

        /// User PIN. Uses the factory default if not provided
        #[arg(long)]
        pin: Option<String>,
    },

    /// Remove the key in a slot
    Remove {
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..4))]
        slot: u8,

        /// Management key in hex (48 hex chars). Uses the factory default if not provided
        #[arg(long)]
        so_pin: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PinModeArg {
    None,
    Once,
    Always,
}

impl From<PinModeArg> for PinPolicy {
    fn from(arg: PinModeArg) -> Self {
        match arg {
            PinModeArg::None => PinPolicy::Never,
            PinModeArg::Once => PinPolicy::Once,
            PinModeArg::Always => PinPolicy::Always,
        }
    }
}

impl Cli {
    fn config(&self) -> StoreConfig {
        let touch = if self.touch {
            TouchPolicy::Always
        } else {
            TouchPolicy::Never
        };
        let config = StoreConfig::default()
            .with_key_mode(KeyMode::from_policies(self.pin_mode.into(), touch));
        match &self.library {
            Some(path) => config.with_library(path),
            None => config,
        }
    }
}

fn credential(given: Option<String>, default: fn() -> Credential) -> anyhow::Result<Credential> {
    match given {
        Some(secret) => Credential::new(secret).context("invalid credential"),
        None => Ok(default()),
    }
}

fn read_private_key() -> anyhow::Result<SecretKey> {
    let mut pem = String::new();
    io::stdin().read_to_string(&mut pem)?;
    SecretKey::from_pkcs8_pem(&pem)
        .or_else(|_| SecretKey::from_sec1_pem(&pem))
        .map_err(|e| anyhow!("invalid P-256 private key: {}", e))
}

/// Listed key in `slot`, so that role and fingerprint are known.
fn stored_slot(
    store: &KeyStore<Pkcs11Token>,
    session: Pkcs11Session,
    slot: u8,
) -> anyhow::Result<HardwareSlot> {
    let slot_id = SlotId::new(slot)?;
    store
        .list_keys(session)?
        .into_values()
        .find(|listed| listed.slot_id == slot_id)
        .ok_or_else(|| anyhow!("no key in slot {}", slot_id))
}

fn run(
    store: &KeyStore<Pkcs11Token>,
    session: Pkcs11Session,
    command: Commands,
) -> anyhow::Result<()> {
    match command {
        Commands::List => {
            for (fingerprint, slot) in store.list_keys(session)? {
                println!("{} {} {}", fingerprint, slot.slot_id, slot.role);
            }
        }

        Commands::NextSlot => {
            println!("{}", store.find_empty_slot(session)?);
        }

        Commands::Import { role, slot, so_pin } => {
            let key = read_private_key()?;
            let so = credential(so_pin, Credential::default_security_officer)?;

            let placed = match slot {
                Some(slot) => {
                    let target = HardwareSlot::unassigned(role, SlotId::new(slot)?);
                    store
                        .provision_key(session, &key, &target, &so, role)
                        .context("failed to import key into YubiKey")?;
                    let fingerprint = public_key::fingerprint(&key.public_key())?;
                    HardwareSlot::new(role, target.slot_id, fingerprint)
                }
                None => store
                    .allocate_and_provision(session, &key, &so, role)
                    .context("failed to import key into YubiKey")?,
            };
            println!("{} {}", placed.key_fingerprint, placed.slot_id);
        }

        Commands::PublicKey { slot } => {
            let target = stored_slot(store, session, slot)?;
            let (key, role) = store.retrieve_key(session, &target)?;
            print!("{}", key.to_public_key_pem(LineEnding::LF)?);
            println!("role: {}", role);
        }

        Commands::Sign { slot, pin } => {
            let target = stored_slot(store, session, slot)?;
            let user = credential(pin, Credential::default_user)?;

            let mut data = Vec::new();
            io::stdin().read_to_end(&mut data)?;
            let signature = store
                .sign(session, &target, &user, &data)
                .context("failed to sign")?;
            println!("{}", hex::encode(signature));
        }

        Commands::Remove { slot, so_pin } => {
            let target = stored_slot(store, session, slot)?;
            let so = credential(so_pin, Credential::default_security_officer)?;
            store.remove_key(session, &target, &so, &target.key_fingerprint)?;
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.config();

    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let store = ykstore::open_store(&config);
    let session = store
        .setup_session()
        .context("failed to open token session")?;

    let result = run(&store, session, cli.command);

    let _ = store.close_session(session);
    let _ = store.cleanup();
    result
}
