use clap::{Parser, Subcommand, ValueEnum};
use eyre::Context as _;
use hwkeyring::{
    config::KeyringConfig,
    device::{emulator::EmulatorDevice, ConnectSettings},
    paths::KeyringPaths,
    store::{ConfigStore, SnapshotStore},
    KeyringController, TransportKind, TypedDataVersion,
};
use tracing_subscriber::prelude::*;

mod cli_output;

const MNEMONIC_ENV: &str = "HWKEYRING_EMULATOR_MNEMONIC";

#[derive(Parser, Debug)]
#[command(name = "hwkeyring", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CliTypedDataVersion {
    V3,
    V4,
}

impl From<CliTypedDataVersion> for TypedDataVersion {
    fn from(v: CliTypedDataVersion) -> Self {
        match v {
            CliTypedDataVersion::V3 => Self::V3,
            CliTypedDataVersion::V4 => Self::V4,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print resolved paths (useful for debugging).
    Paths,

    /// Browse derivable accounts one page at a time.
    Accounts {
        #[command(subcommand)]
        page: PageCommand,
    },

    /// Derive accounts and add them to the keyring.
    Add {
        #[arg(long, default_value_t = 1)]
        count: u32,
        /// First account index to derive (defaults to 0).
        #[arg(long)]
        from: Option<u32>,
    },

    /// List the accounts held by the keyring.
    List,

    /// Remove one account.
    Remove { address: String },

    /// Sign a message with `personal_sign` semantics.
    SignMessage { address: String, message: String },

    /// Sign EIP-712 typed data read from a JSON file.
    SignTypedData {
        address: String,
        file: std::path::PathBuf,
        #[arg(long, value_enum, default_value_t = CliTypedDataVersion::V4)]
        version: CliTypedDataVersion,
    },

    /// Drop every account and reset the paging cursor.
    Forget,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum PageCommand {
    First,
    Next,
    Previous,
}

fn init_logging(paths: &KeyringPaths) -> tracing_appender::non_blocking::WorkerGuard {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let file_name = paths
        .log_file
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("hwkeyring.log.jsonl");
    let file_appender = tracing_appender::rolling::never(&paths.data_dir, file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_filter(env_filter.clone());
    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

fn emulator_from_env() -> eyre::Result<EmulatorDevice> {
    let phrase = zeroize::Zeroizing::new(
        std::env::var(MNEMONIC_ENV).with_context(|| format!("{MNEMONIC_ENV} is not set"))?,
    );
    EmulatorDevice::new(&phrase)
}

async fn open_keyring(
    cfg: &KeyringConfig,
    snapshots: &SnapshotStore,
) -> eyre::Result<KeyringController<EmulatorDevice>> {
    if cfg.transport != TransportKind::Emulator {
        eyre::bail!(
            "transport {:?} is not available in this build; set transport = \"emulator\"",
            cfg.transport
        );
    }
    let mut keyring = KeyringController::with_page_size(emulator_from_env()?, cfg.page_size);
    if snapshots.exists() {
        keyring.deserialize(snapshots.load()?)?;
    } else {
        keyring.set_base_path(cfg.base_path.clone());
    }
    if cfg.passphrase_enabled {
        keyring.enable_passphrase_support();
    }
    keyring
        .init(&ConnectSettings {
            env: cfg.transport,
            ..ConnectSettings::default()
        })
        .await
        .context("connect device")?;
    Ok(keyring)
}

async fn run(cmd: Command, paths: &KeyringPaths) -> eyre::Result<()> {
    if let Command::Paths = cmd {
        return cli_output::print_json(&serde_json::json!({
          "config_dir": paths.config_dir,
          "data_dir": paths.data_dir,
          "log_file": paths.log_file,
        }));
    }

    let cfg = ConfigStore::new(paths).load_or_init_default()?;
    let snapshots = SnapshotStore::new(paths);
    let mut keyring = open_keyring(&cfg, &snapshots).await?;

    let result = match cmd {
        Command::Paths => Ok(()),
        Command::Accounts { page } => {
            let entries = match page {
                PageCommand::First => keyring.first_page().await,
                PageCommand::Next => keyring.next_page().await,
                PageCommand::Previous => keyring.previous_page().await,
            }
            .context("load page")?;
            snapshots.save(&keyring.serialize())?;
            cli_output::print_json(&serde_json::json!({
                "page": keyring.page(),
                "accounts": entries,
            }))
        }
        Command::Add { count, from } => {
            keyring.set_unlock_index(from.unwrap_or(0));
            let added = keyring.add_accounts(count).await.context("add accounts")?;
            snapshots.save(&keyring.serialize())?;
            if added.is_empty() {
                cli_output::print_notice("hwkeyring: no new accounts");
            }
            cli_output::print_json(&added)
        }
        Command::List => cli_output::print_json(keyring.accounts()),
        Command::Remove { address } => {
            keyring.remove_account(&address)?;
            snapshots.save(&keyring.serialize())?;
            cli_output::print_json(keyring.accounts())
        }
        Command::SignMessage { address, message } => {
            let sig = keyring
                .sign_message(&address, &message)
                .await
                .context("sign message")?;
            cli_output::print_json(&serde_json::json!({ "signature": sig }))
        }
        Command::SignTypedData {
            address,
            file,
            version,
        } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("read {}", file.display()))?;
            let data: serde_json::Value = serde_json::from_str(&raw)
                .with_context(|| format!("parse {}", file.display()))?;
            let sig = keyring
                .sign_typed_data(&address, &data, version.into())
                .await
                .context("sign typed data")?;
            cli_output::print_json(&serde_json::json!({ "signature": sig }))
        }
        Command::Forget => {
            keyring.forget_device();
            snapshots.save(&keyring.serialize())?;
            cli_output::print_notice("hwkeyring: all accounts forgotten");
            Ok(())
        }
    };

    keyring.destroy().await;
    result
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let paths = KeyringPaths::discover()?;
    paths.ensure_private_dirs()?;
    let _log_guard = init_logging(&paths);

    run(cli.cmd, &paths).await
}
