use base64::Engine;
use clap::{Parser, Subcommand};
use serial_signer::{
    decode_base64_transaction, introspect, validate_signature, AutoPress, Config, FileLine,
    FileStorage, InputLine, KeyStore, LogFeedback, ProtocolEngine, Unplugged,
};
use std::io;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "serial-signer")]
#[command(about = "Serial-attached Ed25519 signer", long_about = None)]
struct Cli {
    /// Increase log verbosity (logs go to stderr).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// JSON config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Key storage directory (overrides the config file).
    #[arg(short, long, global = true)]
    storage: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the line protocol on stdin/stdout
    Run {
        /// File whose contents read `0` while the button is pressed
        #[arg(long, conflicts_with = "auto_confirm")]
        button_file: Option<PathBuf>,
        /// Confirm every signing request without a button
        #[arg(long)]
        auto_confirm: bool,
        /// Button wait in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Require a TOTP unlock before signing
        #[arg(long)]
        twofa: bool,
    },
    /// Load or generate the device key and print its public key
    Keygen,
    /// Verify a signature against the stored public key
    Verify {
        /// Base64 of the signed bytes
        #[arg(short, long)]
        message: String,
        /// Base64 signature
        #[arg(short = 'g', long)]
        signature: String,
    },
    /// Decode and summarize a base64 transaction
    Inspect {
        transaction: String,
    },
    /// Erase the stored key material
    Wipe,
}

fn init_logging(verbose: u8) -> Result<(), Box<dyn std::error::Error>> {
    let level = match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(dir) = cli.storage {
        config.storage_dir = dir;
    }

    match cli.command {
        Commands::Run {
            button_file,
            auto_confirm,
            timeout_ms,
            twofa,
        } => {
            if let Some(ms) = timeout_ms {
                config.confirm_timeout_ms = ms;
            }
            config.twofa |= twofa;
            config.validate()?;

            let input: Box<dyn InputLine> = match (button_file, auto_confirm) {
                (Some(path), _) => Box::new(FileLine::new(path)),
                (None, true) => Box::new(AutoPress::default()),
                (None, false) => Box::new(Unplugged),
            };
            let storage = FileStorage::open(&config.storage_dir)?;
            info!(storage = %storage.root().display(), "booting");

            let mut engine =
                ProtocolEngine::boot(Box::new(storage), input, Box::new(LogFeedback), config);
            let stdin = io::stdin();
            engine.run(stdin.lock(), io::stdout().lock())?;
        }
        Commands::Keygen => {
            let mut storage = FileStorage::open(&config.storage_dir)?;
            let keys = KeyStore::load_or_create(&mut storage)?;
            println!("{}", keys.public_key_base58());
        }
        Commands::Verify { message, signature } => {
            let storage = FileStorage::open(&config.storage_dir)?;
            let keys = KeyStore::load_existing(&storage)?.ok_or("no key stored; run keygen first")?;
            let message = base64::engine::general_purpose::STANDARD.decode(message.trim())?;
            validate_signature(&keys.public_key_base58(), &message, &signature)?;
            println!("Signature is valid!");
        }
        Commands::Inspect { transaction } => {
            let tx = decode_base64_transaction(&transaction)?;
            let expected = FileStorage::open(&config.storage_dir)
                .and_then(|storage| KeyStore::load_existing(&storage))
                .ok()
                .flatten()
                .map(|keys| keys.public_key());
            print!("{}", introspect(&tx, expected.as_ref()));
        }
        Commands::Wipe => {
            let mut storage = FileStorage::open(&config.storage_dir)?;
            KeyStore::wipe(&mut storage)?;
            println!("Key material erased.");
        }
    }

    Ok(())
}
