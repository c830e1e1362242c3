use std::{
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::{Parser, Subcommand};
use escrow_core::{
    AccountId, Amount, BlockHeight, CallContext, Escrow, EscrowConfig, EscrowError, EscrowState,
    InMemoryToken, TokenId, TokenLedger, TransferError, Viewer,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

//==================== CLI ====================//

#[derive(Parser)]
#[command(name = "escrow")]
#[command(about = "Governance escrow: custody ledger with balance checkpoints")]
struct Cli {
    /// State file holding the escrow and the simulated token contract
    #[arg(long, global = true, default_value = "escrow-state.json")]
    state: PathBuf,

    /// Log checkpoint writes and query resolution
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a fresh state file
    Init {
        /// JSON file with an `EscrowConfig`; flags below override it
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
        #[arg(long)]
        token_contract: Option<AccountId>,
        #[arg(long)]
        token_id: Option<TokenId>,
        #[arg(long)]
        escrow_address: Option<AccountId>,
        /// Overwrite an existing state file
        #[arg(long)]
        force: bool,
    },
    /// Credit tokens to an account on the simulated token contract
    Mint {
        #[arg(long)]
        to: AccountId,
        #[arg(long)]
        amount: Amount,
    },
    /// Lock tokens into the escrow
    Escrow {
        #[arg(long)]
        sender: AccountId,
        #[arg(long)]
        amount: Amount,
        #[arg(long)]
        level: BlockHeight,
    },
    /// Release escrowed tokens back to the sender
    Release {
        #[arg(long)]
        sender: AccountId,
        #[arg(long)]
        amount: Amount,
        #[arg(long)]
        level: BlockHeight,
    },
    /// Current escrowed balance
    Balance {
        #[arg(long)]
        address: AccountId,
    },
    /// Escrowed balance as of a past level
    PriorBalance {
        #[arg(long)]
        address: AccountId,
        #[arg(long)]
        level: BlockHeight,
        /// Current level of the query (defaults to one past the last executed level)
        #[arg(long)]
        at: Option<BlockHeight>,
    },
    /// List the checkpoints of an account
    Checkpoints {
        #[arg(long)]
        address: AccountId,
    },
    /// Print snapshot metadata and the state root
    State,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Escrow(#[from] EscrowError),
    #[error("token: {0}")]
    Token(#[from] TransferError),
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{}: {source}", path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("{} already exists (use --force to overwrite)", .0.display())]
    AlreadyInitialized(PathBuf),
    #[error("{}: state root mismatch (recorded {recorded}, computed {computed})", path.display())]
    RootMismatch {
        path: PathBuf,
        recorded: String,
        computed: String,
    },
}

//==================== State file ====================//

#[derive(Serialize, Deserialize)]
struct StateFile {
    version: u8,
    state_root: String,
    escrow: EscrowState,
    token: InMemoryToken,
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, CliError> {
    let bytes = fs::read(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| CliError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn load(path: &Path) -> Result<Escrow<InMemoryToken>, CliError> {
    let file: StateFile = read_json(path)?;
    let computed = hex::encode(file.escrow.state_root());
    if computed != file.state_root {
        return Err(CliError::RootMismatch {
            path: path.to_path_buf(),
            recorded: file.state_root,
            computed,
        });
    }
    debug!(path = %path.display(), root = %computed, "state loaded");
    Ok(Escrow::new(file.escrow, file.token)?)
}

fn save(path: &Path, escrow: Escrow<InMemoryToken>) -> Result<(), CliError> {
    let (state, token) = escrow.into_parts();
    let file = StateFile {
        version: 1,
        state_root: hex::encode(state.state_root()),
        escrow: state,
        token,
    };
    let json = serde_json::to_vec_pretty(&file).map_err(|source| CliError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| CliError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::write(path, json).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), "state saved");
    Ok(())
}

//==================== Commands ====================//

fn init_cmd(
    path: &Path,
    config: Option<PathBuf>,
    token_contract: Option<AccountId>,
    token_id: Option<TokenId>,
    escrow_address: Option<AccountId>,
    force: bool,
) -> Result<(), CliError> {
    if path.exists() && !force {
        return Err(CliError::AlreadyInitialized(path.to_path_buf()));
    }

    let mut config = match config {
        Some(file) => read_json::<EscrowConfig>(&file)?,
        None => EscrowConfig::default(),
    };
    if let Some(token_contract) = token_contract {
        config.token_contract = token_contract;
    }
    if let Some(token_id) = token_id {
        config.token_id = token_id;
    }
    if let Some(escrow_address) = escrow_address {
        config.escrow_address = escrow_address;
    }

    let token = InMemoryToken::new(config.token_contract.clone(), vec![config.token_id]);
    info!(
        escrow = %config.escrow_address,
        token = %config.token_contract,
        token_id = config.token_id,
        "initialized escrow"
    );
    save(path, Escrow::new(EscrowState::new(config), token)?)?;
    println!("Initialized → {}", path.display());
    Ok(())
}

/// Historical balance rendered as a JSON line.
fn prior_balance_cmd(
    path: &Path,
    address: &AccountId,
    level: BlockHeight,
    at: Option<BlockHeight>,
) -> Result<String, CliError> {
    let escrow = load(path)?;
    let current = at.unwrap_or_else(|| escrow.state().meta.level.saturating_add(1));
    let mut viewer = Viewer::new();
    escrow.get_prior_balance(&CallContext::new("cli", current), address, level, &mut viewer)?;
    serde_json::to_string(&viewer.last()).map_err(|source| CliError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn run(cli: Cli) -> Result<(), CliError> {
    let path = cli.state.as_path();
    match cli.command {
        Commands::Init {
            config,
            token_contract,
            token_id,
            escrow_address,
            force,
        } => init_cmd(path, config, token_contract, token_id, escrow_address, force),
        Commands::Mint { to, amount } => {
            let mut escrow = load(path)?;
            let token_id = escrow.state().config.token_id;
            escrow.token_mut().mint(&to, token_id, amount)?;
            println!(
                "{to}: {} (token {token_id})",
                escrow.token().balance_of(&to, token_id)
            );
            save(path, escrow)
        }
        Commands::Escrow {
            sender,
            amount,
            level,
        } => {
            let mut escrow = load(path)?;
            escrow.escrow(&CallContext::new(sender.clone(), level), amount)?;
            println!("{sender}: escrowed {amount} at level {level}");
            save(path, escrow)
        }
        Commands::Release {
            sender,
            amount,
            level,
        } => {
            let mut escrow = load(path)?;
            escrow.release(&CallContext::new(sender.clone(), level), amount)?;
            println!("{sender}: released {amount} at level {level}");
            save(path, escrow)
        }
        Commands::Balance { address } => {
            let mut escrow = load(path)?;
            println!("{}", escrow.get_balance(&address));
            save(path, escrow)
        }
        Commands::PriorBalance { address, level, at } => {
            println!("{}", prior_balance_cmd(path, &address, level, at)?);
            Ok(())
        }
        Commands::Checkpoints { address } => {
            let escrow = load(path)?;
            let history = escrow.state().checkpoints().history(&address);
            println!("{address}: {} checkpoint(s)", history.len());
            for (index, checkpoint) in history.iter().enumerate() {
                println!(
                    "  #{index:<4} from_block={:<8} balance={}",
                    checkpoint.from_block, checkpoint.balance
                );
            }
            Ok(())
        }
        Commands::State => {
            let escrow = load(path)?;
            let snapshot = escrow.state().snapshot();
            let config = &escrow.state().config;
            println!("escrow:      {}", config.escrow_address);
            println!(
                "token:       {} (id {})",
                escrow.token().contract_address(),
                config.token_id
            );
            println!("level:       {}", snapshot.meta.level);
            println!("operations:  {}", snapshot.meta.operations);
            println!("accounts:    {}", snapshot.balances.len());
            println!("state root:  {}", snapshot.state_root_hex());
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "info,escrow_core=debug,escrow=debug"
    } else {
        "warn,escrow_core=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Escrow(err)) => {
            eprintln!("error[{}]: {err}", err.code());
            ExitCode::from(1)
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(2)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use escrow_core::PriorBalance;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("escrow-cli-{}-{name}.json", std::process::id()))
    }

    #[test]
    fn state_file_round_trips_and_detects_tampering() {
        let path = scratch("roundtrip");
        let mut token = InMemoryToken::new("token", vec![0]);
        token.mint(&"alice".into(), 0, 100).unwrap();
        let mut escrow = Escrow::new(EscrowState::new(EscrowConfig::default()), token).unwrap();
        escrow.escrow(&CallContext::new("alice", 3), 60).unwrap();
        let root = escrow.state().state_root();
        save(&path, escrow).unwrap();

        let loaded = load(&path).unwrap();
        assert_eq!(loaded.state().state_root(), root);
        assert_eq!(loaded.state().balance_of(&"alice".into()), 60);
        assert_eq!(loaded.token().balance_of(&"alice".into(), 0), 40);

        let mut file: serde_json::Value = read_json(&path).unwrap();
        file["state_root"] = serde_json::Value::String(hex::encode([0u8; 32]));
        fs::write(&path, serde_json::to_vec(&file).unwrap()).unwrap();
        assert!(matches!(load(&path), Err(CliError::RootMismatch { .. })));

        fs::remove_file(&path).ok();
    }

    #[test]
    fn prior_balance_prints_delivered_view() {
        let path = scratch("prior");
        let mut token = InMemoryToken::new("token", vec![0]);
        token.mint(&"alice".into(), 0, 100).unwrap();
        let mut escrow = Escrow::new(EscrowState::new(EscrowConfig::default()), token).unwrap();
        escrow.escrow(&CallContext::new("alice", 2), 70).unwrap();
        save(&path, escrow).unwrap();

        let line = prior_balance_cmd(&path, &"alice".into(), 2, None).unwrap();
        let view: PriorBalance = serde_json::from_str(&line).unwrap();
        assert_eq!(view.result, 70);
        let before_first = prior_balance_cmd(&path, &"alice".into(), 1, None).unwrap();
        assert_eq!(
            serde_json::from_str::<PriorBalance>(&before_first).unwrap(),
            PriorBalance {
                address: "alice".into(),
                level: 1,
                result: 0,
            }
        );
        assert!(matches!(
            prior_balance_cmd(&path, &"alice".into(), 3, None),
            Err(CliError::Escrow(EscrowError::HeightNotFinalized { .. }))
        ));

        fs::remove_file(&path).ok();
    }

    #[test]
    fn state_file_with_foreign_token_is_rejected() {
        let path = scratch("foreign");
        init_cmd(&path, None, None, None, None, false).unwrap();
        let mut file: serde_json::Value = read_json(&path).unwrap();
        file["escrow"]["config"]["token_contract"] = serde_json::Value::String("fa2".into());
        fs::write(&path, serde_json::to_vec(&file).unwrap()).unwrap();

        let err = load(&path).err().unwrap();
        assert!(matches!(
            err,
            CliError::Escrow(EscrowError::TokenMismatch { .. })
        ));

        fs::remove_file(&path).ok();
    }

    #[test]
    fn init_refuses_to_overwrite_without_force() {
        let path = scratch("init");
        init_cmd(&path, None, Some("fa2".into()), Some(3), None, false).unwrap();
        assert!(matches!(
            init_cmd(&path, None, None, None, None, false),
            Err(CliError::AlreadyInitialized(_))
        ));

        let escrow = load(&path).unwrap();
        assert_eq!(escrow.state().config.token_contract, "fa2");
        assert_eq!(escrow.state().config.token_id, 3);
        assert_eq!(escrow.token().contract_address(), "fa2");

        fs::remove_file(&path).ok();
    }
}
