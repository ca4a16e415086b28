use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand};
use swap_limits::core::CryptoCurrency;
use swap_limits::core::log::init_logging;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct LimitsCommand {
    /// Account identifier linked to an account-level quota
    #[arg(long)]
    account_id: Option<String>,

    /// Active NIM address
    #[arg(long)]
    nim_address: Option<String>,

    /// BTC address to query
    #[arg(long)]
    btc_address: Option<String>,

    /// Additional NIM address of the account, may be repeated
    #[arg(long = "nim-account-address")]
    nim_addresses: Vec<String>,

    /// Additional BTC address of the account, may be repeated
    #[arg(long = "btc-account-address")]
    btc_addresses: Vec<String>,

    /// Active currency (NIM or BTC)
    #[arg(long)]
    currency: Option<CryptoCurrency>,

    /// Include the first-use EUR allowance
    #[arg(long)]
    fiat_to_crypto: bool,

    /// Print limits as JSON
    #[arg(long)]
    json: bool,

    /// Keep running and refresh rates every N seconds
    #[arg(long, value_name = "SECONDS")]
    watch: Option<u64>,
}

impl From<LimitsCommand> for swap_limits::LimitsArgs {
    fn from(cmd: LimitsCommand) -> Self {
        swap_limits::LimitsArgs {
            account_id: cmd.account_id,
            nim_address: cmd.nim_address,
            btc_address: cmd.btc_address,
            nim_addresses: cmd.nim_addresses,
            btc_addresses: cmd.btc_addresses,
            currency: cmd.currency,
            fiat_to_crypto: cmd.fiat_to_crypto,
            json: cmd.json,
            watch: cmd.watch,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Display current, monthly and remaining swap limits
    Limits(LimitsCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => swap_limits::cli::setup::setup(),
        Some(Commands::Limits(cmd)) => {
            swap_limits::run_command(
                swap_limits::AppCommand::Limits(cmd.into()),
                cli.config_path.as_deref(),
            )
            .await
        }
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
