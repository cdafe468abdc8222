// src/main.rs
use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use ethers::types::U256;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use split_sponsor::config::{PaymasterSettings, Settings, SplitClient};
use split_sponsor::distribution::DistributionRequest;
use split_sponsor::encoding::parse_address;
use split_sponsor::split::{Recipient, SplitConfig, SplitParams};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(long, env = "OPERATOR_PRIVATE_KEY", hide_env_values = true)]
    operator_key: String,

    #[clap(long, env = "RPC_URL")]
    rpc_url: String,

    /// Leave unset to pay for gas from the operator account.
    #[clap(long, env = "PIMLICO_API_KEY", hide_env_values = true)]
    paymaster_api_key: Option<String>,

    #[clap(long, env = "SPONSORSHIP_POLICY_ID")]
    sponsorship_policy_id: Option<String>,

    #[clap(long, env = "BUNDLER_URL")]
    bundler_url: Option<String>,

    #[clap(short, long)]
    verbose: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Deploy a push split
    Create {
        #[clap(long)]
        chain_id: u64,

        /// `ADDRESS:PERCENT`, repeatable
        #[clap(long = "recipient", required = true)]
        recipients: Vec<String>,

        #[clap(long)]
        salt: Option<String>,

        #[clap(long, default_value_t = 0.0)]
        distributor_fee: f64,
    },
    /// Distribute a split's token balance to its recipients
    Distribute {
        #[clap(long)]
        chain_id: u64,

        #[clap(long)]
        split: String,

        #[clap(long)]
        token: String,

        /// `ADDRESS:ALLOCATION` as stored on chain, repeatable
        #[clap(long = "recipient", required = true)]
        recipients: Vec<String>,

        #[clap(long, default_value_t = 0)]
        incentive: u16,
    },
}

impl Command {
    fn chain_id(&self) -> u64 {
        match self {
            Command::Create { chain_id, .. } | Command::Distribute { chain_id, .. } => *chain_id,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let chain_id = args.command.chain_id();
    let mut settings = Settings::new(args.operator_key)?.with_rpc_url(chain_id, args.rpc_url);
    if let Some(api_key) = args.paymaster_api_key {
        settings = settings.with_paymaster(PaymasterSettings {
            api_key,
            sponsorship_policy_id: args.sponsorship_policy_id,
            bundler_url: args.bundler_url,
        });
    }
    let client = SplitClient::connect(&settings, chain_id)?;

    match args.command {
        Command::Create {
            recipients,
            salt,
            distributor_fee,
            ..
        } => {
            let recipients = recipients
                .iter()
                .map(|r| {
                    let (address, percent) = split_pair(r)?;
                    Ok(Recipient {
                        address: address.to_string(),
                        percent_allocation: percent
                            .parse()
                            .with_context(|| format!("invalid percentage in {r}"))?,
                    })
                })
                .collect::<anyhow::Result<Vec<_>>>()?;
            let config = SplitConfig {
                recipients,
                salt,
                distributor_fee_percent: distributor_fee,
            };

            let result = client.creation.create(&config).await?;
            if result.already_existed {
                info!("Split already exists at {:?}", result.split_address);
            } else {
                info!(
                    "Split created at {:?} (tx {:?}, sponsored: {})",
                    result.split_address, result.transaction_hash, result.sponsored
                );
            }
        }
        Command::Distribute {
            split,
            token,
            recipients,
            incentive,
            ..
        } => {
            let mut addresses = Vec::with_capacity(recipients.len());
            let mut allocations = Vec::with_capacity(recipients.len());
            for r in &recipients {
                let (address, allocation) = split_pair(r)?;
                addresses.push(parse_address(address)?);
                allocations.push(
                    U256::from_dec_str(allocation)
                        .with_context(|| format!("invalid allocation in {r}"))?,
                );
            }
            let request = DistributionRequest {
                split_address: parse_address(&split)?,
                params: SplitParams::new(addresses, allocations, incentive),
                token: parse_address(&token)?,
            };

            let result = client.distribution.distribute(&request).await?;
            info!(
                "Distribution confirmed in tx {:?} (sponsored: {})",
                result.transaction_hash, result.sponsored
            );
            for transfer in &result.transfers {
                info!("  {:?} <- {}", transfer.to, transfer.value_formatted);
            }
        }
    }

    Ok(())
}

fn split_pair(value: &str) -> anyhow::Result<(&str, &str)> {
    value
        .rsplit_once(':')
        .filter(|(address, amount)| !address.is_empty() && !amount.is_empty())
        .ok_or_else(|| anyhow!("expected ADDRESS:AMOUNT, got {value}"))
}
