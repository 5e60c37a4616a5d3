#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::needless_pass_by_value,
    clippy::too_many_lines,
    clippy::uninlined_format_args
)]

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use clawguard::config::{self, Config};
use clawguard::firewall::FirewallPatch;
use clawguard::settings::{AnalyticsSettingsPatch, GeneralSettingsPatch};
use clawguard::Stores;
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter, Registry};

/// `clawguard` - agent settings and navigation firewall.
#[derive(Parser, Debug)]
#[command(name = "clawguard")]
#[command(version)]
#[command(about = "Manage agent settings and the navigation firewall.", long_about = None)]
struct Cli {
    /// Directory holding config.toml (defaults to ~/.clawguard)
    #[arg(long, global = true)]
    config_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show or change general agent settings
    General {
        #[command(subcommand)]
        general_command: GeneralCommands,
    },

    /// Show or change anonymous analytics opt-in
    Analytics {
        #[command(subcommand)]
        analytics_command: AnalyticsCommands,
    },

    /// Manage the navigation firewall
    #[command(long_about = "\
Manage the navigation firewall.

Domains are normalized before storage: scheme, path, port and case are
dropped, so `HTTPS://Example.COM/x` and `example.com` are the same entry.
Adding a domain to one list removes it from the other. The deny list always
wins over the allow list; an empty allow list admits every host not denied.

Examples:
  clawguard firewall allow docs.rs
  clawguard firewall deny https://ads.example.com
  clawguard firewall check https://shop.example.com/cart")]
    Firewall {
        #[command(subcommand)]
        firewall_command: FirewallCommands,
    },

    /// Manage configuration
    #[command(long_about = "\
Manage clawguard configuration.

Examples:
  clawguard config schema              # print JSON Schema to stdout
  clawguard config schema > schema.json")]
    Config {
        #[command(subcommand)]
        config_command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum GeneralCommands {
    /// Print current general settings
    Show,
    /// Change one or more general settings; out-of-range values are corrected
    Set(GeneralSetArgs),
}

#[derive(Args, Debug)]
struct GeneralSetArgs {
    /// Maximum steps per task (1-50)
    #[arg(long)]
    max_steps: Option<u32>,
    /// Maximum actions per step (1-50)
    #[arg(long)]
    max_actions_per_step: Option<u32>,
    /// Consecutive failures before a task aborts (1-10)
    #[arg(long)]
    max_failures: Option<u32>,
    /// Send page screenshots to the model
    #[arg(long)]
    use_vision: Option<bool>,
    /// Overlay element highlights (requires vision)
    #[arg(long)]
    display_highlights: Option<bool>,
    /// Re-plan every N steps (1-20)
    #[arg(long)]
    planning_interval: Option<u32>,
    /// Minimum wait after page load in ms (250-5000, step 50)
    #[arg(long)]
    min_wait_page_load_ms: Option<u32>,
    /// Offer to replay recorded tasks
    #[arg(long)]
    replay_historical_tasks: Option<bool>,
}

impl From<GeneralSetArgs> for GeneralSettingsPatch {
    fn from(args: GeneralSetArgs) -> Self {
        Self {
            max_steps: args.max_steps,
            max_actions_per_step: args.max_actions_per_step,
            max_failures: args.max_failures,
            use_vision: args.use_vision,
            display_highlights: args.display_highlights,
            planning_interval: args.planning_interval,
            min_wait_page_load_ms: args.min_wait_page_load_ms,
            replay_historical_tasks: args.replay_historical_tasks,
        }
    }
}

#[derive(Subcommand, Debug)]
enum AnalyticsCommands {
    /// Print current analytics settings
    Show,
    /// Opt in to anonymous analytics
    Enable,
    /// Opt out and forget the anonymous id
    Disable,
}

#[derive(Subcommand, Debug)]
enum FirewallCommands {
    /// Print the current policy
    Show,
    /// Turn enforcement on
    Enable,
    /// Turn enforcement off (every URL is admitted)
    Disable,
    /// Add a domain to the allow list
    Allow { domain: String },
    /// Add a domain to the deny list
    Deny { domain: String },
    /// Remove a domain from the allow list
    Unallow { domain: String },
    /// Remove a domain from the deny list
    Undeny { domain: String },
    /// Decide whether a URL may be visited; exits 1 when denied
    Check { url: String },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Dump the full configuration JSON Schema to stdout
    Schema,
}

/// Log filter that starts at [`DEFAULT_LOG_LEVEL`] and switches to the
/// configured level once the config file has been read. `RUST_LOG` wins.
struct LogFilter {
    handle: reload::Handle<EnvFilter, Registry>,
    from_env: bool,
}

impl LogFilter {
    fn layer(from_env: Option<EnvFilter>) -> (reload::Layer<EnvFilter, Registry>, Self) {
        let from_env_set = from_env.is_some();
        let (layer, handle) =
            reload::Layer::new(from_env.unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_LEVEL)));
        (
            layer,
            Self {
                handle,
                from_env: from_env_set,
            },
        )
    }

    fn apply_configured(&self, level: &str) -> Result<()> {
        if self.from_env {
            return Ok(());
        }
        self.handle
            .reload(EnvFilter::new(level))
            .context("Failed to apply configured log level")
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Schema export must stay stdout-only and should not touch the config dir.
    if let Commands::Config {
        config_command: ConfigCommands::Schema,
    } = &cli.command
    {
        let schema = schemars::schema_for!(config::Config);
        print_json(&schema)?;
        return Ok(ExitCode::SUCCESS);
    }

    // Logs go to stderr so stdout stays machine-readable. Installed before
    // config load so load-time warnings reach the terminal.
    let (filter, log_filter) = LogFilter::layer(EnvFilter::try_from_default_env().ok());
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .context("Failed to install tracing subscriber")?;

    let config = match &cli.config_dir {
        Some(dir) => {
            if dir.trim().is_empty() {
                anyhow::bail!("--config-dir cannot be empty");
            }
            let dir = PathBuf::from(shellexpand::tilde(dir.trim()).into_owned());
            Config::load_or_init_in(&dir).await?
        }
        None => Config::load_or_init().await?,
    };

    log_filter.apply_configured(&config.log.level)?;

    let stores = Stores::open(&config)?;

    match cli.command {
        Commands::General { general_command } => match general_command {
            GeneralCommands::Show => print_json(&stores.general.get_record().await?.value)?,
            GeneralCommands::Set(args) => {
                let outcome = stores.general.update_settings(args.into()).await?;
                for correction in &outcome.corrections {
                    eprintln!(
                        "note: {} set to {} ({})",
                        correction.field, correction.applied, correction.reason
                    );
                }
                print_json(&outcome)?;
            }
        },

        Commands::Analytics { analytics_command } => {
            let enabled = match analytics_command {
                AnalyticsCommands::Show => {
                    print_json(&stores.analytics.get_settings().await?)?;
                    return Ok(ExitCode::SUCCESS);
                }
                AnalyticsCommands::Enable => true,
                AnalyticsCommands::Disable => false,
            };
            let outcome = stores
                .analytics
                .update_settings(AnalyticsSettingsPatch {
                    enabled: Some(enabled),
                })
                .await?;
            print_json(&outcome)?;
        }

        Commands::Firewall { firewall_command } => {
            let firewall = &stores.firewall;
            let outcome = match firewall_command {
                FirewallCommands::Show => {
                    print_json(&firewall.get_firewall().await?)?;
                    return Ok(ExitCode::SUCCESS);
                }
                FirewallCommands::Check { url } => {
                    let verdict = firewall.check(&url).await?;
                    print_json(&verdict)?;
                    return Ok(if verdict.is_admitted() {
                        ExitCode::SUCCESS
                    } else {
                        ExitCode::FAILURE
                    });
                }
                FirewallCommands::Enable => {
                    firewall
                        .update_firewall(FirewallPatch {
                            enabled: Some(true),
                        })
                        .await?
                }
                FirewallCommands::Disable => {
                    firewall
                        .update_firewall(FirewallPatch {
                            enabled: Some(false),
                        })
                        .await?
                }
                FirewallCommands::Allow { domain } => firewall.add_to_allow_list(&domain).await?,
                FirewallCommands::Deny { domain } => firewall.add_to_deny_list(&domain).await?,
                FirewallCommands::Unallow { domain } => {
                    firewall.remove_from_allow_list(&domain).await?
                }
                FirewallCommands::Undeny { domain } => {
                    firewall.remove_from_deny_list(&domain).await?
                }
            };
            print_json(&outcome)?;
        }

        // Handled before config load.
        Commands::Config { .. } => {}
    }

    Ok(ExitCode::SUCCESS)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Failed to render JSON")?;
    println!("{rendered}");
    Ok(())
}
