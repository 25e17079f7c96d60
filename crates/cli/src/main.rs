mod commands;
mod confirm;
mod logging;
mod provider;
mod summary;

use std::path::{Path, PathBuf};
use std::process;

use clap::{Args, Parser, Subcommand, ValueEnum};
use foundation_core::{Config, Overrides};

/// Process exit codes shared by every subcommand.
pub(crate) mod exit_codes {
    /// Every phase and every check succeeded.
    pub const SUCCESS: i32 = 0;
    /// A phase failed for at least one target, or a verification check failed.
    pub const FAILURE: i32 = 1;
    /// The configuration or the invocation itself was rejected.
    pub const USAGE: i32 = 2;
}

/// Output format for the end-of-run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Multi-account cloud foundation bootstrap orchestrator.
#[derive(Parser)]
#[command(
    name = "foundation",
    version,
    about = "Multi-account cloud foundation bootstrap orchestrator"
)]
struct Cli {
    /// Path to the project configuration file
    #[arg(
        long,
        global = true,
        env = "FOUNDATION_CONFIG",
        default_value = "foundation.toml"
    )]
    config: PathBuf,

    /// Directory for account maps, backend files, and reports
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// Log every provider call and decision
    #[arg(long, global = true)]
    verbose: bool,

    /// Summary format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or adopt the organization, its units, and one account per environment
    BootstrapOrganization {
        /// Report what would change without changing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Provision identity trust and state backends in every account, then verify
    BootstrapFoundation {
        /// Report what would change without changing anything
        #[arg(long)]
        dry_run: bool,
        /// Do not run the verification checks after provisioning
        #[arg(long)]
        skip_verification: bool,
    },

    /// Tear down what bootstrap-foundation created
    DestroyFoundation(DestroyArgs),

    /// Refresh role permission policies from the current templates
    UpdateRolePolicy {
        /// Environment whose roles to update: an environment name, "management", or "all"
        #[arg(long, default_value = "all")]
        environment: String,
        /// Report the diff without applying it
        #[arg(long)]
        dry_run: bool,
        /// Also compare trust policies and report drift
        #[arg(long)]
        validate_trust: bool,
    },

    /// Run the verification checks against the recorded accounts
    Verify {
        /// Skip the read/write probe against the state stores
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Args)]
pub(crate) struct DestroyArgs {
    /// Report what would be removed without removing anything
    #[arg(long)]
    pub dry_run: bool,
    /// Skip the confirmation prompts
    #[arg(long)]
    pub force: bool,
    /// Only remove state buckets, lock tables, and encryption keys
    #[arg(long, group = "scope")]
    pub backends_only: bool,
    /// Only remove deployment and read-only roles
    #[arg(long, group = "scope")]
    pub roles_only: bool,
    /// Only remove CI identity providers
    #[arg(long, group = "scope")]
    pub oidc_only: bool,
    /// Only remove the central backend in the management account
    #[arg(long, group = "scope")]
    pub central_bucket_only: bool,
    /// Comma-separated environments to limit the teardown to
    #[arg(long, value_delimiter = ',')]
    pub accounts: Vec<String>,
    /// Also close the member accounts (irreversible)
    #[arg(long)]
    pub close_accounts: bool,
    /// Give up emptying a state bucket after this many seconds
    #[arg(long)]
    pub empty_timeout_secs: Option<u64>,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let dry_run = match &cli.command {
        Commands::BootstrapOrganization { dry_run }
        | Commands::BootstrapFoundation { dry_run, .. }
        | Commands::UpdateRolePolicy { dry_run, .. }
        | Commands::Verify { dry_run } => *dry_run,
        Commands::DestroyFoundation(args) => args.dry_run,
    };
    let overrides = Overrides {
        dry_run,
        verbose: cli.verbose,
        output_dir: cli.output_dir.clone(),
    };
    let config = load_config(&cli.config, &overrides, cli.output);

    let code = match cli.command {
        Commands::BootstrapOrganization { .. } => {
            commands::bootstrap::cmd_bootstrap_organization(&config, cli.output)
        }
        Commands::BootstrapFoundation {
            skip_verification, ..
        } => commands::bootstrap::cmd_bootstrap_foundation(&config, skip_verification, cli.output),
        Commands::DestroyFoundation(args) => {
            commands::destroy::cmd_destroy(&config, &args, cli.output)
        }
        Commands::UpdateRolePolicy {
            environment,
            validate_trust,
            ..
        } => commands::policy::cmd_update_role_policy(
            &config,
            &environment,
            validate_trust,
            cli.output,
        ),
        Commands::Verify { .. } => commands::verify::cmd_verify(&config, cli.output),
    };
    process::exit(code);
}

fn load_config(path: &Path, overrides: &Overrides, output: OutputFormat) -> Config {
    match Config::load(path, overrides) {
        Ok(config) => config,
        Err(e) => {
            report_error(&format!("configuration error: {}", e), output);
            process::exit(exit_codes::USAGE);
        }
    }
}

/// Print an error to stderr in the selected output format.
pub(crate) fn report_error(msg: &str, output: OutputFormat) {
    match output {
        OutputFormat::Text => eprintln!("{}", msg),
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "error": msg }));
        }
    }
}
