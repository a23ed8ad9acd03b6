use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use ibmcloud_core::differ::diff_attributes;
use ibmcloud_core::{
    Attributes, DataSource, OperationContext, PollConfig, ReadOutcome, Reconciler, RemoteClient,
    ResourceKind, ResourceRecord, Value,
};
use ibmcloud_provider::{IbmProvider, IbmSession};

#[derive(Parser)]
#[command(name = "ibmcloud")]
#[command(about = "Create, read, update and delete IBM Cloud resources", long_about = None)]
struct Cli {
    #[command(flatten)]
    session: SessionArgs,

    /// Log HTTP requests and poll samples
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SessionArgs {
    /// JSON session file; flags and environment override its fields
    #[arg(long)]
    config: Option<PathBuf>,

    /// IAM bearer token
    #[arg(long, env = "IBMCLOUD_IAM_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[arg(long, env = "IBMCLOUD_REGION")]
    region: Option<String>,

    #[arg(long, env = "IBMCLOUD_ACCOUNT_ID")]
    account_id: Option<String>,

    /// CRN of the Power Systems workspace
    #[arg(long, env = "IBMCLOUD_POWER_CRN")]
    power_crn: Option<String>,

    #[arg(long, env = "IBMCLOUD_VPC_ENDPOINT")]
    vpc_endpoint: Option<String>,

    #[arg(long, env = "IBMCLOUD_POWER_ENDPOINT")]
    power_endpoint: Option<String>,

    #[arg(long, env = "IBMCLOUD_IAM_ENDPOINT")]
    iam_endpoint: Option<String>,

    #[arg(long, env = "IBMCLOUD_SCC_ENDPOINT")]
    scc_endpoint: Option<String>,

    /// Seconds between two state samples
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    poll_delay: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// List supported resource and data source kinds
    Kinds,
    /// Create a resource and wait until it is available
    Create {
        kind: String,

        /// Attribute as key=value; values are parsed as JSON when possible
        #[arg(long = "attr", value_parser = parse_attr)]
        attrs: Vec<(String, Value)>,

        /// Seconds to wait, defaults to the kind's create timeout
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Read a resource once
    Read { kind: String, id: String },
    /// Change a resource to match the given attributes
    Update {
        kind: String,
        id: String,

        #[arg(long = "attr", value_parser = parse_attr)]
        attrs: Vec<(String, Value)>,

        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Delete a resource and wait until it is gone
    Delete {
        kind: String,
        id: String,

        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Query a data source
    Data {
        kind: String,

        #[arg(long = "attr", value_parser = parse_attr)]
        attrs: Vec<(String, Value)>,
    },
}

/// Parse `key=value`, falling back to a plain string when the value is not JSON
fn parse_attr(s: &str) -> Result<(String, Value), String> {
    let (key, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    if key.is_empty() {
        return Err(format!("missing attribute name in '{}'", s));
    }
    let value = serde_json::from_str::<serde_json::Value>(raw)
        .ok()
        .and_then(|json| Value::from_json(&json))
        .unwrap_or_else(|| Value::from(raw));
    Ok((key.to_string(), value))
}

impl SessionArgs {
    fn build(&self) -> Result<IbmSession> {
        let mut session = match &self.config {
            Some(path) => IbmSession::from_file(path)?,
            None => IbmSession::default(),
        };
        if let Some(token) = &self.token {
            session.iam_token = token.clone();
        }
        if let Some(region) = &self.region {
            session.region = region.clone();
        }
        if self.account_id.is_some() {
            session.account_id = self.account_id.clone();
        }
        if self.power_crn.is_some() {
            session.power_crn = self.power_crn.clone();
        }
        let endpoints = &mut session.endpoints;
        override_endpoint(&mut endpoints.vpc, &self.vpc_endpoint);
        override_endpoint(&mut endpoints.power, &self.power_endpoint);
        override_endpoint(&mut endpoints.iam_identity, &self.iam_endpoint);
        override_endpoint(&mut endpoints.iam_policy, &self.iam_endpoint);
        override_endpoint(&mut endpoints.scc_admin, &self.scc_endpoint);

        session.validate()?;
        Ok(session)
    }
}

fn override_endpoint(slot: &mut Option<String>, flag: &Option<String>) {
    if flag.is_some() {
        slot.clone_from(flag);
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    if let Err(e) = run(cli, cancel).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli, cancel: CancellationToken) -> Result<()> {
    if let Commands::Kinds = cli.command {
        print_kinds();
        return Ok(());
    }

    let session = cli.session.build()?;
    let provider = IbmProvider::new(session)?;
    let poll = PollConfig {
        delay: Duration::from_secs(cli.session.poll_delay),
        ..PollConfig::default()
    };
    let context = |timeout: Option<u64>, default: Duration| {
        OperationContext::with_timeout(timeout.map(Duration::from_secs).unwrap_or(default))
            .with_cancel(cancel.clone())
    };

    match cli.command {
        Commands::Kinds => Ok(()),
        Commands::Create {
            kind,
            attrs,
            timeout,
        } => {
            let reconciler = reconciler(&provider, &kind, poll)?;
            let kind = reconciler.client().kind();
            let ctx = context(timeout, kind.timeouts.create);
            eprintln!("{}", format!("Creating {}...", kind.name).cyan());
            let record = reconciler.create(attrs.into_iter().collect(), &ctx).await?;
            eprintln!("  {} {} {}", "✓".green(), kind.name, record.id);
            print_record(&record)
        }
        Commands::Read { kind, id } => {
            let reconciler = reconciler(&provider, &kind, poll)?;
            match reconciler.read(&id).await? {
                ReadOutcome::Found(record) => print_record(&record),
                ReadOutcome::Gone => {
                    eprintln!("{}", format!("{} {} no longer exists.", kind, id).yellow());
                    Ok(())
                }
            }
        }
        Commands::Update {
            kind,
            id,
            attrs,
            timeout,
        } => {
            let reconciler = reconciler(&provider, &kind, poll)?;
            let kind = reconciler.client().kind();
            let current = match reconciler.read(&id).await? {
                ReadOutcome::Found(record) => record,
                ReadOutcome::Gone => bail!("{} {} does not exist", kind.name, id),
            };
            let desired: Attributes = attrs.into_iter().collect();
            let diff = diff_attributes(&desired, &current.observed);
            if !diff.is_change() {
                eprintln!("{}", "No changes needed.".green());
                return print_record(&current);
            }
            let ctx = context(timeout, kind.timeouts.update);
            eprintln!("{}", format!("Updating {} {}...", kind.name, id).cyan());
            let record = reconciler.update(&id, diff.into_patch(), &ctx).await?;
            eprintln!("  {} {} {}", "✓".green(), kind.name, record.id);
            print_record(&record)
        }
        Commands::Delete { kind, id, timeout } => {
            let reconciler = reconciler(&provider, &kind, poll)?;
            let kind = reconciler.client().kind();
            let ctx = context(timeout, kind.timeouts.delete);
            eprintln!("{}", format!("Deleting {} {}...", kind.name, id).red().bold());
            let record = reconciler.delete(&id, &ctx).await?;
            eprintln!("  {} {} {}", "✓".green(), kind.name, record.id);
            print_record(&record)
        }
        Commands::Data { kind, attrs } => {
            let source = provider
                .data_source(&kind)
                .ok_or_else(|| unknown_kind(&provider, &kind, "data source"))?;
            let result = source.read(&attrs.into_iter().collect()).await?;
            println!("{}", serde_json::to_string_pretty(&result.to_json())?);
            Ok(())
        }
    }
}

fn reconciler(
    provider: &IbmProvider,
    kind: &str,
    poll: PollConfig,
) -> Result<Reconciler<Box<dyn RemoteClient>>> {
    let client = provider
        .client(kind)
        .ok_or_else(|| unknown_kind(provider, kind, "resource"))?;
    Ok(Reconciler::new(client).with_poll_config(poll))
}

fn unknown_kind(provider: &IbmProvider, kind: &str, expected: &str) -> anyhow::Error {
    match provider.kind(kind) {
        Some(found) => anyhow!("{} is not a {} kind", found.name, expected),
        None => anyhow!("unknown kind '{}', see `ibmcloud kinds`", kind),
    }
}

fn print_record(record: &ResourceRecord) -> Result<()> {
    let json = serde_json::to_string_pretty(record).context("failed to encode record")?;
    println!("{}", json);
    Ok(())
}

fn print_kinds() {
    let print = |title: &str, kinds: Vec<ResourceKind>| {
        println!("{}", title.bold());
        for kind in kinds {
            println!("  {:<36} {}", kind.name, kind.description);
        }
    };
    print("Resources:", ibmcloud_provider::resources::resource_kinds());
    println!();
    print("Data sources:", ibmcloud_provider::resources::data_source_kinds());
}
