// deckhand - deployment settings assembler
//
// This is the main entry point for the application.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use deckhand::assemble::Assembler;
use deckhand::config::{expand_home, Config};
use deckhand::kms::{AwsKms, CredentialSource, KmsContext, DEFAULT_REGION};
use deckhand::settings::DEFAULT_TAG;
use deckhand::vault::Vault;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// deckhand - assemble deployment settings from templates and encrypted fragments
#[derive(Parser, Debug)]
#[command(name = "deckhand")]
#[command(version)]
#[command(about = "Assemble deployment settings from templates and KMS-encrypted fragments")]
#[command(long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Path to the configuration file (default: ./deckhand.yaml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// KMS key ID or alias
    #[arg(long = "key-id", env = "KMS_KEY_ID", global = true)]
    key_id: Option<String>,

    /// AWS region
    #[arg(long, env = "AWS_REGION", global = true)]
    region: Option<String>,

    /// AWS shared credentials profile name
    #[arg(long, env = "AWS_PROFILE_NAME", global = true)]
    profile: Option<String>,

    /// AWS access key ID (used together with --aws-secret-access-key)
    #[arg(long, env = "AWS_ACCESS_KEY_ID", global = true, hide_env_values = true)]
    aws_access_key_id: Option<String>,

    /// AWS secret access key
    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", global = true, hide_env_values = true)]
    aws_secret_access_key: Option<String>,

    /// KMS endpoint override
    #[arg(long, env = "KMS_ENDPOINT_URL", global = true)]
    endpoint_url: Option<String>,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Args, Debug)]
struct TargetFile {
    /// Target file
    #[arg(short = 'f', long = "file", value_name = "FILE")]
    flag: Option<PathBuf>,

    /// Target file (positional form)
    #[arg(value_name = "PATH", conflicts_with = "flag")]
    positional: Option<PathBuf>,
}

impl TargetFile {
    fn resolve(self) -> Result<PathBuf> {
        self.flag
            .or(self.positional)
            .ok_or_else(|| {
                anyhow::anyhow!("No target file given. Use -f <FILE> or pass it as an argument")
            })
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt a file in place with KMS
    Encrypt {
        #[command(flatten)]
        target: TargetFile,
    },

    /// Decrypt a KMS-encrypted file in place
    Decrypt {
        #[command(flatten)]
        target: TargetFile,
    },

    /// Merge the template with its fragments and print the deployment settings
    Render {
        #[command(flatten)]
        template: TargetFile,

        /// Directory of fragment files
        #[arg(long = "vars-path", env = "DECKHAND_VARS_PATH")]
        vars_path: Option<String>,

        /// Outer values as a JSON object, embedded before any fragment
        #[arg(short = 'V', long = "values")]
        values: Option<String>,

        /// Image tag substituted for `$tag`
        #[arg(short = 't', long = "tag", env = "DOCKER_DEFAULT_DEPLOY_TAG")]
        tag: Option<String>,
    },
}

/// Settings shared by every subcommand, after applying flags, env and config.
struct RunContext {
    key_id: Option<String>,
    kms: KmsContext,
    config: Config,
}

impl RunContext {
    fn build(global: GlobalArgs) -> Result<Self> {
        let config = Config::discover(global.config.as_deref())
            .with_context(|| "Failed to load configuration")?;
        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        let region = global
            .region
            .or_else(|| config.region.clone())
            .unwrap_or_else(|| DEFAULT_REGION.to_string());
        let profile = global.profile.or_else(|| config.profile.clone());
        let credentials = CredentialSource::select(
            global.aws_access_key_id.as_deref(),
            global.aws_secret_access_key.as_deref(),
            profile.as_deref(),
        );

        let mut kms = KmsContext::new(region, credentials);
        if let Some(endpoint) = global.endpoint_url.or_else(|| config.endpoint_url.clone()) {
            kms = kms.with_endpoint(endpoint);
        }

        let key_id = global
            .key_id
            .filter(|k| !k.is_empty())
            .or_else(|| config.key_id.clone());

        Ok(Self {
            key_id,
            kms,
            config,
        })
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_env("DECKHAND_LOG")
        .unwrap_or_else(|_| EnvFilter::new(format!("deckhand={}", default_level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run_encrypt(run: &RunContext, path: &Path) -> Result<()> {
    eprintln!("🔒 Encrypting: {}", path.display());

    let key_id = run
        .key_id
        .as_deref()
        .context("A KMS key ID is required to encrypt. Use --key-id or set KMS_KEY_ID")?;

    let vault = Vault::new(AwsKms::new());
    vault.encrypt_file(path, key_id, &run.kms).await?;

    eprintln!("✓ Encrypted with key: {}", key_id);
    Ok(())
}

async fn run_decrypt(run: &RunContext, path: &Path) -> Result<()> {
    eprintln!("🔓 Decrypting: {}", path.display());

    let vault = Vault::new(AwsKms::new());
    vault
        .decrypt_file(path, run.key_id.as_deref(), &run.kms)
        .await?;

    eprintln!("✓ Decrypted");
    Ok(())
}

async fn run_render(
    run: &RunContext,
    file: &Path,
    vars_path: Option<String>,
    values: Option<String>,
    tag: Option<String>,
) -> Result<()> {
    let base = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read template: {}", file.display()))?;

    let vars_path = match vars_path {
        Some(path) => Some(expand_home(&path)?),
        None => run.config.vars_path()?,
    };
    let tag = tag
        .or_else(|| run.config.tag.clone())
        .unwrap_or_else(|| DEFAULT_TAG.to_string());

    eprintln!("📖 Template: {}", file.display());
    if let Some(dir) = &vars_path {
        eprintln!("📂 Fragments: {}", dir.display());
    }

    let vault = Vault::new(AwsKms::new());
    let assembler = Assembler::new(&vault, run.key_id.as_deref(), &run.kms);
    let settings = assembler
        .materialize(&base, values.as_deref(), vars_path.as_deref(), &tag)
        .await?;

    eprintln!(
        "✓ Assembled {} container definition(s)",
        settings.ecs.task_definition.container_definitions.len()
    );

    let rendered = serde_json::to_string_pretty(&settings)
        .with_context(|| "Failed to serialize deployment settings")?;
    println!("{}", rendered);
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let run = RunContext::build(cli.global)?;

    match cli.command {
        Commands::Encrypt { target } => run_encrypt(&run, &target.resolve()?).await,
        Commands::Decrypt { target } => run_decrypt(&run, &target.resolve()?).await,
        Commands::Render {
            template,
            vars_path,
            values,
            tag,
        } => run_render(&run, &template.resolve()?, vars_path, values, tag).await,
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.global.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("\nError: {:#}", e);
        std::process::exit(1);
    }
}
