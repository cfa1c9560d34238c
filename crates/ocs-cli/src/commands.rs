use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use colored::Colorize;
use ocs_gateway::{Gateway, GatewayConfig, DEFAULT_ENDPOINT_KEY};
use ocs_store::DriverRegistry;
use ocs_types::{ObjectRecord, StorageMode};

use crate::cli::*;

/// Endpoint used when neither `--endpoint` nor the config names one.
const FALLBACK_ENDPOINT: &str = "fs://.ocs";

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let gateway = build_gateway(&cli)?;
    let format = cli.format;
    match cli.command {
        Command::Upload(args) => cmd_upload(&gateway, args, format).await,
        Command::Download(args) => cmd_download(&gateway, args).await,
        Command::Insert(args) => cmd_insert(&gateway, args, format).await,
        Command::Stat(args) => cmd_stat(&gateway, args, format).await,
    }
}

fn build_gateway(cli: &Cli) -> anyhow::Result<Gateway> {
    let mut config = match &cli.config {
        Some(path) => GatewayConfig::load(path)?,
        None => GatewayConfig::default(),
    };
    if let Some(uri) = &cli.endpoint {
        config.endpoints.insert(DEFAULT_ENDPOINT_KEY.into(), uri.clone());
    }
    if config.endpoints.is_empty() {
        config.endpoints.insert(DEFAULT_ENDPOINT_KEY.into(), FALLBACK_ENDPOINT.into());
    }
    let drivers = Arc::new(DriverRegistry::with_defaults());
    Ok(Gateway::from_config(&config, drivers)?)
}

async fn cmd_upload(gateway: &Gateway, args: UploadArgs, format: OutputFormat) -> anyhow::Result<()> {
    let data = tokio::fs::read(&args.file)
        .await
        .with_context(|| format!("reading {}", args.file.display()))?;
    let record = ObjectRecord::upload(&args.namespace, &args.name, args.mode, data);
    let receipt = gateway.upload(&record).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&receipt)?),
        OutputFormat::Text => {
            println!(
                "{} Stored {}/{} ({} bytes, {})",
                "✓".green().bold(),
                receipt.namespace,
                receipt.name.yellow(),
                receipt.length,
                receipt.strategy.to_string().cyan()
            );
            println!("  Id: {}", receipt.id.to_string().dimmed());
        }
    }
    Ok(())
}

async fn cmd_download(gateway: &Gateway, args: DownloadArgs) -> anyhow::Result<()> {
    let record = ObjectRecord::download(&args.namespace, &args.name, args.mode);
    let data = gateway.download(&record).await?;

    match &args.output {
        Some(path) => {
            tokio::fs::write(path, &data)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            eprintln!(
                "{} Wrote {} bytes to {}",
                "✓".green().bold(),
                data.len(),
                path.display().to_string().bold()
            );
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&data)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

async fn cmd_insert(gateway: &Gateway, args: InsertArgs, format: OutputFormat) -> anyhow::Result<()> {
    let text = tokio::fs::read_to_string(&args.json_file)
        .await
        .with_context(|| format!("reading {}", args.json_file.display()))?;
    let value: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("parsing {}", args.json_file.display()))?;
    let serde_json::Value::Object(document) = value else {
        anyhow::bail!("{} must hold a JSON object", args.json_file.display());
    };
    let receipt = gateway.upload(&ObjectRecord::raw(&args.namespace, document)).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&receipt)?),
        OutputFormat::Text => println!(
            "{} Inserted document {} into {}",
            "✓".green().bold(),
            receipt.id.to_string().yellow(),
            receipt.namespace.bold()
        ),
    }
    Ok(())
}

async fn cmd_stat(gateway: &Gateway, args: StatArgs, format: OutputFormat) -> anyhow::Result<()> {
    let record = ObjectRecord::download(&args.namespace, &args.name, args.mode);
    let meta = gateway.stat(&record).await?;
    let strategy = meta.strategy();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&meta)?),
        OutputFormat::Text => {
            println!("{}/{}", args.namespace, meta.name.yellow().bold());
            println!("  Length: {} bytes", meta.length);
            if args.mode == StorageMode::InlineDocumentStore {
                println!("  Strategy: {}", strategy.to_string().cyan());
            }
        }
    }
    Ok(())
}
