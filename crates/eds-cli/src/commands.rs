use std::time::Duration;

use anyhow::{bail, Context as _};
use colored::Colorize;
use eds_square::edstest;
use eds_store::{Context, GcOutcome, Store, StoreConfig, StoreError};
use eds_types::DataRoot;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

use crate::cli::*;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let store = open_store(&cli)?;
    store.start().await?;
    let ctx = match cli.timeout {
        Some(secs) => Context::with_timeout(Duration::from_secs(secs)),
        None => Context::background(),
    };

    let outcome = match cli.command {
        Command::Put(args) => cmd_put(&store, &ctx, args).await,
        Command::Get(args) => cmd_get(&store, &ctx, args).await,
        Command::Header(args) => cmd_header(&store, &ctx, args).await,
        Command::Has(args) => cmd_has(&store, args).await,
        Command::List => cmd_list(&store).await,
        Command::Remove(args) => cmd_remove(&store, &ctx, args).await,
        Command::Gc => cmd_gc(&store).await,
    };
    store.stop().await?;
    outcome
}

fn open_store(cli: &Cli) -> anyhow::Result<Store> {
    let mut config = match &cli.config {
        Some(path) => StoreConfig::from_toml_file(path)?,
        None => StoreConfig::default(),
    };
    if let Some(base) = &cli.base_path {
        config.base_path = base.clone();
    }
    debug!(base_path = %config.base_path.display(), "opening store");
    Store::new(config).with_context(|| "opening store")
}

fn parse_root(hex: &str) -> anyhow::Result<DataRoot> {
    DataRoot::from_hex(hex).with_context(|| format!("invalid data root {hex:?}"))
}

async fn cmd_put(store: &Store, ctx: &Context, args: PutArgs) -> anyhow::Result<()> {
    if args.width < 2 || !args.width.is_power_of_two() {
        bail!("width must be a power of two and at least 2, got {}", args.width);
    }
    if args.share_size == 0 {
        bail!("share size must be positive");
    }
    let mut rng = StdRng::seed_from_u64(args.seed);
    let eds = edstest::random_eds(args.width / 2, args.share_size, &mut rng);
    let root = eds.data_root();

    match store.put(ctx, &root, &eds).await {
        Ok(()) => println!("{} Stored {}×{} square", "✓".green().bold(), args.width, args.width),
        Err(StoreError::AlreadyExists(_)) => println!("{} Already stored", "✓".green()),
        Err(e) => return Err(e.into()),
    }
    println!("  Root: {}", root.to_hex().yellow());
    Ok(())
}

async fn cmd_get(store: &Store, ctx: &Context, args: RootArgs) -> anyhow::Result<()> {
    let root = parse_root(&args.root)?;
    let eds = store.get(ctx, &root).await?;
    println!("{} Square {} verified", "✓".green().bold(), root.short_hex().yellow());
    println!("  Width: {}", eds.width());
    println!("  Share size: {} bytes", eds.share_size());
    println!("  Shares: {}", eds.flattened().len());
    Ok(())
}

async fn cmd_header(store: &Store, ctx: &Context, args: RootArgs) -> anyhow::Result<()> {
    let root = parse_root(&args.root)?;
    let dah = store.get_dah(ctx, &root).await?;
    println!("Header for {} (width {})", root.to_hex().yellow(), dah.square_width());
    for (i, r) in dah.row_roots.iter().enumerate() {
        println!("  row {i:>3}: {}", r.to_hex().dimmed());
    }
    for (i, c) in dah.column_roots.iter().enumerate() {
        println!("  col {i:>3}: {}", c.to_hex().dimmed());
    }
    Ok(())
}

async fn cmd_has(store: &Store, args: RootArgs) -> anyhow::Result<()> {
    let root = parse_root(&args.root)?;
    match store.has(&root).await {
        Ok(true) => println!("{} {}", "present".green(), root.to_hex()),
        Ok(false) => println!("{} {}", "absent".dimmed(), root.to_hex()),
        Err(StoreError::Errored { reason, .. }) => {
            println!("{} {} ({})", "errored".red(), root.to_hex(), reason)
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

async fn cmd_list(store: &Store) -> anyhow::Result<()> {
    let roots = store.list().await?;
    if roots.is_empty() {
        println!("No squares stored.");
    }
    for root in roots {
        println!("{}", root.to_hex());
    }
    Ok(())
}

async fn cmd_remove(store: &Store, ctx: &Context, args: RootArgs) -> anyhow::Result<()> {
    let root = parse_root(&args.root)?;
    store.remove(ctx, &root).await?;
    println!("{} Removed {}", "✓".green().bold(), root.short_hex().yellow());
    Ok(())
}

async fn cmd_gc(store: &Store) -> anyhow::Result<()> {
    let result = store.gc().await?;
    println!(
        "{} GC: {} shards swept, {} reclaimed.",
        "✓".green(),
        result.shards.len(),
        result.reclaimed()
    );
    for (key, outcome) in &result.shards {
        if let GcOutcome::Failed(reason) = outcome {
            println!("  {} {}: {}", "failed".red(), key, reason);
        }
    }
    Ok(())
}
