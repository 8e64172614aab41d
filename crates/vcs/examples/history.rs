//! Example: print recent history of a remote repository
//!
//! Run with: cargo run --example history -- <git|hg> <url> <path> [branch]

use anyhow::{bail, Context};
use futures::TryStreamExt;
use tracing_subscriber::EnvFilter;
use vcs::{LogQuery, VcsBackendType, VcsConfig, VcsFactory};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (backend, url, path) = match args.as_slice() {
        [backend, url, path, ..] => (backend, url, path),
        _ => bail!("usage: history <git|hg> <url> <path> [branch]"),
    };
    let backend_type = match backend.as_str() {
        "git" => VcsBackendType::Git,
        "hg" | "mercurial" => VcsBackendType::Hg,
        other => bail!("unknown backend {other:?}"),
    };

    let vcs = VcsFactory::create(&VcsConfig::new(backend_type, url.as_str(), path.as_str()))?;
    println!("{}", vcs.description());

    if vcs.is_cloned().await {
        vcs.update().await.context("updating working copy")?;
    } else {
        vcs.clone_repo().await.context("cloning working copy")?;
    }

    let branch = match args.get(3) {
        Some(branch) => branch.clone(),
        None => vcs.get_default_revision().await?,
    };
    println!("branches: {:?}", vcs.get_known_branches().await?);

    let mut log = vcs.log(LogQuery::new().branch(&branch).limit(20)).await?;
    while let Some(revision) = log.try_next().await? {
        println!(
            "{} {} {:<24} {}",
            &revision.id().as_str()[..12],
            revision.author_date().format("%Y-%m-%d"),
            revision.author(),
            revision.subject()
        );
    }
    Ok(())
}
