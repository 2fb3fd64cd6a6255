//! `arena upload`: pushes a file to a content server over RPC.

use anyhow::Context;
use arena_server::RpcClient;
use std::path::Path;

pub async fn execute(file: &Path, addr: &str) -> anyhow::Result<()> {
    let data = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let name = file
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("Invalid file name {}", file.display()))?;

    let mut client = RpcClient::connect(addr)
        .await
        .with_context(|| format!("Failed to connect to content server {addr}"))?;

    let response = client.upload(name, data).await?;
    println!("{}", response.message);

    let manifest = client.manifest().await?;
    println!("Content server now lists {} asset(s):", manifest.len());
    for entry in manifest {
        println!("  {:>10}  {:08x}  {}", entry.size, entry.checksum, entry.name);
    }
    Ok(())
}
