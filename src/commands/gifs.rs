//! GIF search and relay commands

use std::net::SocketAddr;

use anyhow::Result;

use super::Client;
use crate::gif::{self, pager::GifPager, server};

pub async fn list_gifs(query: Option<String>, pages: usize) -> Result<()> {
    let client = Client::new().await?;
    let provider = gif::provider_from_settings(&client.config.gif, client.viewer())?;
    let mut pager = GifPager::new(provider, client.directory(), client.viewer());

    let query = query.unwrap_or_default();
    if let Err(e) = pager.submit(&query).await {
        println!("GIF search failed: {}", e);
        return Ok(());
    }
    for _ in 1..pages {
        if !pager.can_load_more() {
            break;
        }
        match pager.load_more().await {
            Ok(0) => break,
            Ok(n) => tracing::debug!("Loaded {} more", n),
            Err(e) => {
                println!("Could not load more: {}", e);
                break;
            }
        }
    }

    match pager.query() {
        Some(q) => println!("\nGIFs for {:?} ({} pages):", q, pager.page()),
        None => println!("\nTrending GIFs:"),
    }
    println!("{:-<60}", "");
    if pager.results().is_empty() {
        println!("  (no GIFs found)");
        return Ok(());
    }
    for (i, gif) in pager.results().iter().enumerate() {
        println!("{:>3}. {}", i + 1, gif.title.as_deref().unwrap_or("(untitled)"));
        println!("     {}", gif.url);
    }
    if pager.can_load_more() {
        println!("\nMore results available (use --pages).");
    }
    Ok(())
}

pub async fn relay(bind: SocketAddr) -> Result<()> {
    let config = server::RelayConfig::from_env(bind)?;
    server::serve(config).await
}
