use std::error::Error;

use clap::Parser;
use futures::{pin_mut, TryStreamExt};
use itertools::Itertools;
use rand::seq::IteratorRandom;

mod literal;
mod meta;
mod provider;
mod scrape;

use provider::{Provider, Sort};

/// Bandcamp tag radio: find albums by tag and print their streamable track
/// urls, one per line.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Show all available music tags and locations instead of searching
    #[arg(short, long, conflicts_with = "tag")]
    list_tags: bool,

    /// Music tag to search; picked at random when omitted
    #[arg(short, long)]
    tag: Option<String>,

    /// Sorting of search results: "pop" (best-selling) or "date" (new arrivals)
    #[arg(short, long, default_value = "pop")]
    sort: Sort,

    /// Number of albums to fetch
    #[arg(short, long, default_value_t = 15, value_name = "N")]
    number: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let _logger = flexi_logger::Logger::try_with_env_or_str("info")?.start()?;

    let provider = Provider::new();

    if args.list_tags {
        let catalog = provider.get_all_tags().await?;
        println!("{}", catalog.tags.iter().join(", "));
        println!();
        println!("{}", catalog.locations.iter().join(", "));
        return Ok(());
    }

    let tag = match args.tag {
        Some(tag) => tag,
        None => {
            let catalog = provider.get_all_tags().await?;
            let tag = catalog
                .tags
                .iter()
                .choose(&mut rand::thread_rng())
                .cloned()
                .ok_or("tag catalog is empty")?;
            eprintln!(":: Randomly chosen tag: {}", tag);
            tag
        }
    };

    eprintln!(":: Fetching {} albums...", args.number);
    let albums = provider.search_albums_by_tag(&tag, args.sort);
    pin_mut!(albums);

    let mut fetched = 0usize;
    let mut total_tracks = 0usize;
    while fetched < args.number {
        let album = match albums.try_next().await? {
            Some(album) => album,
            None => break,
        };
        fetched += 1;
        eprintln!("  {}. {}", fetched, album.url);
        match provider.get_album_tracklist(&album).await {
            Ok(tracks) => {
                total_tracks += tracks.len();
                for track in tracks {
                    println!("{}", track.url);
                }
            }
            // one broken album page should not end the whole run
            Err(err) => log::warn!("skipping album {}: {}", album.url, err),
        }
    }
    eprintln!(":: Total {} tracks", total_tracks);

    Ok(())
}
