//! Binary to connect to the Polygon.io stocks stream and subscribe to AMD and
//! NVDA trades and quotes for inspecting live data.
//!
//! # Usage
//!
//! ```sh
//! export POLYGON_API_KEY="your-api-key"
//! cargo run --bin stream_check --features cli
//! ```
//!
//! Set `RUST_LOG=polygon_stream=debug` to see the control frames.

use std::env;
use std::time::Duration;

use polygon_stream::types::events::{QuoteEvent, TradeEvent};
use polygon_stream::{StreamClientBuilder, StreamCluster, StreamTopic, handler_fn};
use tokio::time;

#[tokio::main]
async fn main() -> polygon_stream::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let api_key = env::var("POLYGON_API_KEY").expect("set POLYGON_API_KEY env var before running");

    let client = StreamClientBuilder::new(api_key, StreamCluster::Stocks)
        .max_reconnect_attempts(3)
        .build()?;

    client
        .subscribe_with(
            StreamTopic::StockTrades,
            ["AMD", "NVDA"],
            handler_fn(|msg| {
                let trade: TradeEvent = msg.decode()?;
                println!(
                    "{} trade {:?} x {:?} at {:?}",
                    trade.symbol,
                    trade.price,
                    trade.size,
                    trade.timestamp()
                );
                Ok(())
            }),
        )
        .await?;
    client
        .subscribe_with(
            StreamTopic::StockQuotes,
            ["AMD", "NVDA"],
            handler_fn(|msg| {
                let quote: QuoteEvent = msg.decode()?;
                println!(
                    "{} quote {:?} / {:?}",
                    quote.symbol, quote.bid_price, quote.ask_price
                );
                Ok(())
            }),
        )
        .await?;

    println!("Connecting to {}…", client.config().endpoint()?);
    client.start().await?;

    println!("Listening for events for 10 seconds…");
    println!("(Note: trades only arrive while the market is open)\n");

    tokio::select! {
        _ = time::sleep(Duration::from_secs(10)) => {
            println!("\n10 seconds elapsed — disconnecting…");
        }
        result = client.wait() => {
            println!("Stream ended: {result:?}");
        }
    }

    let health = client.health().await;
    println!("{health:#?}");

    client.close().await?;
    println!("Done.");

    Ok(())
}
