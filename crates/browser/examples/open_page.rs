//! Launch Chrome, open a page and read a few things off it

use browser::{BrowserSession, PageDriver, SessionConfig};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let session = BrowserSession::new(SessionConfig::default());

    let mut event_rx = session.event_bus.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = event_rx.recv().await {
            println!("Event: {:?}", event);
        }
    });

    session.start().await?;
    let page = session.open_page().await?;

    page.goto("https://www.rust-lang.org").await?;
    page.wait_for_selector("h1", Duration::from_secs(10)).await?;

    println!("URL: {}", page.current_url().await?);
    println!("Headings: {:?}", page.text_contents("h1").await?);
    println!(
        "Body background: {:?}",
        page.computed_style("body", "background-color").await?
    );

    session.stop().await?;
    Ok(())
}
