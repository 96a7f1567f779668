//! Basic CDP example - discover a running Chrome and query it

use browser::cdp::CDPClient;
use browser::launcher::discover_ws_url;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    // Chrome started with --remote-debugging-port=9222
    let ws_url = discover_ws_url(
        "http://127.0.0.1:9222",
        Duration::from_secs(1),
        Duration::from_secs(10),
    )
    .await?;
    println!("Connecting to Chrome at: {}", ws_url);

    let client = CDPClient::connect(&ws_url).await?;

    let version_result = client
        .send_request("Browser.getVersion", None, None)
        .await?;
    println!("Browser version: {}", version_result);

    let targets_result = client.send_request("Target.getTargets", None, None).await?;
    println!("Targets: {}", targets_result);

    let id = client.subscribe(
        "Target.targetCreated",
        Arc::new(move |event| {
            println!("Target created: {:?}", event.params);
        }),
    );
    client
        .send_request(
            "Target.setDiscoverTargets",
            Some(serde_json::json!({ "discover": true })),
            None,
        )
        .await?;

    tokio::time::sleep(Duration::from_secs(2)).await;

    client.unsubscribe("Target.targetCreated", id);
    client.close().await?;
    println!("Disconnected");

    Ok(())
}
