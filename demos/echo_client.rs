//! Echo Client - example of issuing multiplexed requests.
//!
//! Start `echo_server` first, then:
//!
//! ```sh
//! cargo run --example echo_client
//! ```

use std::time::Duration;

use tracing_subscriber::EnvFilter;
use wsrest::{Connection, Linger};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let connection = Connection::builder("ws://127.0.0.1:8080/ws")
        .linger(Linger::After(Duration::from_secs(5)))
        .build()?;

    let text = connection
        .get("/rest/echo")?
        .query_param("value", "OK")
        .text()
        .await?;
    println!("{}", text);

    let text = connection.post("/rest/echo")?.body("posted body").text().await?;
    println!("{}", text);

    // Several exchanges in flight on the same socket.
    let greetings = ["ada", "grace", "linus"].map(|name| {
        let connection = connection.clone();
        async move {
            connection
                .get("/rest/hello/{name}")?
                .path_param("name", name)
                .text()
                .await
        }
    });
    for greeting in futures::future::join_all(greetings).await {
        println!("{}", greeting?);
    }

    match connection.get("/rest/missing")?.text().await {
        Ok(text) => println!("unexpected: {}", text),
        Err(e) => println!("expected failure: {}", e),
    }

    connection.close();
    Ok(())
}
