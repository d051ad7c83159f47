//! A minimal subscribe-and-print client, in the shape of the teacher's
//! `sub_client` example but async and without the MQTT5/CLI-flag surface
//! this crate doesn't implement.
//!
//! ```text
//! pub_sub <host:port> <topic> [message-to-publish]
//! ```

use std::time::Duration;

use anyhow::{anyhow, Result};
use mqtt_session::{connect, ConnectOptions, QoS};

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init();

    let mut args = std::env::args().skip(1);
    let addr = args.next().ok_or_else(|| anyhow!("usage: pub_sub <host:port> <topic> [message]"))?;
    let topic = args.next().ok_or_else(|| anyhow!("usage: pub_sub <host:port> <topic> [message]"))?;
    let publish_payload = args.next();

    let options = ConnectOptions::new(format!("pub_sub-{}", std::process::id()))
        .keep_alive(Duration::from_secs(30));

    let mut client = connect(addr, options).await?;

    let granted = client.subscribe(vec![(topic.clone(), QoS::AtLeastOnce)]).await?;
    log::info!("subscribed to {} with {:?}", topic, granted);

    if let Some(payload) = publish_payload {
        let outcome = client.publish(topic, payload.into_bytes(), QoS::AtLeastOnce, false).await?;
        log::info!("publish resolved: {:?}", outcome);
    }

    while let Some(message) = client.receive().await {
        println!("{}: {}", message.topic, String::from_utf8_lossy(&message.payload));
    }

    Ok(())
}
