use ringcache::cache::dispatcher::WriteMode;
use ringcache::node::{Node, NodeConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut id: Option<String> = None;
    let mut host = "127.0.0.1".to_string();
    let mut port: Option<u16> = None;
    let mut group = "default".to_string();
    let mut redundancy: usize = 1;
    let mut write_all = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--id" => {
                id = Some(args[i + 1].clone());
                i += 2;
            }
            "--host" => {
                host = args[i + 1].clone();
                i += 2;
            }
            "--port" => {
                port = Some(args[i + 1].parse()?);
                i += 2;
            }
            "--group" => {
                group = args[i + 1].clone();
                i += 2;
            }
            "--redundancy" => {
                redundancy = args[i + 1].parse()?;
                i += 2;
            }
            "--write-all" => {
                write_all = true;
                i += 1;
            }
            _ => {
                i += 1;
            }
        }
    }

    let (Some(id), Some(port)) = (id, port) else {
        eprintln!(
            "Usage: {} --id <id> --port <port> [--host <host>] [--group <group>] [--redundancy <n>] [--write-all]",
            args[0]
        );
        eprintln!("Example: {} --id node1 --port 8081 --group X", args[0]);
        std::process::exit(1);
    };

    let config = NodeConfig {
        id,
        host,
        port,
        group,
        redundancy,
        write_mode: if write_all {
            WriteMode::WriteAll
        } else {
            WriteMode::FirstSuccess
        },
    };

    let mut node = Node::new(config);
    node.start().await?;

    tracing::info!(
        "node {} up, endpoint {}",
        node.local().id,
        node.endpoint_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_default()
    );
    tracing::info!("Press Ctrl+C to shutdown");

    // Serve until interrupted, reporting the ring view on an interval.
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
        _ = stats_loop(&node) => {}
    }

    node.stop().await?;

    Ok(())
}

async fn stats_loop(node: &Node) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(5));

    loop {
        interval.tick().await;
        let peers = node.peers();
        tracing::info!("ring view: {} peer(s)", peers.len());
        for peer in peers {
            tracing::info!("  - {} at {}:{} (group {})", peer.id, peer.host, peer.port, peer.group);
        }
    }
}
