use color_eyre::Result;
use mqttscope::config::AppConfig;
use mqttscope::session::{ConnectionState, SessionHandle};
use mqttscope::topic_tree::TopicNode;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config = AppConfig::load_or_default().await?;
    let session_config = config.broker.session_config();
    info!(
        "Connecting to {}:{} as '{}'",
        session_config.host, session_config.port, session_config.client_id
    );

    let mut session = SessionHandle::new();
    let mut snapshots = session.snapshots();

    session.connect(session_config).await?;
    info!("Connected");

    for entry in &config.subscriptions {
        info!("Subscribing to '{}' (QoS {})", entry.filter, entry.qos);
        session.subscribe(&entry.filter, entry.qos).await;
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, shutting down");
                break;
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    warn!("Session state channel closed");
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                if snapshot.state == ConnectionState::Disconnected {
                    match snapshot.last_error {
                        Some(error) => warn!("Session ended: {}", error),
                        None => info!("Session ended"),
                    }
                    break;
                }
                info!(
                    "rev {}: {} subscriptions, {} topics, {} messages",
                    snapshot.revision,
                    snapshot.subscriptions.len(),
                    snapshot.tree.subtree_node_count() - 1,
                    snapshot.tree.subtree_message_count()
                );
            }
        }
    }

    let final_tree = session.snapshot().tree;
    session.disconnect().await;

    if !final_tree.children.is_empty() {
        println!("Observed topics:");
        print_tree(&final_tree, 0);
    }
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}

fn print_tree(node: &TopicNode, depth: usize) {
    for child in node.children.values() {
        let indent = "  ".repeat(depth);
        if child.stats.message_count > 0 {
            let preview = child
                .stats
                .last_message
                .as_deref()
                .unwrap_or_default()
                .chars()
                .take(40)
                .collect::<String>();
            println!(
                "{indent}{} ({} msgs, last: {preview})",
                child.name, child.stats.message_count
            );
        } else {
            println!("{indent}{}", child.name);
        }
        print_tree(child, depth + 1);
    }
}
