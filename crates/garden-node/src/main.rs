//! Garden Node binary
//!
//! Chat peer with a line-based terminal front end.

use garden_node::commands::HELP;
use garden_node::{parse, NodeConfig, Outcome, Renderer, Session, TcpTransport};
use garden_protocols::{Action, Coordinator, CoordinatorConfig, FileStore, Input};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr, the channel goes to stdout
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "garden_node=info,garden_protocols=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = NodeConfig::from_env()?;
    let id = config.resolve_id()?;
    tracing::info!(id = %id, data_file = %config.data_file.display(), "Starting Garden node");

    let (transport, events) =
        TcpTransport::new(id.clone(), config.listen_addr, config.bootstrap_peers.clone());
    let directory = transport.directory();
    let store = FileStore::open(&config.data_file)?;

    let mut coordinator_config = CoordinatorConfig::default();
    if !config.relay {
        coordinator_config = coordinator_config.without_relay();
    }
    let mut coordinator = Coordinator::new(transport, store, coordinator_config)?;
    coordinator.start()?;

    let mut views = coordinator.subscribe();
    let joined = coordinator
        .view()
        .channel(&config.channel)
        .is_some_and(|ch| ch.users.contains(&id));

    let (input_tx, input_rx) = mpsc::channel(64);
    let node = tokio::spawn(coordinator.run(input_rx, events));

    if !joined {
        input_tx
            .send(Input::Author(Action::Join(config.channel.clone())))
            .await?;
    }

    let renderer = Renderer::new(config.grouping, id);
    let mut session = Session::new(config.channel.clone());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let draw = |session: &Session, view: &garden_view::View| {
        print!("{}", renderer.channel(view, &session.channel, &directory.ids()));
    };
    draw(&session, &views.borrow_and_update());

    loop {
        tokio::select! {
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = views.borrow_and_update().clone();
                draw(&session, &view);
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    let _ = input_tx.send(Input::Quit).await;
                    break;
                };
                let view = views.borrow().clone();
                let previous = session.channel.clone();
                let outcome = match parse(&line) {
                    Ok(Some(command)) => session.apply(command, &view),
                    Ok(None) => continue,
                    Err(e) => Err(e),
                };
                match outcome {
                    Ok(Outcome::Send(input)) => {
                        let quit = input == Input::Quit;
                        if input_tx.send(input).await.is_err() || quit {
                            break;
                        }
                        if session.channel != previous {
                            draw(&session, &view);
                        }
                    }
                    Ok(Outcome::ShowPeers) => print!("{}", renderer.peers(&view, &directory.ids())),
                    Ok(Outcome::ShowHelp) => print!("{HELP}"),
                    Err(e) => eprintln!("{e}"),
                }
            }
        }
    }

    node.await??;
    tracing::info!("Garden node stopped");
    Ok(())
}
