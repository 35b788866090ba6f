use tracing::Level;
use tracing_subscriber::FmtSubscriber;

fn main() -> anyhow::Result<()> {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 && args[1] == "client" {
        emberkv::client::run()?;
    } else {
        emberkv::server::Server::bind()?.run()?;
    }
    Ok(())
}
