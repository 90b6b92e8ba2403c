mod config;

use std::{
    net::{Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::bail;
use clap::Parser;
use config::Config;
use fake_user_agent::get_chrome_rua;
use hibiki::{
    headers::StaticHeaderInjector, GetRequest, HttpUrlSource, ProxyCacheConfig, RangeSession,
};
use reqwest::header::{HeaderValue, USER_AGENT};
use tokio::{
    io::BufReader,
    net::{TcpListener, TcpStream},
};

#[derive(Parser, Debug, Clone)]
#[clap(name = "hibiki", version, about)]
pub struct HibikiArgs {
    /// Remote media file to serve
    #[clap(short, long)]
    url: Option<String>,

    /// Address to accept player connections on
    ///
    /// Defaults to a random port on 127.0.0.1.
    #[clap(short, long)]
    listen: Option<SocketAddr>,

    /// Directory of cache files
    #[clap(long, env = "HIBIKI_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Connect and read timeout in seconds
    #[clap(long)]
    timeout: Option<u64>,

    /// HTTP Header sent upstream
    ///
    /// Custom header. eg. "Referer: https://example.com/".
    #[clap(short = 'H', long = "header")]
    headers: Vec<String>,

    /// User agent sent upstream. A Chrome user agent is used if not set.
    #[clap(long)]
    user_agent: Option<String>,

    /// TOML file with default values of the arguments above
    #[clap(short, long)]
    config: Option<PathBuf>,
}

impl HibikiArgs {
    /// Fills arguments missing on the command line from the config file.
    fn merge(mut self, config: Config) -> Self {
        self.url = self.url.or(config.url);
        self.listen = self.listen.or(config.listen);
        self.cache_dir = self.cache_dir.or(config.cache_dir);
        self.timeout = self.timeout.or(config.timeout);
        self.user_agent = self.user_agent.or(config.user_agent);

        let mut headers = config.headers;
        headers.append(&mut self.headers);
        self.headers = headers;
        self
    }

    fn header_injector(&self) -> anyhow::Result<StaticHeaderInjector> {
        let mut injector = StaticHeaderInjector::parse(&self.headers)?;
        if !injector.contains(&USER_AGENT) {
            let user_agent = self.user_agent.as_deref().unwrap_or_else(|| get_chrome_rua());
            injector.insert(USER_AGENT, HeaderValue::from_str(user_agent)?);
        }
        Ok(injector)
    }

    fn cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("hibiki"))
    }
}

async fn handle_connection(
    session: Arc<RangeSession<HttpUrlSource>>,
    stream: TcpStream,
    peer: SocketAddr,
) -> anyhow::Result<()> {
    let (reader, writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let request = GetRequest::read(&mut reader).await?;
    tracing::debug!(
        "{peer} requested /{} from offset {} (partial: {})",
        request.uri,
        request.range_offset,
        request.partial
    );
    session.process_request(&request, writer).await?;
    Ok(())
}

fn log_progress(cache_file: &Path, url: &str, percents: u8) {
    tracing::info!("{url}: {percents}% cached in {}", cache_file.display());
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .try_from_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut args = HibikiArgs::parse();
    if let Some(file) = &args.config {
        let config = Config::load(file)?;
        args = args.merge(config);
    }
    let Some(url) = args.url.clone() else {
        bail!("No url to serve. Pass --url or set it in the config file.");
    };

    let mut builder = ProxyCacheConfig::builder()
        .cache_root(args.cache_dir())
        .header_injector(Arc::new(args.header_injector()?));
    if let Some(timeout) = args.timeout {
        builder = builder.timeout(Duration::from_secs(timeout));
    }
    let config = builder.build()?;

    let proxy = config.proxy_cache(&url).await?;
    let session = Arc::new(RangeSession::new(proxy.clone()));
    session.register_cache_listener(Arc::new(log_progress));

    let listen = args
        .listen
        .unwrap_or_else(|| SocketAddr::from((Ipv4Addr::LOCALHOST, 0)));
    let listener = TcpListener::bind(listen).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(
        "Caching {url} to {}",
        config.generate_cache_file(&url).display()
    );
    println!("http://{local_addr}/");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!("Failed to accept connection: {e}");
                        continue;
                    }
                };
                let session = session.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(session, stream, peer).await {
                        // players drop connections whenever they seek
                        tracing::debug!("Connection from {peer} closed: {e}");
                    }
                });
            }
        }
    }

    proxy.shutdown().await;
    proxy.wait_until_idle().await;
    Ok(())
}
