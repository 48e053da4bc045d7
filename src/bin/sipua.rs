use clap::Parser;
use sip_useragent::{
    transport::UdpTransport, Config, Error, Result, UserAgent, UserAgentBuilder, UserAgentEvent,
};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::select;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Minimal SIP user agent")]
struct Args {
    /// JSON configuration file; flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// User part of the address-of-record
    #[arg(short, long)]
    user: Option<String>,

    /// SIP domain, e.g. example.com
    #[arg(short, long)]
    domain: Option<String>,

    #[arg(long)]
    password: Option<String>,

    /// Local port to bind
    #[arg(short, long)]
    port: Option<u16>,

    /// Outbound proxy, e.g. sip:proxy.example.com:5060
    #[arg(long)]
    proxy: Option<String>,

    /// Register with the domain's registrar on start
    #[arg(short, long)]
    register: bool,

    /// Call this URI once started
    #[arg(long)]
    call: Option<String>,

    /// Answer incoming calls instead of rejecting them
    #[arg(short, long)]
    answer: bool,
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_json(&std::fs::read_to_string(path)?)?,
        None => Config::default(),
    };
    if let Some(user) = &args.user {
        config.user_part = user.clone();
    }
    if let Some(domain) = &args.domain {
        config.domain = domain.clone();
    }
    if args.password.is_some() {
        config.password = args.password.clone();
    }
    if let Some(port) = args.port {
        config.sip_port = port;
    }
    if args.proxy.is_some() {
        config.outbound_proxy = args.proxy.clone();
    }
    if config.user_part.is_empty() {
        return Err(Error::Error("a user is required".to_string()));
    }
    Ok(config)
}

async fn on_event(ua: &UserAgent, event: UserAgentEvent, answer: bool) -> Result<()> {
    match event {
        UserAgentEvent::IncomingCall(req, dialog) => {
            info!(from = dialog.remote_uri(), id = %dialog.id(), "incoming call");
            if answer {
                ua.accept_call(&req, &dialog).await
            } else {
                ua.reject_call(&req).await
            }
        }
        UserAgentEvent::CallFailed(call_id, reason) => {
            warn!(%call_id, ?reason, "call failed");
            Ok(())
        }
        UserAgentEvent::RegistrationFailed(reason) => {
            warn!(?reason, "registration failed");
            Ok(())
        }
        event => {
            info!(?event, "event");
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_file(true)
        .with_line_number(true)
        .try_init()
        .ok();

    let args = Args::parse();
    let config = load_config(&args)?;
    let local = SocketAddr::new(
        config
            .local_inet_address
            .unwrap_or_else(|| [0, 0, 0, 0].into()),
        config.sip_port,
    );
    let external = config
        .public_inet_address
        .map(|ip| SocketAddr::new(ip, config.sip_port));
    let transport = UdpTransport::bind(local, external).await?;

    let (sender, mut events) = tokio::sync::mpsc::unbounded_channel();
    let ua = UserAgentBuilder::new()
        .with_config(config)
        .with_transport(Arc::new(transport))
        .with_event_sender(sender)
        .build()?;

    let serving = ua.clone();
    let serve_loop = tokio::spawn(async move { serving.serve().await });

    if args.register {
        ua.register().await?;
    }
    if let Some(target) = &args.call {
        ua.invite(target, None).await?;
    }

    loop {
        select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            event = events.recv() => match event {
                Some(event) => {
                    if let Err(e) = on_event(&ua, event, args.answer).await {
                        warn!("failed to handle event: {}", e);
                    }
                }
                None => break,
            }
        }
    }

    if args.register && ua.is_registered() {
        ua.unregister().await.ok();
    }
    ua.close().await;
    serve_loop.await.ok();
    Ok(())
}
