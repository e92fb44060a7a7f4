mod cli;
mod output;

use std::process;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use nicolive::{
    ApiConfig, CommentEvent, CommentServer, CommentSession, ConnectionParams, Mail, NicoliveApi,
    SessionConfig, find_live_id,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::cli::Args;
use crate::output::format_event;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    if let Err(e) = run(args).await {
        error!("Application error: {:#}", e);
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_level(verbose),
        )
        .init();
}

async fn run(args: Args) -> Result<()> {
    let token = CancellationToken::new();
    let config = SessionConfig::default().with_read_timeout(args.read_timeout);

    let api = NicoliveApi::new(
        ApiConfig {
            base_url: args.api_base_url.clone(),
            ..ApiConfig::default()
        },
        args.user_session.clone(),
    )?;

    let target = resolve_server(&args, &api).await?;
    let mut session = match target {
        Target::Direct(params) => {
            if args.post {
                bail!("posting needs a live id so the broadcast base time is known");
            }
            CommentSession::open(params, args.res_from, config, &token).await?
        }
        Target::Broadcast(server) => {
            CommentSession::connect(&server, args.res_from, Arc::new(api), config, &token).await?
        }
    };
    info!("Connected to {}", session.params().addr());

    let mut events = session
        .take_events()
        .ok_or_else(|| anyhow!("event stream already taken"))?;
    let session = Arc::new(session);

    let ctrl_c = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, closing");
            ctrl_c.cancel();
        }
    });

    if args.post {
        let mail = Mail {
            anonymous: args.anonymous,
            color: args.color,
            size: args.size,
            position: args.position,
        };
        tokio::spawn(post_stdin(session.clone(), mail, token.clone()));
    }

    let mut failed = false;
    while let Some(event) = events.recv().await {
        if let CommentEvent::DecodeError(e) = &event {
            failed |= e.is_terminal();
        }
        println!("{}", format_event(&event, args.output)?);
    }

    session.close().await;
    if failed {
        bail!("comment connection failed");
    }
    Ok(())
}

enum Target {
    Direct(ConnectionParams),
    Broadcast(CommentServer),
}

async fn resolve_server(args: &Args, api: &NicoliveApi) -> Result<Target> {
    if let (Some(host), Some(port), Some(thread)) = (&args.host, args.port, args.thread) {
        return Ok(Target::Direct(ConnectionParams::new(host, port, thread)));
    }

    let input = args
        .live
        .as_deref()
        .ok_or_else(|| anyhow!("either a live id or --host/--port/--thread is required"))?;
    let live_id =
        find_live_id(input).with_context(|| format!("no live id found in `{input}`"))?;

    debug!("Looking up player status for {}", live_id);
    let status = api
        .player_status(live_id)
        .await
        .with_context(|| format!("failed to look up {live_id}"))?;
    info!("{} - {}", status.stream.id, status.stream.title);

    Ok(Target::Broadcast(status.comment_server()?))
}

async fn post_stdin(session: Arc<CommentSession>, mail: Mail, token: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = token.cancelled() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read stdin: {}", e);
                break;
            }
        };

        let content = line.trim();
        if content.is_empty() {
            continue;
        }
        if let Err(e) = session.post(content, mail).await {
            warn!("Failed to post comment: {}", e);
            if !session.is_open() {
                break;
            }
        }
    }
}
