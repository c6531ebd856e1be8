//! realtide CLI — listen to realtime topics from the terminal.
//!
//! Usage:
//! ```bash
//! # Print every change in the posts collection
//! realtide listen --url http://127.0.0.1:8090 --topic 'posts/*'
//!
//! # Several topics, authenticated
//! realtide listen --url http://127.0.0.1:8090 --topic 'posts/*' --topic 'users/abc' --token <jwt>
//! ```

use std::env;
use std::process;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use realtide_core::{AuthStore, RealtimeConfig, SubscribeOptions};
use realtide_http::HttpTransport;
use realtide_sse::RealtimeClient;

#[tokio::main]
async fn main() {
    init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "listen" => cmd_listen(&args[2..]).await,
        "version" | "--version" | "-V" => {
            println!("realtide {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

/// Log to stderr, filtered by `RUST_LOG` (default `info`).
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn print_usage() {
    println!("realtide {}", env!("CARGO_PKG_VERSION"));
    println!("Subscribe to realtime topics over Server-Sent Events\n");
    println!("USAGE:");
    println!("    realtide <COMMAND>\n");
    println!("COMMANDS:");
    println!("    listen     Print events for one or more topics until Ctrl-C");
    println!("    version    Print version");
    println!("    help       Print this help\n");
    println!("LISTEN FLAGS:");
    println!("    --url <URL>       Server base URL  [required]");
    println!("    --topic <TOPIC>   Topic to subscribe to, repeatable  [required]");
    println!("    --token <JWT>     Auth token sent when still valid");
    println!("    --lang <LANG>     Accept-Language value (default en-US)");
}

async fn cmd_listen(args: &[String]) -> Result<(), String> {
    let url = parse_flag(args, "--url").ok_or("--url is required")?;
    let topics = parse_flags(args, "--topic");
    if topics.is_empty() {
        return Err("at least one --topic is required".into());
    }

    let mut config = RealtimeConfig::new(&url);
    if let Some(lang) = parse_flag(args, "--lang") {
        config = config.with_lang(lang);
    }
    let auth = match parse_flag(args, "--token") {
        Some(token) => AuthStore::with_token(token),
        None => AuthStore::new(),
    };
    if !auth.token().is_empty() && !auth.is_valid() {
        tracing::warn!("token is expired or malformed; connecting anonymously");
    }

    let transport = HttpTransport::new(&config, Arc::new(auth)).map_err(|e| e.to_string())?;
    let client = RealtimeClient::new(Arc::new(transport), &config);

    client.on_connect(|client_id| eprintln!("connected (client id {client_id})"));
    client.on_disconnect(|topics| eprintln!("connection lost, {} topic(s) pending", topics.len()));

    let mut handles = Vec::with_capacity(topics.len());
    for topic in &topics {
        let name = topic.clone();
        let handle = client
            .subscribe(
                topic,
                move |payload| {
                    let line = serde_json::json!({ "topic": name, "data": payload });
                    println!("{line}");
                },
                SubscribeOptions::new(),
            )
            .await
            .map_err(|e| format!("subscribe {topic}: {e}"))?;
        handles.push(handle);
    }
    eprintln!("listening on {} topic(s), Ctrl-C to stop", handles.len());

    tokio::signal::ctrl_c().await.map_err(|e| e.to_string())?;
    client.disconnect().await;
    Ok(())
}

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == flag)?;
    args.get(pos + 1).cloned()
}

fn parse_flags(args: &[String], flag: &str) -> Vec<String> {
    args.windows(2)
        .filter(|pair| pair[0] == flag)
        .map(|pair| pair[1].clone())
        .collect()
}
