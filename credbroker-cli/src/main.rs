//! credbroker CLI
//!
//! Command-line front end for the mini-program and work platform token
//! broker. Tokens are cached in a file shared by every invocation.
//!
//! # Usage
//!
//! ```bash
//! # Print the current access token (fetching it if the cache is cold)
//! credbroker mini token
//!
//! # Force a refresh
//! credbroker work refresh
//!
//! # Call an API with refresh-and-retry
//! credbroker work get "https://qyapi.weixin.qq.com/cgi-bin/user/get?userid=zhangsan"
//!
//! # Sign a page for the JS-SDK
//! credbroker work sign nonce 1698145746 https://example.com/page
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use credbroker_core::{Platform, PlatformClient};
use serde_json::json;
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

mod config;

#[derive(Parser)]
#[command(name = "credbroker")]
#[command(about = "Access-token broker for mini-program and work platform APIs")]
#[command(version)]
struct Cli {
    /// Config file (defaults to credbroker.toml in the config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value_t = Format::Text)]
    format: Format,

    /// Platform to act on
    #[arg(value_parser = parse_platform)]
    platform: Platform,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a usable access token
    Token,

    /// Fetch a new access token regardless of the cache
    Refresh,

    /// GET an API endpoint with the access token attached
    Get {
        /// Absolute URI or path relative to the platform API base
        uri: String,
    },

    /// POST a JSON body to an API endpoint with the access token attached
    PostJson {
        /// Absolute URI or path relative to the platform API base
        uri: String,

        /// JSON request body
        body: String,
    },

    /// Exchange a mini-program login code for a session
    Code2session {
        /// Code returned by wx.login
        code: String,
    },

    /// Print the work platform jsapi ticket
    JsapiTicket,

    /// Build signed JS-SDK config for a page
    Sign {
        nonce: String,
        timestamp: i64,
        /// Page URL without its fragment
        url: String,
    },
}

fn parse_platform(s: &str) -> Result<Platform, String> {
    s.parse().map_err(|e: credbroker_core::BrokerError| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::load_config(cli.config.as_deref())?;

    init_logging(&config.log_level, cli.verbose);

    let platform_config = config
        .require(cli.platform)
        .with_context(|| format!("Cannot use the {} platform", cli.platform))?;

    let store = if platform_config.access_token.is_some() {
        None
    } else {
        Some(config::open_store(&config)?)
    };

    let client = PlatformClient::from_config(cli.platform, platform_config, store)
        .context("Failed to build platform client")?;

    run(&client, cli.command, cli.format).await
}

fn init_logging(level: &str, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(client: &PlatformClient, command: Commands, format: Format) -> Result<()> {
    match command {
        Commands::Token => {
            let token = client.access_token().await?;
            print_secret("access_token", token.expose(), format);
        }
        Commands::Refresh => {
            let token = client.refresh_access_token().await?;
            print_secret("access_token", token.expose(), format);
        }
        Commands::Get { uri } => {
            let response: serde_json::Value = client.invoker().get(&client.api_url(&uri)).await?;
            print_value(&response, format)?;
        }
        Commands::PostJson { uri, body } => {
            let params: serde_json::Value =
                serde_json::from_str(&body).context("Request body is not valid JSON")?;
            let response: serde_json::Value = client
                .invoker()
                .post_json(&client.api_url(&uri), &params)
                .await?;
            print_value(&response, format)?;
        }
        Commands::Code2session { code } => {
            let session = client.code2session(&code).await?;
            match format {
                Format::Json => println!("{}", serde_json::to_string_pretty(&session)?),
                Format::Text => {
                    println!("openid:      {}", session.openid);
                    println!("session_key: {}", session.session_key);
                    if !session.unionid.is_empty() {
                        println!("unionid:     {}", session.unionid);
                    }
                }
            }
        }
        Commands::JsapiTicket => {
            let ticket = client.jsapi_ticket().await?;
            print_secret("ticket", ticket.expose(), format);
        }
        Commands::Sign {
            nonce,
            timestamp,
            url,
        } => {
            if url.contains('#') {
                bail!("Page URL must not contain a fragment");
            }
            let signed = client.jsapi_config(&nonce, timestamp, &url).await?;
            match format {
                Format::Json => println!("{}", serde_json::to_string_pretty(&signed)?),
                Format::Text => {
                    println!("appId:     {}", signed.app_id);
                    println!("timestamp: {}", signed.timestamp);
                    println!("nonceStr:  {}", signed.nonce_str);
                    println!("signature: {}", signed.signature);
                }
            }
        }
    }
    Ok(())
}

fn print_secret(name: &str, value: &str, format: Format) {
    match format {
        Format::Json => {
            let mut object = serde_json::Map::new();
            object.insert(name.to_string(), json!(value));
            println!("{}", serde_json::Value::Object(object));
        }
        Format::Text => println!("{}", value),
    }
}

fn print_value(value: &serde_json::Value, format: Format) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string(value)?),
        Format::Text => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}
