//! # Chaser-Locator 命令行入口
//!
//! 离线解析选择器，或连接到页面级 CDP WebSocket 端点执行定位器操作。
//!
//! ## 子命令
//! - `parse`: 输出选择器的解析结果（JSON）
//! - `resolve`: 输出选择器对应的查询方言和去掉前缀后的选择器
//! - `wait` / `click` / `hover` / `fill` / `scroll`: 在页面上执行定位器操作
//!
//! ## 环境变量
//! - `CHASER_CDP_ENDPOINT`: 页面 CDP WebSocket 端点
//! - `CHASER_DEFAULT_TIMEOUT`: 定位器默认超时（毫秒）
//! - `CHASER_LOG_LEVEL`: 日志级别（`RUST_LOG` 优先）

use chaser_locator::{
    config::Config,
    locator::{ActionOptions, LocatorClickOptions, LocatorScrollOptions},
    query::QueryHandler,
    selector::parse as parse_selector,
    session::{CdpFrame, MouseButton, PageContext},
    CustomQuerySelectorRegistry, Locator, PageLocatorExt, Visibility,
};
use clap::{Parser, Subcommand, ValueEnum};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(long, short)]
    config: Option<String>,

    /// Page-level CDP WebSocket endpoint
    #[arg(long, env = "CHASER_CDP_ENDPOINT")]
    endpoint: Option<String>,

    /// Locator timeout in milliseconds, 0 waits forever
    #[arg(long)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the parse result of a selector
    Parse { selector: String },
    /// Print the dialect and selector a prefixed selector resolves to
    Resolve { selector: String },
    /// Wait until the selector matches
    Wait {
        selector: String,
        #[arg(long, conflicts_with = "hidden")]
        visible: bool,
        #[arg(long)]
        hidden: bool,
    },
    Click {
        selector: String,
        #[arg(long, value_enum, default_value_t = Button::Left)]
        button: Button,
        #[arg(long, default_value_t = 1)]
        count: u32,
        /// Milliseconds between press and release
        #[arg(long, default_value_t = 0)]
        delay: u64,
    },
    Hover { selector: String },
    Fill { selector: String, value: String },
    Scroll {
        selector: String,
        #[arg(long)]
        top: Option<f64>,
        #[arg(long)]
        left: Option<f64>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Button {
    Left,
    Right,
    Middle,
}

impl From<Button> for MouseButton {
    fn from(button: Button) -> Self {
        match button {
            Button::Left => MouseButton::Left,
            Button::Right => MouseButton::Right,
            Button::Middle => MouseButton::Middle,
        }
    }
}

fn load_config(args: &Args) -> chaser_locator::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    config.apply_env()?;
    if let Some(endpoint) = &args.endpoint {
        config.cdp_endpoint = endpoint.clone();
    }
    if let Some(timeout) = args.timeout {
        config.default_timeout = timeout;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(&args)?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let registry = Arc::new(CustomQuerySelectorRegistry::new());

    match &args.command {
        Command::Parse { selector } => {
            let result = parse_selector(selector);
            println!("{}", serde_json::to_string_pretty(&result)?);
            return Ok(());
        }
        Command::Resolve { selector } => {
            let (stripped, handler) = registry.get_query_handler_and_selector(selector);
            println!("{}\t{}", handler.dialect(), stripped);
            return Ok(());
        }
        _ => {}
    }

    info!("Chaser-Locator v{}", chaser_locator::VERSION);
    let frame = CdpFrame::connect(&config, registry).await?;
    let page: Arc<dyn PageContext> = frame.clone();

    let signal = CancellationToken::new();
    tokio::spawn({
        let signal = signal.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Received Ctrl+C, cancelling");
                signal.cancel();
            }
        }
    });

    let locator = |selector: &str| -> Locator {
        let mut locator = page.locator(selector);
        locator.set_timeout(config.default_timeout);
        locator
    };
    let action = ActionOptions {
        signal: Some(signal.clone()),
    };

    match args.command {
        Command::Parse { .. } | Command::Resolve { .. } => {}
        Command::Wait {
            selector,
            visible,
            hidden,
        } => {
            let mut locator = locator(&selector);
            if visible {
                locator.set_visibility(Some(Visibility::Visible));
            } else if hidden {
                locator.set_visibility(Some(Visibility::Hidden));
            }
            locator.wait(action).await?;
            println!("Found {}", selector);
        }
        Command::Click {
            selector,
            button,
            count,
            delay,
        } => {
            locator(&selector)
                .click(LocatorClickOptions {
                    button: button.into(),
                    count,
                    delay,
                    offset: None,
                    signal: Some(signal.clone()),
                })
                .await?;
            println!("Clicked {}", selector);
        }
        Command::Hover { selector } => {
            locator(&selector).hover(action).await?;
            println!("Hovered {}", selector);
        }
        Command::Fill { selector, value } => {
            locator(&selector).fill(&value, action).await?;
            println!("Filled {}", selector);
        }
        Command::Scroll {
            selector,
            top,
            left,
        } => {
            locator(&selector)
                .scroll(LocatorScrollOptions {
                    scroll_top: top,
                    scroll_left: left,
                    signal: Some(signal.clone()),
                })
                .await?;
            let (x, y) = chaser_locator::session::frame::scroll_position(page.as_ref()).await?;
            println!("Scrolled {} (page at {}, {})", selector, x, y);
        }
    }

    frame.world().connection().close().await?;
    Ok(())
}
