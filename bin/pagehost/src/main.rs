mod commands;

use clap::{Parser, Subcommand};
use pagehost_core::{Config, Paths};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pagehost")]
#[command(about = "Drive a persistent Chrome session from the command line", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Navigate to URL
    Navigate {
        url: String,

        /// load, domcontentloaded or networkidle
        #[arg(long)]
        wait_until: Option<String>,
    },

    /// Click element (CSS, text=, xpath=, or role format like: button "Submit")
    Click {
        selector: String,

        /// Bypass actionability checks
        #[arg(long)]
        force: bool,

        /// Double click
        #[arg(long)]
        double: bool,
    },

    /// Fill input field
    Fill {
        selector: String,

        /// Value to fill; multiple words are joined with spaces
        #[arg(required = true, num_args = 1.., allow_hyphen_values = true)]
        value: Vec<String>,
    },

    /// Select dropdown option
    Select {
        selector: String,
        value: String,

        /// value, label or index
        #[arg(long)]
        by: Option<String>,
    },

    /// Wait for element state
    Wait {
        selector: String,

        /// visible, hidden, attached or detached
        #[arg(long)]
        state: Option<String>,
    },

    /// Print the accessibility snapshot of the page
    Snapshot {
        selector: Option<String>,

        /// Save to file instead of printing
        #[arg(long)]
        file: Option<String>,
    },

    /// Get text content from element
    #[command(name = "get_text", alias = "get-text")]
    GetText {
        selector: String,

        /// Text of every match
        #[arg(long)]
        all: bool,
    },

    /// Get HTML from element
    #[command(name = "get_html", alias = "get-html")]
    GetHtml {
        selector: String,

        /// Include the element's own tag
        #[arg(long)]
        outer: bool,
    },

    /// Capture screenshot of page
    Screenshot {
        path: Option<String>,

        /// Capture the full scrollable page
        #[arg(long)]
        full_page: bool,

        /// Capture a single element
        #[arg(long)]
        selector: Option<String>,

        /// png or jpeg
        #[arg(long = "type")]
        image_type: Option<String>,
    },

    /// Export page as PDF (requires headless mode)
    Pdf {
        path: Option<String>,

        /// A4 or Letter
        #[arg(long)]
        format: Option<String>,

        #[arg(long)]
        landscape: bool,
    },

    /// Run JavaScript in page context
    Evaluate {
        #[arg(required = true, num_args = 1.., allow_hyphen_values = true)]
        script: Vec<String>,
    },

    /// Close the browser
    Close,

    /// List available tools
    Tools,

    /// Launch Chrome with remote debugging (background unless --fg)
    Launch {
        #[arg(long)]
        headless: bool,

        /// Open DevTools for every tab
        #[arg(long)]
        devtools: bool,

        /// Stay in the foreground
        #[arg(long)]
        fg: bool,
    },

    /// Start recording the browser to a video
    #[command(name = "record-start")]
    RecordStart {
        /// Output file (default: recording-<timestamp>.mp4)
        output: Option<String>,

        #[arg(long, default_value_t = pagehost_tools::browser::recorder::DEFAULT_WIDTH)]
        width: u32,

        #[arg(long, default_value_t = pagehost_tools::browser::recorder::DEFAULT_HEIGHT)]
        height: u32,
    },

    /// Stop the active recording and save the video
    #[command(name = "record-stop")]
    RecordStop,

    /// Run the JSON-RPC host on stdio
    #[command(hide = true)]
    Serve,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logs go to stderr: the host's stdout carries JSON-RPC.
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", commands::error_message(&e));
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;

    if let Some((tool, params)) = commands::call::tool_call(&cli.command) {
        return commands::call::run(&config, cli.verbose, tool, params).await;
    }

    match cli.command {
        Commands::Tools => commands::tools_cmd::list(&config, cli.verbose).await,
        Commands::Launch {
            headless,
            devtools,
            fg,
        } => commands::launch::run(&paths, config, headless, devtools, fg).await,
        Commands::RecordStart {
            output,
            width,
            height,
        } => commands::record::start(&paths, &config, output, width, height).await,
        Commands::RecordStop => commands::record::stop(&paths).await,
        Commands::Serve => commands::serve::run(&paths, config).await,
        // Tool subcommands were dispatched above.
        _ => Ok(0),
    }
}
