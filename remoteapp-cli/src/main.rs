use std::borrow::Cow;
use std::path::PathBuf;

use anyhow::Context as AnyhowContext;
use clap::{Parser, Subcommand};
use flexi_logger::{FileSpec, LevelFilter, LogSpecification, Logger, LoggerHandle, WriteMode};

use remoteapp::{Context, DefaultContext};

mod target;

mod install;
use install::Install;

mod call;
use call::Call;

mod status;
use status::Status;

mod stop;
use stop::Stop;

mod uninstall;
use uninstall::Uninstall;

#[derive(Parser)]
#[command(name = "remoteapp")]
#[command(version)]
struct Cli {
    /// `-e`, `--log-stderr`: Flag value, when enabled will cause logs to be output to `stderr`
    /// instead of a log file. Disabled by default (logs go to a file by default)
    #[arg(short = 'e', long, help = "Log to stderr instead of a file", action = clap::ArgAction::SetTrue, default_value_t = false)]
    log_stderr: bool,

    /// `-f`, `--log-file`: Path to desired log output file location. Optional, defaults to
    /// `$REMOTEAPP_PROJECT_HOME/remoteapp.log`
    #[arg(short = 'f', long, help = "Send log output to the given file")]
    log_file: Option<PathBuf>,

    /// `-s`, `--log-spec`: Log specification for [flexi_logger](https://docs.rs/flexi_logger/latest/flexi_logger/struct.LogSpecification.html)
    #[arg(short = 's', long, help = "Log spec for flexi_logger")]
    log_spec: Option<String>,

    /// `-l`, `--log-level`: Set the desired log verbosity. Defaults to 0, all values are listed
    /// below:
    ///
    /// | Value | Log Level |
    /// | ----- | --------- |
    /// | **0** | **Warn** |
    /// | 1 | Info |
    /// | 2 | Debug |
    /// | 3 | Trace |
    #[arg(
        short = 'l',
        long,
        help = "Set the log level, 0 = warn, 1 = info, etc",
        long_help = None,
        default_value_t = 0
    )]
    log_level: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install the helper app for a user
    #[command()]
    Install(Install),

    /// Call a method on a system service as the helper app
    ///
    /// The result is printed as JSON.
    #[command()]
    Call(Call),

    /// Show whether the helper app is installed and running for a user
    #[command()]
    Status(Status),

    /// Kill the helper app's process for a user
    #[command()]
    Stop(Stop),

    /// Uninstall the helper app for a user
    #[command()]
    Uninstall(Uninstall),
}

fn level_filter(log_level: u8) -> LevelFilter {
    match log_level {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

impl Cli {
    fn configure_loggers(&self, ctx: &DefaultContext) -> anyhow::Result<LoggerHandle> {
        let log_spec = match &self.log_spec {
            Some(s) => {
                LogSpecification::parse(s).with_context(|| format!("parsing log spec {}", s))?
            }
            None => {
                if self.log_level > 0 {
                    LogSpecification::builder()
                        .module("remoteapp", level_filter(self.log_level))
                        .build()
                } else {
                    LogSpecification::env().with_context(|| "getting log spec from env")?
                }
            }
        };

        let mut logger = Logger::with(log_spec);

        if !self.log_stderr {
            let path = match &self.log_file {
                Some(v) => {
                    if v.is_absolute() {
                        Some(Cow::Borrowed(v))
                    } else {
                        let full_path = std::env::current_dir()?.join(v);
                        Some(Cow::Owned(full_path))
                    }
                }
                None => ctx
                    .get_project_dir()
                    .map(|it| Cow::Owned(it.join("remoteapp.log")))
                    .ok(),
            };

            if let Some(p) = &path {
                logger = logger
                    .log_to_file(
                        FileSpec::try_from(p.as_ref()).with_context(|| "creating filespec")?,
                    )
                    .append()
                    .write_mode(WriteMode::BufferAndFlush);
            }
        }

        logger.start().with_context(|| "starting logger")
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let ctx = DefaultContext::default();

    let log_handle = cli.configure_loggers(&ctx)?;

    let res = match cli.command {
        Commands::Install(c) => c.run(&ctx),
        Commands::Call(c) => c.run(&ctx),
        Commands::Status(c) => c.run(&ctx),
        Commands::Stop(c) => c.run(&ctx),
        Commands::Uninstall(c) => c.run(&ctx),
    };

    log_handle.flush();
    res
}
