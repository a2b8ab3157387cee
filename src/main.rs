use ai_relay::config::{Settings, SEARCH_CACHE_MAX_ENTRIES};
use ai_relay::dispatch::{Dispatcher, SearchCache};
use ai_relay::llm::{ProviderCatalog, ProviderId, ProviderSet, RequestSpec};
use ai_relay::sinks::{ChannelNotifier, ErrorSink, Operation, TracingErrorSink};
use ai_relay::styles::ChatStyle;
use ai_relay::tasks::payload::{PayloadLocator, TelegramFileResolver};
use ai_relay::tasks::{spawn_sweeper, spawn_task_registry, TaskExecutor, TaskKind, TaskStatus};
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use dotenvy::dotenv;
use regex::Regex;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "ai-relay", about = "Send prompts through the provider fallback chain")]
struct Args {
    /// User id attached to error events
    #[arg(long, default_value = "SYSTEM")]
    user: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ask a question
    Chat {
        /// Provider tried first
        #[arg(long)]
        provider: Option<String>,
        /// Persona (normal, tsundere, ...)
        #[arg(long, default_value = "normal")]
        style: String,
        /// Prompt text
        #[arg(required = true, trailing_var_arg = true)]
        prompt: Vec<String>,
    },
    /// Summarize web results for a query
    Search {
        #[arg(required = true, trailing_var_arg = true)]
        query: Vec<String>,
    },
    /// Analyze a Telegram document or photo in the background
    Analyze {
        #[arg(value_enum)]
        kind: AnalyzeKind,
        /// Telegram `file_id`
        file_id: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum AnalyzeKind {
    Document,
    Image,
}

impl From<AnalyzeKind> for TaskKind {
    fn from(kind: AnalyzeKind) -> Self {
        match kind {
            AnalyzeKind::Document => Self::Document,
            AnalyzeKind::Image => Self::Image,
        }
    }
}

/// Masks configured secrets and Telegram bot tokens
struct RedactionPatterns {
    bot_url: Regex,
    bot_token: Regex,
    gemini_key: Regex,
    secrets: Vec<String>,
}

impl RedactionPatterns {
    fn new(secrets: Vec<String>) -> Result<Self, regex::Error> {
        Ok(Self {
            bot_url: Regex::new(r"(https?://[^/]+/(?:file/)?bot)([0-9]+:[A-Za-z0-9_-]+)")?,
            bot_token: Regex::new(r"([0-9]{8,10}:[A-Za-z0-9_-]{35})")?,
            gemini_key: Regex::new(r"([?&]key=)[^&\s]+")?,
            secrets,
        })
    }

    fn redact(&self, input: &str) -> String {
        let mut output = self
            .bot_url
            .replace_all(input, "$1[TELEGRAM_TOKEN]")
            .to_string();
        output = self
            .bot_token
            .replace_all(&output, "[TELEGRAM_TOKEN]")
            .to_string();
        output = self
            .gemini_key
            .replace_all(&output, "$1[MASKED]")
            .to_string();
        for secret in &self.secrets {
            output = output.replace(secret.as_str(), "[MASKED]");
        }
        output
    }
}

struct RedactingWriter<W: Write> {
    inner: W,
    patterns: Arc<RedactionPatterns>,
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        self.inner.write_all(self.patterns.redact(&s).as_bytes())?;
        // Report the original length even though the redacted text differs
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct RedactingMakeWriter<F> {
    make_inner: F,
    patterns: Arc<RedactionPatterns>,
}

impl<'a, F, W> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter<F>
where
    F: Fn() -> W + 'static,
    W: Write,
{
    type Writer = RedactingWriter<W>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter {
            inner: (self.make_inner)(),
            patterns: self.patterns.clone(),
        }
    }
}

fn init_logging(patterns: Arc<RedactionPatterns>) {
    let make_writer = RedactingMakeWriter {
        make_inner: io::stderr,
        patterns,
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let args = Args::parse();

    // Settings first: their secrets feed the log redaction
    let settings = Settings::new().context("Failed to load settings")?;
    let patterns = Arc::new(RedactionPatterns::new(settings.secrets())?);
    init_logging(patterns);

    let error_sink: Arc<dyn ErrorSink> = Arc::new(TracingErrorSink);

    let catalog = ProviderCatalog::from_settings(&settings);
    let providers = ProviderSet::from_settings(&settings);
    for id in catalog.ids() {
        if !providers.is_available(id) {
            warn!(provider = %id, "No API key configured");
        }
    }

    let dispatcher = Arc::new(
        Dispatcher::new(
            catalog,
            providers,
            settings.dispatch_config(),
            error_sink.clone(),
        )
        .with_default_provider(settings.default_provider())
        .with_search_cache(SearchCache::new(
            Duration::from_secs(settings.search_cache_ttl_secs),
            SEARCH_CACHE_MAX_ENTRIES,
        )),
    );

    match args.command {
        Command::Chat {
            provider,
            style,
            prompt,
        } => {
            let style: ChatStyle = style.parse()?;
            let mut spec = RequestSpec::new(prompt.join(" ")).with_style(style);
            if let Some(name) = provider {
                spec = spec.with_preferred_provider(name.parse::<ProviderId>()?);
            }
            let spec = spec.for_owner(args.user, Operation::Chat);

            let outcome = dispatcher.dispatch(&spec).await?;
            print_answer(&dispatcher, outcome.provider, &outcome.text);
        }
        Command::Search { query } => {
            let outcome = dispatcher.search(&query.join(" "), &args.user).await?;
            print_answer(&dispatcher, outcome.provider, &outcome.text);
        }
        Command::Analyze { kind, file_id } => {
            analyze(&settings, dispatcher, error_sink, &args.user, kind.into(), file_id).await?;
        }
    }

    Ok(())
}

fn print_answer(dispatcher: &Dispatcher, provider: ProviderId, text: &str) {
    match dispatcher.catalog().get(provider) {
        Some(descriptor) => println!("{} {}\n\n{text}", descriptor.emoji, descriptor.display_name),
        None => println!("{text}"),
    }
}

async fn analyze(
    settings: &Settings,
    dispatcher: Arc<Dispatcher>,
    error_sink: Arc<dyn ErrorSink>,
    user: &str,
    kind: TaskKind,
    file_id: String,
) -> Result<()> {
    let task_config = settings.task_config();
    let resolver = TelegramFileResolver::from_settings(settings, &task_config)
        .ok_or_else(|| anyhow!("TELEGRAM_TOKEN is required for analysis"))?;

    let registry = spawn_task_registry(&task_config);
    let shutdown = CancellationToken::new();
    let sweeper = spawn_sweeper(registry.clone(), task_config.sweep_interval, shutdown.clone());

    let (notifier, mut notifications) = ChannelNotifier::new();
    let executor = TaskExecutor::new(
        registry,
        dispatcher,
        Arc::new(resolver),
        Arc::new(notifier),
        error_sink,
        settings.analysis_routing(),
    );

    let task_id = executor
        .submit(kind, user, PayloadLocator::new(file_id))
        .await?;
    info!(task_id = %task_id, "Waiting for analysis");

    let notification = notifications
        .recv()
        .await
        .ok_or_else(|| anyhow!("Executor stopped before task {task_id} finished"))?;

    shutdown.cancel();
    sweeper.await?;

    let task = notification.task;
    match task.status {
        TaskStatus::Completed => {
            println!("{}", task.result.unwrap_or_default());
            Ok(())
        }
        _ => Err(anyhow!(
            "Task {} failed ({}): {}",
            task.id,
            task.failure_kind
                .map_or_else(|| "unknown".to_string(), |kind| kind.to_string()),
            task.error_message.unwrap_or_default()
        )),
    }
}
