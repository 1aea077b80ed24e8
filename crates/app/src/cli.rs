use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use auralis_dispatch::{
    ChatHistory, ChunkTransport, GateConfig, GateRejection, Sender, SessionParts, SessionUpdate,
    spawn_session,
};
use auralis_llm::{
    ProviderStreamHandle, StreamEvent, create_provider, default_gemini_models, resolve_model_id,
};
use clap::{Args, Parser, Subcommand};
use snafu::{OptionExt, ResultExt};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use crate::error::{
    AppResult, BackendSnafu, ExplainIndexSnafu, MissingApiKeySnafu, ProviderSnafu,
    SessionTaskSnafu, SettingsSnafu, StreamSnafu, TerminalSnafu, TopicSnafu, TutorSnafu,
};
use crate::settings::{InputSurface, Settings, SettingsStore};
use crate::transport::{HttpChunkTransport, KnowledgeClient};
use crate::tutor::{TopicRequest, Tutor};

#[derive(Parser, Debug)]
#[command(name = "auralis", about = "Auralis - AI tutoring from the terminal")]
pub struct Cli {
    /// Settings file to use instead of the per-user default
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Teach the AI: stdin lines are sent in chunks as you go
    Teach(TeachArgs),
    /// Let the AI teach you a topic
    Learn(LearnArgs),
    /// Retrieve context for a query and print it as paragraph groups
    Split {
        /// Knowledge model to retrieve from
        model: String,
        query: String,
    },
    /// List the known Gemini models
    Models,
    /// Show or change saved settings
    Config(ConfigArgs),
}

#[derive(Args, Debug, Default)]
pub struct TeachArgs {
    /// Use the full-screen quiet interval instead of the widget one
    #[arg(long)]
    pub full_screen: bool,
}

#[derive(Args, Debug, Default)]
pub struct LearnArgs {
    pub topic: String,

    /// Reference link to steer the subtopics (repeatable)
    #[arg(long = "tag", value_name = "URL")]
    pub tags: Vec<String>,

    #[arg(long)]
    pub auto_search: bool,

    /// Document the topic is based on
    #[arg(long, value_name = "PATH")]
    pub attach: Option<PathBuf>,

    /// Stream the explanation for subtopic N (1-based)
    #[arg(long, value_name = "N")]
    pub explain: Option<usize>,
}

#[derive(Args, Debug, Default)]
pub struct ConfigArgs {
    #[arg(long)]
    pub api_key: Option<String>,
    #[arg(long)]
    pub model: Option<String>,
    #[arg(long)]
    pub chunk_url: Option<String>,
    #[arg(long)]
    pub rag_url: Option<String>,
    #[arg(long)]
    pub split_url: Option<String>,
    #[arg(long)]
    pub threshold_words: Option<usize>,
}

impl ConfigArgs {
    fn is_empty(&self) -> bool {
        self.api_key.is_none()
            && self.model.is_none()
            && self.chunk_url.is_none()
            && self.rag_url.is_none()
            && self.split_url.is_none()
            && self.threshold_words.is_none()
    }

    fn apply(self, mut settings: Settings) -> Settings {
        if let Some(api_key) = self.api_key {
            settings.api_key = api_key;
        }
        if let Some(model) = self.model {
            settings.model = model;
        }
        if let Some(chunk_url) = self.chunk_url {
            settings.chunk_url = chunk_url;
        }
        if let Some(rag_url) = self.rag_url {
            settings.rag_url = rag_url;
        }
        if let Some(split_url) = self.split_url {
            settings.split_url = split_url;
        }
        if let Some(threshold_words) = self.threshold_words {
            settings.threshold_words = threshold_words;
        }
        settings
    }
}

/// One line typed during `teach`.
#[derive(Debug, Clone, PartialEq, Eq)]
enum TeachLine {
    Text(String),
    Send,
    Stop,
    NewTurn,
    Quit,
}

impl TeachLine {
    fn parse(line: &str) -> Self {
        match line.trim() {
            "/send" => Self::Send,
            "/stop" => Self::Stop,
            "/new" => Self::NewTurn,
            "/quit" | "/exit" => Self::Quit,
            _ => Self::Text(line.to_string()),
        }
    }
}

pub async fn run(cli: Cli) -> AppResult<()> {
    let store = match cli.config {
        Some(path) => SettingsStore::new(path),
        None => SettingsStore::load(),
    };

    match cli.command {
        Command::Teach(args) => teach(&store.settings(), args).await,
        Command::Learn(args) => learn(&store, args).await,
        Command::Split { model, query } => split(&store.settings(), &model, &query).await,
        Command::Models => {
            list_models(&store.settings());
            Ok(())
        }
        Command::Config(args) => configure(&store, args),
    }
}

async fn teach(settings: &Settings, args: TeachArgs) -> AppResult<()> {
    let surface = if args.full_screen {
        InputSurface::FullScreen
    } else {
        InputSurface::Widget
    };
    let config = settings.gate_config(surface);
    let transport = HttpChunkTransport::new(&settings.chunk_url);
    tracing::info!(
        endpoint = %transport.endpoint(),
        threshold_words = config.threshold_words,
        quiet_ms = config.quiet.as_millis() as u64,
        "starting teaching session"
    );

    println!("Explain anything. /send submits, /stop ends the turn, /new starts one, /quit exits.");
    let input = BufReader::new(tokio::io::stdin());
    let history = run_teaching(input, config, Arc::new(transport)).await?;

    tracing::info!(messages = history.len(), "teaching session ended");
    Ok(())
}

/// Feeds `input` line by line into a teaching session until `/quit` or end of input.
///
/// Words still waiting for the quiet interval are sent before the session ends, and
/// replies already in flight are collected into the returned history.
async fn run_teaching<R>(
    input: R,
    config: GateConfig,
    transport: Arc<dyn ChunkTransport>,
) -> AppResult<ChatHistory>
where
    R: AsyncBufRead + Unpin,
{
    let SessionParts {
        handle,
        mut updates,
        worker,
    } = spawn_session(config, transport);
    let worker = tokio::spawn(worker);
    let printer = tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            print_update(&update);
        }
    });

    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await.context(TerminalSnafu {
        stage: "teach-read-line",
    })? {
        let accepted = match TeachLine::parse(&line) {
            TeachLine::Text(text) => handle.append(text),
            TeachLine::Send => handle.submit(),
            TeachLine::Stop => handle.stop(),
            TeachLine::NewTurn => handle.start_turn(),
            TeachLine::Quit => break,
        };
        if !accepted {
            tracing::warn!("teaching session is no longer running");
            break;
        }
    }

    handle.shutdown();
    drop(handle);
    let history = worker.await.context(SessionTaskSnafu {
        stage: "teach-join-session",
    })?;
    printer.await.context(SessionTaskSnafu {
        stage: "teach-join-printer",
    })?;
    Ok(history)
}

fn print_update(update: &SessionUpdate) {
    match update {
        SessionUpdate::Dispatched(event) => {
            tracing::debug!(
                dispatch_id = event.id.0,
                trigger = ?event.trigger,
                "chunk dispatched"
            );
        }
        SessionUpdate::MessageAppended(message) => match message.sender {
            Sender::User => println!("you: {}", message.text),
            Sender::Ai => println!("ai:  {}", message.text),
        },
        SessionUpdate::InputRejected(GateRejection::TurnClosed) => {
            println!("(turn is closed, type /new to start another)");
        }
    }
}

fn build_tutor(store: &SettingsStore) -> AppResult<Tutor> {
    let settings = store.settings();
    let provider_config = settings.to_provider_config().context(MissingApiKeySnafu {
        stage: "build-tutor",
        path: store.config_path().display().to_string(),
    })?;
    let provider = create_provider(provider_config).context(ProviderSnafu {
        stage: "build-tutor",
    })?;

    Ok(Tutor::new(provider, resolve_model_id(&settings.model)))
}

async fn learn(store: &SettingsStore, args: LearnArgs) -> AppResult<()> {
    let mut request = TopicRequest::new(args.topic);
    for tag in &args.tags {
        request.add_tag(tag).context(TopicSnafu { stage: "learn-tags" })?;
    }
    request.auto_search = args.auto_search;
    request.attachment = args.attach;
    request.validate().context(TopicSnafu {
        stage: "learn-validate",
    })?;

    let tutor = build_tutor(store)?;
    let subtopics = tutor.request_subtopics(&request).await.context(TutorSnafu {
        stage: "learn-subtopics",
    })?;
    for (index, subtopic) in subtopics.iter().enumerate() {
        println!("{:>2}. {subtopic}", index + 1);
    }

    let Some(number) = args.explain else {
        return Ok(());
    };
    let subtopic = number
        .checked_sub(1)
        .and_then(|index| subtopics.get(index))
        .context(ExplainIndexSnafu {
            stage: "learn-explain",
            index: number,
            available: subtopics.len(),
        })?;

    println!();
    let handle = tutor.stream_explanation(subtopic).context(TutorSnafu {
        stage: "learn-explain",
    })?;
    print_stream(handle).await
}

async fn print_stream(handle: ProviderStreamHandle) -> AppResult<()> {
    let ProviderStreamHandle { mut stream, worker } = handle;
    let worker = tokio::spawn(worker);
    let mut stdout = std::io::stdout();

    let mut outcome = Ok(());
    while let Some(event) = stream.recv().await {
        match event {
            StreamEvent::Delta(text) => {
                write!(stdout, "{text}")
                    .and_then(|()| stdout.flush())
                    .context(TerminalSnafu {
                        stage: "print-explanation",
                    })?;
            }
            StreamEvent::Done => break,
            StreamEvent::Error(message) => {
                outcome = StreamSnafu {
                    stage: "print-explanation",
                    message,
                }
                .fail();
                break;
            }
        }
    }
    println!();

    drop(stream);
    worker.await.context(SessionTaskSnafu {
        stage: "join-explanation-stream",
    })?;
    outcome
}

async fn split(settings: &Settings, model: &str, query: &str) -> AppResult<()> {
    let client = KnowledgeClient::new(&settings.rag_url, &settings.split_url);
    let groups = client
        .retrieve_and_split(model, query)
        .await
        .context(BackendSnafu {
            stage: "retrieve-and-split",
        })?;

    if groups.is_empty() {
        println!("No content found for \"{query}\".");
        return Ok(());
    }
    for (index, group) in groups.iter().enumerate() {
        println!("== Part {} ==", index + 1);
        for paragraph in group {
            println!("{paragraph}\n");
        }
    }
    Ok(())
}

fn list_models(settings: &Settings) {
    let configured = resolve_model_id(&settings.model);
    for model in default_gemini_models() {
        let marker = if model.id == configured { "*" } else { " " };
        match &model.description {
            Some(description) => println!("{marker} {:<24} {description}", model.id),
            None => println!("{marker} {}", model.id),
        }
    }
}

fn configure(store: &SettingsStore, args: ConfigArgs) -> AppResult<()> {
    if !args.is_empty() {
        store.update(|saved| args.apply(saved)).context(SettingsSnafu {
            stage: "config-update",
        })?;
    }

    let settings = store.settings();
    println!("settings file: {}", store.config_path().display());
    println!("api key:       {}", if settings.has_api_key() { "set" } else { "missing" });
    println!("model:         {}", settings.model);
    println!("chunk url:     {}", settings.chunk_url);
    println!("rag url:       {}", settings.rag_url);
    println!("split url:     {}", settings.split_url);
    println!("threshold:     {} words", settings.threshold_words);
    println!(
        "quiet:         {} ms widget, {} ms full screen",
        settings.widget_quiet_ms, settings.full_screen_quiet_ms
    );
    Ok(())
}
