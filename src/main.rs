mod audio;
mod config;
mod db;
mod detector;
mod export;
mod llm;
mod media;
mod pipeline;
mod scenes;
mod server;
mod transcriber;
mod visual;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::Settings;
use crate::db::Database;
use crate::detector::GeminiObjectDetector;
use crate::llm::GeminiClient;
use crate::pipeline::HighlightService;
use crate::transcriber::Transcriber;

#[derive(Parser)]
#[command(
    name = "vidsage",
    about = "Extract searchable highlights from videos and answer questions about them"
)]
struct Cli {
    /// debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the pgvector extension and apply migrations
    InitDb {
        /// Drop and recreate the tables (only while no highlight is stored)
        #[arg(long)]
        reset: bool,
    },

    /// Show duration, resolution and frame rate of a video
    Probe {
        video: PathBuf,
    },

    /// Transcribe the speech of a video
    Transcribe {
        video: PathBuf,
        /// Write `[start - end] text` lines to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Language code (e.g. en, it). "auto" for detection
        #[arg(long)]
        language: Option<String>,
    },

    /// Detect scene boundaries in a video
    Scenes {
        video: PathBuf,
    },

    /// Find the spans of a video that contain speech
    Speech {
        video: PathBuf,
        /// Also transcribe every span
        #[arg(long)]
        transcribe: bool,
    },

    /// Sample frames and flag key frames and visual changes
    Frames {
        video: PathBuf,
        /// Maximum number of frames to sample
        #[arg(short, long, default_value = "60")]
        max: usize,
    },

    /// Full pipeline: scenes → transcript → highlights → embeddings → database
    Process {
        /// Videos to process. Defaults to every video in VIDEOS_DIR
        videos: Vec<PathBuf>,
    },

    /// List stored videos
    Videos,

    /// Show the highlights of a stored video
    Highlights {
        video_id: i32,
        /// Maximum number of highlights
        #[arg(short, long)]
        n: Option<usize>,
        /// Output CSV file path ("-" for stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Highlights similar to one stored highlight
    Similar {
        video_id: i32,
        highlight_id: i32,
        /// Number of results
        #[arg(short, long, default_value = "5")]
        n: usize,
    },

    /// Ask a question and show the most relevant highlights
    Ask {
        question: String,
        /// Number of results (defaults to RETRIEVAL_LIMIT)
        #[arg(short, long)]
        n: Option<usize>,
    },

    /// Delete a stored video and its highlights
    Delete {
        video_id: i32,
    },

    /// Insert sample highlights into an empty database
    Seed,

    /// List the Gemini models available to the configured key
    Models,

    /// Start the question-answering web API
    Serve {
        /// Listen address (defaults to BIND_ADDR)
        #[arg(long)]
        addr: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let env_file = config::load_env_file();
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    if let Some(path) = env_file {
        debug!("loaded environment from {}", path.display());
    }

    if let Err(e) = run(cli.command).await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "vidsage=debug,tower_http=debug"
    } else {
        "vidsage=info,tower_http=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(command: Command) -> Result<()> {
    let settings = Settings::from_env().context("invalid configuration")?;

    match command {
        Command::InitDb { reset } => {
            let db = connect(&settings).await?;
            db.init_schema(reset).await?;
            println!("database ready ({} highlight(s))", db.count_highlights().await?);
        }
        Command::Probe { video } => {
            let info = media::probe(&video)?;
            let mut table = comfy_table::Table::new();
            table.set_header(["Duration", "Resolution", "FPS"]);
            table.add_row([
                export::format_timestamp(info.duration),
                format!("{}x{}", info.width, info.height),
                format!("{:.2}", info.fps),
            ]);
            println!("{table}");
        }
        Command::Transcribe {
            video,
            output,
            language,
        } => {
            let mut processing = settings.processing;
            if let Some(language) = language {
                processing.language = (language != "auto").then_some(language);
            }
            let segments = transcribe_video(&video, &processing).await?;
            println!("{}", transcriber::format_table(&segments));
            println!("{} segment(s)", segments.len());

            if let Some(path) = output {
                let mut file = std::fs::File::create(&path)
                    .with_context(|| format!("cannot create {}", path.display()))?;
                for seg in &segments {
                    writeln!(file, "{}", transcriber::format_transcript_line(seg))?;
                }
                println!("written to {}", path.display());
            }
        }
        Command::Scenes { video } => {
            let info = media::probe(&video)?;
            let config = scenes::SceneDetectorConfig {
                threshold: settings.processing.scene_threshold,
                min_scene_duration: settings.processing.min_scene_duration,
            };
            let found = tokio::task::spawn_blocking(move || {
                scenes::detect_scenes(&video, &config, &info)
            })
            .await?;

            let mut table = comfy_table::Table::new();
            table.set_header(["#", "Start", "End", "Frames", "Summary"]);
            for scene in &found {
                table.add_row([
                    (scene.index + 1).to_string(),
                    export::format_timestamp(scene.start_time),
                    export::format_timestamp(scene.end_time),
                    format!("{}-{}", scene.start_frame, scene.end_frame),
                    scene.summary(),
                ]);
            }
            println!("{table}");
            println!("{} scene(s)", found.len());
        }
        Command::Speech { video, transcribe } => {
            let processing = settings.processing;
            let wav = extract_wav(&video, &processing.output_dir)?;
            let spans = pipeline::speech_spans(&wav)?;
            let transcriber = if transcribe {
                Some(load_transcriber(&processing.whisper_model).await?)
            } else {
                None
            };

            let mut table = comfy_table::Table::new();
            table.set_header(["#", "Start", "End", "Energy", "Text"]);
            for (i, &(start, end, energy)) in spans.iter().enumerate() {
                let text = match &transcriber {
                    Some(t) => {
                        let (t, wav, language) = (Arc::clone(t), wav.clone(), processing.language.clone());
                        tokio::task::spawn_blocking(move || {
                            t.transcribe_range(&wav, start, end, language.as_deref())
                        })
                        .await??
                    }
                    None => String::new(),
                };
                table.add_row([
                    (i + 1).to_string(),
                    export::format_timestamp(start),
                    export::format_timestamp(end),
                    format!("{energy:.3}"),
                    text,
                ]);
            }
            let _ = std::fs::remove_file(&wav);
            println!("{table}");
            println!("{} speech span(s)", spans.len());
        }
        Command::Frames { video, max } => {
            let info = media::probe(&video)?;
            let processing = settings.processing;
            let dir = processing.output_dir.join("frames");
            let samples = tokio::task::spawn_blocking(move || {
                pipeline::sample_frames(&video, &info, processing.frame_interval, &dir, max)
            })
            .await??;

            let flag = |b: bool| if b { "yes".to_string() } else { String::new() };
            let mut table = comfy_table::Table::new();
            table.set_header(["Time", "Key frame", "Significant", "Changed", "Description"]);
            for s in &samples {
                table.add_row([
                    export::format_timestamp(s.timestamp),
                    flag(s.key_frame),
                    flag(s.significant),
                    flag(s.changed),
                    s.description.clone(),
                ]);
            }
            println!("{table}");
            println!("{} frame(s)", samples.len());
        }
        Command::Process { videos } => {
            let videos = if videos.is_empty() {
                media::find_videos(&settings.processing.videos_dir)?
            } else {
                videos
            };
            process_videos(&settings, videos).await?;
        }
        Command::Videos => {
            let db = connect(&settings).await?;
            let videos = db.list_videos().await?;
            if videos.is_empty() {
                println!("no videos stored");
                return Ok(());
            }

            let mut table = comfy_table::Table::new();
            table.set_header(["ID", "File", "Duration", "Resolution", "Highlights", "Summary"]);
            for v in &videos {
                table.add_row([
                    v.video.id.to_string(),
                    v.video.filename.clone(),
                    export::format_timestamp(v.video.duration),
                    format!("{}x{}", v.video.width, v.video.height),
                    v.highlight_count.to_string(),
                    v.video.summary.clone().unwrap_or_default(),
                ]);
            }
            println!("{table}");
        }
        Command::Highlights {
            video_id,
            n,
            output,
        } => {
            let db = connect(&settings).await?;
            let Some(detail) = db.get_video(video_id).await? else {
                bail!("video {video_id} not found");
            };
            let rows: Vec<export::ExportHighlight> =
                pipeline::get_video_highlights(db.as_ref(), video_id, n)
                    .await?
                    .iter()
                    .map(export::ExportHighlight::from)
                    .collect();

            match output {
                Some(path) if path == Path::new("-") => export::write_csv_stdout(&rows)?,
                Some(path) => {
                    println!("{}", export::format_table(&detail.video.filename, &rows));
                    export::write_csv(&path, &rows)?;
                    println!("written to {}", path.display());
                }
                None => {
                    println!("{}", export::format_table(&detail.video.filename, &rows));
                    println!("{} highlight(s)", rows.len());
                }
            }
        }
        Command::Similar {
            video_id,
            highlight_id,
            n,
        } => {
            let db = connect(&settings).await?;
            let results =
                pipeline::find_similar_highlights(db.as_ref(), video_id, highlight_id, n).await?;
            if results.is_empty() {
                println!("no similar highlights (unknown highlight or no embedding)");
                return Ok(());
            }

            let mut table = comfy_table::Table::new();
            table.set_header(["ID", "Video", "Time", "Description", "Distance"]);
            for r in &results {
                table.add_row([
                    r.highlight.id.to_string(),
                    r.video_name.clone(),
                    export::format_timestamp(r.highlight.timestamp),
                    r.highlight.description.clone(),
                    format!("{:.4}", r.distance),
                ]);
            }
            println!("{table}");
        }
        Command::Ask { question, n } => {
            let limit = n.unwrap_or(settings.server.retrieval_limit);
            let service = HighlightService::new(
                connect(&settings).await?,
                llm::embedder(&settings.embedding, &settings.gemini)?,
                settings.processing,
                settings.gemini.max_concurrency,
            );
            let results = service
                .answer_question(&question, settings.server.similarity_threshold, limit)
                .await?;
            if results.is_empty() {
                println!("no results found");
                return Ok(());
            }

            let mut table = comfy_table::Table::new();
            table.set_header(["#", "Video", "Time", "Description", "Similarity"]);
            for (i, r) in results.iter().enumerate() {
                table.add_row([
                    (i + 1).to_string(),
                    r.video_name.clone(),
                    export::format_timestamp(r.timestamp),
                    r.description.clone(),
                    format!("{:.3}", r.similarity_score),
                ]);
            }
            println!("{table}");
            println!("{} result(s)", results.len());
        }
        Command::Delete { video_id } => {
            let db = connect(&settings).await?;
            if db.delete_video(video_id).await? {
                println!("deleted video {video_id}");
            } else {
                bail!("video {video_id} not found");
            }
        }
        Command::Seed => {
            let service = HighlightService::new(
                connect(&settings).await?,
                llm::embedder(&settings.embedding, &settings.gemini)?,
                settings.processing,
                settings.gemini.max_concurrency,
            );
            let inserted = service.seed_sample_highlights().await?;
            println!("inserted {inserted} sample highlight(s)");
        }
        Command::Models => {
            let client = GeminiClient::new(settings.gemini)?;
            let models = client.list_models().await?;

            let mut table = comfy_table::Table::new();
            table.set_header(["Name", "Display name", "Methods", "Description"]);
            for m in &models {
                table.add_row([
                    m.name.clone(),
                    m.display_name.clone(),
                    m.supported_generation_methods.join(", "),
                    m.description.chars().take(80).collect(),
                ]);
            }
            println!("{table}");
            println!("{} model(s)", models.len());
        }
        Command::Serve { addr } => {
            let db = connect(&settings).await?;
            let state = server::AppState {
                index: db,
                embedder: llm::embedder(&settings.embedding, &settings.gemini)?,
                similarity_threshold: settings.server.similarity_threshold,
                retrieval_limit: settings.server.retrieval_limit,
            };
            let addr = addr.unwrap_or(settings.server.bind_addr);
            server::serve(state, &addr, &settings.server.cors_origins).await?;
        }
    }

    Ok(())
}

async fn connect(settings: &Settings) -> Result<Arc<Database>> {
    let db = Database::connect(&settings.database).await.with_context(|| {
        format!(
            "cannot connect to PostgreSQL at {}:{}",
            settings.database.host, settings.database.port
        )
    })?;
    Ok(Arc::new(db))
}

async fn load_transcriber(model: &Path) -> Result<Arc<Transcriber>> {
    let model = model.to_path_buf();
    let transcriber = tokio::task::spawn_blocking(move || Transcriber::new(&model)).await??;
    Ok(Arc::new(transcriber))
}

/// Extract the 16 kHz mono track of `video` into `<output_dir>/audio/`.
fn extract_wav(video: &Path, output_dir: &Path) -> Result<PathBuf> {
    let dir = output_dir.join("audio");
    std::fs::create_dir_all(&dir)?;
    let stem = video
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string());
    Ok(media::extract_audio(video, &dir.join(format!("{stem}.wav")))?)
}

async fn transcribe_video(
    video: &Path,
    processing: &config::ProcessingConfig,
) -> Result<Vec<transcriber::Segment>> {
    let transcriber = load_transcriber(&processing.whisper_model).await?;
    let wav = extract_wav(video, &processing.output_dir)?;

    let language = processing.language.clone();
    let segments = tokio::task::spawn_blocking(move || -> Result<Vec<transcriber::Segment>> {
        let segments = transcriber.transcribe_file(&wav, language.as_deref())?;
        let _ = std::fs::remove_file(&wav);
        Ok(segments)
    })
    .await??;
    Ok(segments)
}

async fn process_videos(settings: &Settings, videos: Vec<PathBuf>) -> Result<()> {
    let db = connect(settings).await?;
    db.init_schema(false).await?;

    let gemini = GeminiClient::new(settings.gemini.clone())?;
    let mut service = HighlightService::new(
        Arc::clone(&db),
        llm::embedder(&settings.embedding, &settings.gemini)?,
        settings.processing.clone(),
        settings.gemini.max_concurrency,
    )
    .with_generator(Arc::new(gemini.clone()))
    .with_transcriber(load_transcriber(&settings.processing.whisper_model).await?);
    if settings.processing.object_detection {
        service = service.with_detector(Arc::new(GeminiObjectDetector::new(gemini)));
    }

    let total = videos.len();
    let mut processed = Vec::new();
    for (i, video) in videos.iter().enumerate() {
        eprintln!("[{}/{total}] {}", i + 1, video.display());
        match service.process_video(video).await {
            Ok(stored) => processed.push(stored),
            Err(e) => error!("failed to process {}: {e}", video.display()),
        }
    }

    let mut table = comfy_table::Table::new();
    table.set_header(["ID", "File", "Duration", "Highlights", "Summary"]);
    for video in &processed {
        let highlights = pipeline::get_video_highlights(db.as_ref(), video.id, None).await?;
        table.add_row([
            video.id.to_string(),
            video.filename.clone(),
            export::format_timestamp(video.duration),
            highlights.len().to_string(),
            video.summary.clone().unwrap_or_default(),
        ]);
    }
    println!("{table}");
    info!("processed {}/{total} video(s)", processed.len());

    if processed.is_empty() && total > 0 {
        bail!("no video could be processed");
    }
    Ok(())
}
