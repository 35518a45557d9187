use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use crossbeam::channel::bounded;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::{error, info, Level};

use scene_segmenter::{ConfigUpdate, SceneSegment, Segmenter, Settings};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// KEY=VALUE settings file, overridden by SEGMENTER_* variables
    #[arg(long, global = true, default_value = ".env")]
    env_file: PathBuf,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Split videos into scenes and extract keyframes
    Segment {
        #[arg(required = true)]
        urls: Vec<String>,

        #[arg(short, long, default_value = "scenes")]
        out_dir: PathBuf,

        /// Videos processed concurrently
        #[arg(short, long, default_value_t = 2)]
        jobs: usize,

        #[arg(long)]
        threshold: Option<f64>,

        #[arg(long)]
        min_scene: Option<f64>,

        #[arg(long)]
        max_scenes: Option<usize>,

        #[arg(long)]
        keyframes: Option<usize>,
    },
    /// Extract the mono 16 kHz WAV audio track of a video
    Audio {
        url: String,

        #[arg(short, long)]
        output: PathBuf,
    },
}

struct SegmentJob {
    index: usize,
    url: String,
}

struct JobOutcome {
    index: usize,
    url: String,
    result: scene_segmenter::Result<Vec<SceneSegment>>,
}

#[derive(Serialize)]
struct VideoReport<'a> {
    url: &'a str,
    scenes: &'a [SceneSegment],
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    let settings = Settings::load(Some(args.env_file.as_path()))?;
    info!("Workspace: {:?}", settings.workspace_dir);
    let segmenter = Arc::new(Segmenter::new(&settings)?);

    match args.command {
        Command::Segment {
            urls,
            out_dir,
            jobs,
            threshold,
            min_scene,
            max_scenes,
            keyframes,
        } => {
            segmenter.update_config(&ConfigUpdate {
                scene_threshold: threshold,
                min_scene_duration: min_scene,
                max_scenes_per_video: max_scenes,
                keyframes_per_scene: keyframes,
            })?;
            segment_all(segmenter, urls, &out_dir, jobs)
        }
        Command::Audio { url, output } => {
            let wav = segmenter.extract_audio_from_url(&url)?;
            fs::write(&output, &wav).with_context(|| format!("Failed to write {:?}", output))?;
            info!("Wrote {} bytes of audio to {:?}", wav.len(), output);
            Ok(())
        }
    }
}

fn segment_all(segmenter: Arc<Segmenter>, urls: Vec<String>, out_dir: &Path, jobs: usize) -> Result<()> {
    fs::create_dir_all(out_dir).with_context(|| format!("Failed to create {:?}", out_dir))?;

    let total = urls.len();
    let (job_tx, job_rx) = bounded::<SegmentJob>(total.max(1));
    let (done_tx, done_rx) = bounded::<JobOutcome>(jobs.max(1));

    // Worker threads, one segment_video run at a time each
    let mut worker_handles = Vec::new();
    for i in 0..jobs.clamp(1, total.max(1)) {
        let rx = job_rx.clone();
        let tx = done_tx.clone();
        let segmenter = segmenter.clone();

        worker_handles.push(thread::spawn(move || {
            info!("Worker {} started", i);
            for job in rx {
                let result = segmenter.segment_video(&job.url);
                let _ = tx.send(JobOutcome {
                    index: job.index,
                    url: job.url,
                    result,
                });
            }
            info!("Worker {} finished", i);
        }));
    }
    drop(done_tx);

    for (index, url) in urls.into_iter().enumerate() {
        job_tx.send(SegmentJob { index: index + 1, url })?;
    }
    drop(job_tx);

    let progress = ProgressBar::new(total as u64);
    progress.set_style(ProgressStyle::with_template(
        "{spinner} [{elapsed_precise}] {bar:30} {pos}/{len} videos",
    )?);

    let mut failed = 0;
    for outcome in done_rx {
        match outcome.result {
            Ok(scenes) => {
                let path = out_dir.join(format!("{}.json", outcome.index));
                write_report(&path, &outcome.url, &scenes)?;
                progress.println(format!(
                    "{} -> {:?} ({} scenes)",
                    outcome.url,
                    path,
                    scenes.len()
                ));
            }
            Err(e) => {
                failed += 1;
                error!("Failed to segment {}: {}", outcome.url, e);
            }
        }
        progress.inc(1);
    }
    progress.finish_and_clear();

    for h in worker_handles {
        h.join().map_err(|_| anyhow!("Segmentation worker panicked"))?;
    }

    if failed > 0 {
        bail!("{} of {} videos failed", failed, total);
    }
    info!("Segmented {} videos into {:?}", total, out_dir);
    Ok(())
}

fn write_report(path: &Path, url: &str, scenes: &[SceneSegment]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &VideoReport { url, scenes })
        .with_context(|| format!("Failed to write {:?}", path))?;
    Ok(())
}
