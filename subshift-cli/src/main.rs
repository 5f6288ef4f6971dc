//! subshift CLI — retime a subtitle script to match a different audio source.
//!
//! Usage:
//!     subshift script.ass --src-audio src.wav --dst-audio dst.wav -o out.ass
//!     subshift script.ass --src-audio src.wav --dst-audio dst.wav -o out.ass \
//!         --chapters chapters.xml --src-keyframes src.kf.txt --dst-keyframes dst.kf.txt

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use clap::{Parser, ValueEnum};

use subshift_core::ass;
use subshift_core::audio::{AudioStream, SampleType};
use subshift_core::chapters::parse_chapters;
use subshift_core::diagnostics::{DiagRecord, DiagSink};
use subshift_core::error::SushiError;
use subshift_core::events::EventList;
use subshift_core::keyframe_snap::KfMode;
use subshift_core::keyframes::{build_keytimes, parse_scxvid_keyframes};
use subshift_core::orchestrator::{run_pipeline, KeyframeInput, SyncParams};
use subshift_core::srt;
use subshift_core::timecodes::Timecodes;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum KfModeArg {
    Shift,
    Snap,
    All,
}

impl From<KfModeArg> for KfMode {
    fn from(v: KfModeArg) -> Self {
        match v {
            KfModeArg::Shift => KfMode::Shift,
            KfModeArg::Snap => KfMode::Snap,
            KfModeArg::All => KfMode::All,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum SampleTypeArg {
    Uint8,
    Float32,
}

impl From<SampleTypeArg> for SampleType {
    fn from(v: SampleTypeArg) -> Self {
        match v {
            SampleTypeArg::Uint8 => SampleType::Uint8,
            SampleTypeArg::Float32 => SampleType::Float32,
        }
    }
}

#[derive(Parser)]
#[command(
    name = "subshift",
    version,
    about = "Retime a subtitle script to match a different audio source via cross-correlation"
)]
struct Cli {
    /// Subtitle script to retime (.ass or .srt)
    input_script: PathBuf,

    /// Audio extracted from the source the script currently matches
    #[arg(long)]
    src_audio: PathBuf,

    /// Audio extracted from the destination the script should match
    #[arg(long)]
    dst_audio: PathBuf,

    /// Output script path
    #[arg(short, long)]
    output: PathBuf,

    /// Chapter file (matroska XML or OGM text) to seed grouping
    #[arg(long)]
    chapters: Option<PathBuf>,

    /// SCXviD keyframe stats for the source
    #[arg(long)]
    src_keyframes: Option<PathBuf>,
    /// SCXviD keyframe stats for the destination
    #[arg(long)]
    dst_keyframes: Option<PathBuf>,

    /// Timecodes file (v1 or v2) for the source
    #[arg(long, conflicts_with = "src_fps")]
    src_timecodes: Option<PathBuf>,
    /// Constant fps for the source, if no timecodes file is available
    #[arg(long, conflicts_with = "src_timecodes")]
    src_fps: Option<f64>,

    /// Timecodes file (v1 or v2) for the destination
    #[arg(long, conflicts_with = "dst_fps")]
    dst_timecodes: Option<PathBuf>,
    /// Constant fps for the destination, if no timecodes file is available
    #[arg(long, conflicts_with = "dst_timecodes")]
    dst_fps: Option<f64>,

    /// Normal half-window (seconds) for the audio search
    #[arg(long, default_value_t = 5.0)]
    window: f64,

    /// Maximum duration (seconds) for an event to be eligible for typesetting clumping
    #[arg(long, default_value_t = 0.4)]
    max_ts_duration: f64,
    /// Maximum gap (seconds) between events to clump them together
    #[arg(long, default_value_t = 0.5)]
    max_ts_distance: f64,

    /// Disable automatic/chapter-seeded grouping (every event shifts independently)
    #[arg(long)]
    no_grouping: bool,
    /// Disable duplicate-span fast-skip detection in search-group preparation
    #[arg(long)]
    no_fast_skip: bool,

    /// Maximum keyframe distance, in frames, before a snap candidate is rejected
    #[arg(long, default_value_t = 2.0)]
    max_kf_distance: f64,
    /// Keyframe correction mode
    #[arg(long, value_enum)]
    kf_mode: Option<KfModeArg>,

    /// Internal analysis sample rate, Hz
    #[arg(long, default_value_t = 12000)]
    sample_rate: u32,
    /// Internal sample representation
    #[arg(long, value_enum)]
    sample_type: Option<SampleTypeArg>,

    /// Emit a JSON object with the accumulated diagnostic records on stdout
    #[arg(long)]
    json: bool,

    /// Verbose (debug-level) logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    // SAFETY: called before any threads are spawned, at program start.
    unsafe {
        std::env::set_var("RUST_LOG", format!("subshift={level}"));
    }
    env_logger::init();

    if let Err(err) = run(cli) {
        eprintln!("error: {err}");
        std::process::exit(2);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    if cli.src_keyframes.is_some() != cli.dst_keyframes.is_some() {
        anyhow::bail!("{}", SushiError::BadArgs {
            detail: "keyframes must be supplied for both source and destination, or neither".to_string(),
        });
    }

    let records: Rc<RefCell<Vec<DiagRecord>>> = Rc::new(RefCell::new(Vec::new()));
    let json_mode = cli.json;
    let sink_records = records.clone();
    let diag: Option<DiagSink> = Some(Box::new(move |record: DiagRecord| {
        log::debug!("{record:?}");
        if json_mode {
            sink_records.borrow_mut().push(record);
        } else {
            log::info!("{}", describe(&record));
        }
    }));

    let sample_type: SampleType = cli.sample_type.unwrap_or(SampleTypeArg::Uint8).into();
    let src = AudioStream::load(&cli.src_audio, cli.sample_rate, sample_type, &diag)?;
    let dst = AudioStream::load(&cli.dst_audio, cli.sample_rate, sample_type, &diag)?;

    let (mut list, render): (EventList, Box<dyn Fn(&EventList) -> String>) = load_script(&cli.input_script)?;

    let chapters = match &cli.chapters {
        Some(path) => parse_chapters(&read_text(path, "chapters")?),
        None => Vec::new(),
    };

    let keyframes = load_keyframe_inputs(&cli)?;
    let keyframe_refs = keyframes.as_ref().map(|(s, d)| (s, d));

    let params = SyncParams {
        max_ts_duration: cli.max_ts_duration,
        max_ts_distance: cli.max_ts_distance,
        normal_window: cli.window,
        grouping_enabled: !cli.no_grouping,
        fast_skip: !cli.no_fast_skip,
        max_kf_distance: cli.max_kf_distance,
        kf_mode: cli.kf_mode.unwrap_or(KfModeArg::All).into(),
        ..SyncParams::default()
    };

    run_pipeline(&mut list, &src, &dst, &chapters, keyframe_refs, &params, &diag);

    std::fs::write(&cli.output, render(&list))
        .map_err(|e| anyhow::anyhow!("{}", SushiError::BadFormat {
            path: cli.output.display().to_string(),
            detail: format!("cannot write output: {e}"),
        }))?;

    if cli.json {
        let out = serde_json::json!({ "diagnostics": records.borrow().clone() });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        eprintln!("wrote {}", cli.output.display());
    }

    Ok(())
}

fn load_keyframe_inputs(cli: &Cli) -> anyhow::Result<Option<(KeyframeInput, KeyframeInput)>> {
    let (Some(src_kf_path), Some(dst_kf_path)) = (&cli.src_keyframes, &cli.dst_keyframes) else {
        return Ok(None);
    };

    let src_tc = load_timecodes(cli.src_timecodes.as_deref(), cli.src_fps)?;
    let dst_tc = load_timecodes(cli.dst_timecodes.as_deref(), cli.dst_fps)?;

    let src_frames = parse_scxvid_keyframes(&read_text(src_kf_path, "source keyframes")?);
    let dst_frames = parse_scxvid_keyframes(&read_text(dst_kf_path, "destination keyframes")?);

    let src_keytimes = build_keytimes(&src_frames, &src_tc);
    let dst_keytimes = build_keytimes(&dst_frames, &dst_tc);

    Ok(Some((
        KeyframeInput { timecodes: src_tc, keytimes: src_keytimes },
        KeyframeInput { timecodes: dst_tc, keytimes: dst_keytimes },
    )))
}

fn load_timecodes(path: Option<&Path>, fps: Option<f64>) -> anyhow::Result<Timecodes> {
    match (path, fps) {
        (Some(p), None) => Ok(Timecodes::parse(&read_text(p, "timecodes")?)?),
        (None, Some(fps)) => Ok(Timecodes::cfr(fps)),
        (None, None) => anyhow::bail!("{}", SushiError::BadArgs {
            detail: "keyframes require either --{src,dst}-timecodes or --{src,dst}-fps".to_string(),
        }),
        (Some(_), Some(_)) => unreachable!("clap rejects timecodes+fps together"),
    }
}

fn read_text(path: &Path, title: &str) -> Result<String, SushiError> {
    std::fs::read_to_string(path).map_err(|_| SushiError::FileMissing {
        path: path.display().to_string(),
        title: title.to_string(),
    })
}

type ScriptLoad = (EventList, Box<dyn Fn(&EventList) -> String>);

fn load_script(path: &Path) -> anyhow::Result<ScriptLoad> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("").to_ascii_lowercase();
    let text = read_text(path, "input script")?;

    match ext.as_str() {
        "ass" => {
            let (doc, events) = ass::parse_ass(&text)?;
            let list = EventList::new(events);
            let render = Box::new(move |list: &EventList| ass::serialize_ass(&doc, &list.events));
            Ok((list, render))
        }
        "srt" => {
            let events = srt::parse_srt(&text)?;
            let list = EventList::new(events);
            let render = Box::new(|list: &EventList| srt::serialize_srt(&list.events));
            Ok((list, render))
        }
        other => anyhow::bail!("{}", SushiError::BadArgs {
            detail: format!("unsupported script extension: .{other}"),
        }),
    }
}

fn describe(record: &DiagRecord) -> String {
    match record {
        DiagRecord::GroupShift { start, end, shift, diff } => {
            format!("group [{start:.3}, {end:.3}] shift={shift:+.3} diff={diff:.3}")
        }
        DiagRecord::Rewind { at, window } => format!("rewinding at {at:.3}, window now {window:.1}s"),
        DiagRecord::BorderFix { first_good_index, linked_count } => {
            format!("linked {linked_count} border event(s), first good index {first_good_index}")
        }
        DiagRecord::BrokenGroupSplit { start, end, std } => {
            format!("chapter group [{start:.3}, {end:.3}] had std {std:.4}, re-grouping")
        }
        DiagRecord::ChannelLengthMismatch { path, diff_samples } => {
            format!("{path}: channel lengths disagreed by {diff_samples} sample(s)")
        }
        DiagRecord::Info { message } => message.clone(),
    }
}
