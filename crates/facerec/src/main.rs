//! Command-line front-end: runs the detector post-processing on dumped network outputs and manages
//! the enrollment store directory.

use std::{
    env::{self, VarError},
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{bail, Context};
use facerec::{
    align::Aligner,
    detection::{ssd::AnchorSet, Detection, Detector},
    recognition::{
        store::{self, EnrollmentStore, Registration},
        Embedding,
    },
    resolution::Resolution,
};

const USAGE: &str = "\
usage: facerec <command>

commands:
  detect <scores> <boxes> <landmarks> <input-size> <frame-width> <frame-height> [<conf> <iou>]
  enroll <embedding> <name>
  search <embedding>
  reset

All buffers are raw little-endian f32 files. <input-size> is 320 or 640.";

const DEFAULT_DB_DIR: &str = "./facedb";
const DEFAULT_DB_CAPACITY: usize = 100;
const DEFAULT_RECOGNITION_THRESHOLD: f32 = 75.0;

/// Settings taken from the environment.
struct Config {
    db_dir: PathBuf,
    db_capacity: usize,
    recognition_threshold: f32,
}

impl Config {
    fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            db_dir: env_var("FACEREC_DB_DIR")?
                .map_or_else(|| PathBuf::from(DEFAULT_DB_DIR), PathBuf::from),
            db_capacity: parse_env("FACEREC_DB_CAPACITY")?.unwrap_or(DEFAULT_DB_CAPACITY),
            recognition_threshold: parse_env("FACEREC_RECOGNITION_THRESHOLD")?
                .unwrap_or(DEFAULT_RECOGNITION_THRESHOLD),
        })
    }
}

fn env_var(name: &str) -> anyhow::Result<Option<String>> {
    match env::var(name) {
        Ok(v) => Ok(Some(v)),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(s)) => bail!(
            "invalid value set for `{name}` variable: {}",
            s.to_string_lossy()
        ),
    }
}

fn parse_env<T>(name: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env_var(name)?
        .map(|v| {
            v.parse()
                .with_context(|| format!("invalid value set for `{name}` variable: '{v}'"))
        })
        .transpose()
}

fn parse_arg<T>(args: &[String], index: usize, what: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let Some(arg) = args.get(index) else {
        bail!("missing argument <{what}>\n\n{USAGE}");
    };
    arg.parse()
        .with_context(|| format!("invalid <{what}> argument '{arg}'"))
}

fn read_f32_file(path: &Path) -> anyhow::Result<Vec<f32>> {
    let bytes = fs::read(path).with_context(|| format!("failed to read '{}'", path.display()))?;
    if bytes.len() % 4 != 0 {
        bail!(
            "'{}' is {} bytes long, which is not a whole number of f32 values",
            path.display(),
            bytes.len()
        );
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| {
            let mut buf = [0; 4];
            buf.copy_from_slice(chunk);
            f32::from_le_bytes(buf)
        })
        .collect())
}

fn print_detection(i: usize, det: &Detection, aligner: &Aligner) {
    let rect = det.bounding_rect();
    println!(
        "face {i}: confidence {:.3}, box ({:.1}, {:.1}) {:.1}x{:.1}",
        det.confidence(),
        rect.x(),
        rect.y(),
        rect.width(),
        rect.height(),
    );
    for (x, y) in det.landmarks().points() {
        println!("  landmark ({x:.1}, {y:.1})");
    }
    for row in aligner.estimate(det.landmarks()).rows() {
        println!("  transform [{:.4}, {:.4}, {:.2}]", row[0], row[1], row[2]);
    }
}

fn detect(args: &[String]) -> anyhow::Result<()> {
    let scores = read_f32_file(Path::new(&parse_arg::<String>(args, 0, "scores")?))?;
    let boxes = read_f32_file(Path::new(&parse_arg::<String>(args, 1, "boxes")?))?;
    let landmarks = read_f32_file(Path::new(&parse_arg::<String>(args, 2, "landmarks")?))?;
    let input_size: u32 = parse_arg(args, 3, "input-size")?;
    let frame = Resolution::new(
        parse_arg(args, 4, "frame-width")?,
        parse_arg(args, 5, "frame-height")?,
    );

    let input = Resolution::new(input_size, input_size);
    let Some(anchor_set) = AnchorSet::for_input(input) else {
        bail!("no anchor set for network input {input} (expected 320 or 640)");
    };

    let mut detector = Detector::new(anchor_set);
    if args.len() > 6 {
        detector.set_threshold(parse_arg(args, 6, "conf")?);
        detector
            .nms_mut()
            .set_iou_thresh(parse_arg(args, 7, "iou")?);
    }

    let outputs = detector.outputs(&scores, &boxes, &landmarks)?;
    let aligner = Aligner::default();
    let detections = detector.detect(&outputs, frame).to_vec();

    println!("{} faces", detections.len());
    for (i, det) in detections.iter().enumerate() {
        print_detection(i, det, &aligner);
    }
    if let Some(largest) = Detection::largest(&detections) {
        let index = detections
            .iter()
            .position(|det| std::ptr::eq(det, largest))
            .unwrap_or_default();
        println!("largest: face {index}");
    }

    for timer in detector.timers() {
        log::debug!("{timer}");
    }
    Ok(())
}

fn open_store(config: &Config, embedding: &Embedding) -> anyhow::Result<EnrollmentStore> {
    EnrollmentStore::open(&config.db_dir, config.db_capacity, embedding.len())
}

fn enroll(config: &Config, args: &[String]) -> anyhow::Result<()> {
    let path: String = parse_arg(args, 0, "embedding")?;
    let name: String = parse_arg(args, 1, "name")?;
    let embedding = Embedding::new(read_f32_file(Path::new(&path))?);

    let mut store = open_store(config, &embedding)?;
    match store.register(embedding, &name, config.recognition_threshold)? {
        Registration::Registered { slot } => {
            println!("{name}: registered successfully (slot {slot})");
        }
        Registration::AlreadyEnrolled(res) => {
            bail!("registration failed: face already registered as {res}");
        }
        Registration::Full => {
            bail!(
                "registration failed: face database full ({} faces)",
                store.capacity()
            );
        }
    }
    Ok(())
}

fn search(config: &Config, args: &[String]) -> anyhow::Result<()> {
    let path: String = parse_arg(args, 0, "embedding")?;
    let embedding = Embedding::new(read_f32_file(Path::new(&path))?);

    let store = open_store(config, &embedding)?;
    let res = store.search(&embedding)?;
    if res.is_match(config.recognition_threshold) {
        println!("{res}");
    } else {
        println!("unknown (best score {:.2})", res.score);
    }
    Ok(())
}

fn reset(config: &Config) -> anyhow::Result<()> {
    if !config.db_dir.exists() {
        return Ok(());
    }
    let deleted = store::clear_directory(&config.db_dir)?;
    println!("cleared {deleted} files from '{}'", config.db_dir.display());
    Ok(())
}

fn main() -> anyhow::Result<()> {
    facerec::init_logger!();

    let args = env::args().skip(1).collect::<Vec<_>>();
    let Some((command, rest)) = args.split_first() else {
        bail!("{USAGE}");
    };

    let config = Config::from_env()?;
    match command.as_str() {
        "detect" => detect(rest),
        "enroll" => enroll(&config, rest),
        "search" => search(&config, rest),
        "reset" => reset(&config),
        "help" | "--help" | "-h" => {
            println!("{USAGE}");
            Ok(())
        }
        _ => bail!("unknown command '{command}'\n\n{USAGE}"),
    }
}
