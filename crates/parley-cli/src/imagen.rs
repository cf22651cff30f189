//! Batch image generation driven by a CSV file
//!
//! Columns: `prompt` (required), `ref_images` (`;`-separated paths, relative
//! paths resolve against the CSV's directory), `output_dir`,
//! `output_filename`, `aspect_ratio`, `resolution`, `number_of_images`, `seed`.
//! Every row produces one line in `imagen_batch_log.jsonl` inside the run
//! directory; a failed row never stops the batch.

use anyhow::{Context, bail};
use parley_ai::{
    ImageGenerator, ImageRequest,
    image::{DEFAULT_ASPECT_RATIO, DEFAULT_RESOLUTION},
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const LOG_FILE_NAME: &str = "imagen_batch_log.jsonl";

/// Characters that cannot appear in a file name on common platforms
const INVALID_FILENAME_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// Maximum characters taken from the prompt for a generated name
const PROMPT_NAME_LEN: usize = 20;

#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    pub csv_path: PathBuf,
    pub dry_run: bool,
    pub limit: Option<usize>,
    pub skip_existing: bool,
    /// Parent of the timestamped run directory; defaults to
    /// `<Downloads>/generated_image`
    pub output_root: Option<PathBuf>,
}

#[derive(Debug)]
pub struct BatchSummary {
    pub ok: usize,
    pub failed: usize,
    pub run_dir: PathBuf,
    pub log_path: PathBuf,
}

impl BatchSummary {
    /// 0 when every row succeeded, 2 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.failed == 0 { 0 } else { 2 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum RowStatus {
    Ok,
    Error,
    Skipped,
    DryRun,
}

#[derive(Serialize)]
struct LogRecord<'a> {
    time: String,
    row_index: usize,
    status: RowStatus,
    output_files: Vec<String>,
    error: Option<String>,
    request: &'a Map<String, Value>,
    parsed_request: Option<&'a ImageRequest>,
}

struct RowOutcome {
    status: RowStatus,
    output_files: Vec<PathBuf>,
    request: Option<ImageRequest>,
}

/// Run every row of the CSV.
///
/// `generator` may be `None` only for a dry run. Errors are returned only for
/// problems with the batch as a whole (unreadable CSV, missing header, log
/// not writable).
pub async fn run_batch(
    options: &BatchOptions,
    generator: Option<&dyn ImageGenerator>,
) -> anyhow::Result<BatchSummary> {
    if generator.is_none() && !options.dry_run {
        bail!("an image generator is required unless --dry-run is given");
    }

    let source = fs::read_to_string(&options.csv_path)
        .with_context(|| format!("Failed to read CSV {}", options.csv_path.display()))?;
    let source = source.strip_prefix('\u{feff}').unwrap_or(&source);
    let base_dir = options
        .csv_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(source.as_bytes());
    let headers = reader.headers().context("Failed to read CSV header")?.clone();
    if headers.iter().all(|h| h.trim().is_empty()) {
        bail!("CSV has no header: {}", options.csv_path.display());
    }

    let run_dir = options
        .output_root
        .clone()
        .unwrap_or_else(default_output_root)
        .join(chrono::Local::now().format("%Y%m%d_%H%M%S").to_string());
    fs::create_dir_all(&run_dir)
        .with_context(|| format!("Failed to create {}", run_dir.display()))?;
    let log_path = run_dir.join(LOG_FILE_NAME);
    let mut log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open {}", log_path.display()))?;

    let mut summary = BatchSummary {
        ok: 0,
        failed: 0,
        run_dir: run_dir.clone(),
        log_path,
    };
    let mut used_names = HashSet::new();

    for (idx0, record) in reader.records().enumerate() {
        let row_index = idx0 + 1;
        if options.limit.is_some_and(|limit| row_index > limit) {
            break;
        }

        let (row, outcome) = match record {
            Ok(record) => {
                let row = row_map(&headers, &record);
                let outcome = process_row(
                    &row,
                    row_index,
                    options,
                    &base_dir,
                    &run_dir,
                    &mut used_names,
                    generator,
                )
                .await;
                (row, outcome)
            }
            Err(e) => (Map::new(), Err(anyhow::Error::new(e))),
        };

        let record = match &outcome {
            Ok(outcome) => {
                summary.ok += 1;
                LogRecord {
                    time: now_iso(),
                    row_index,
                    status: outcome.status,
                    output_files: outcome
                        .output_files
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect(),
                    error: None,
                    request: &row,
                    parsed_request: outcome.request.as_ref(),
                }
            }
            Err(e) => {
                summary.failed += 1;
                tracing::error!("Job failed (row={}): {:#}", row_index, e);
                LogRecord {
                    time: now_iso(),
                    row_index,
                    status: RowStatus::Error,
                    output_files: Vec::new(),
                    error: Some(format!("{:#}", e)),
                    request: &row,
                    parsed_request: None,
                }
            }
        };
        write_log(&mut log, &record)?;
    }

    tracing::info!(
        "Batch finished: ok={} ng={} log={}",
        summary.ok,
        summary.failed,
        summary.log_path.display()
    );
    Ok(summary)
}

async fn process_row(
    row: &Map<String, Value>,
    row_index: usize,
    options: &BatchOptions,
    base_dir: &Path,
    run_dir: &Path,
    used_names: &mut HashSet<String>,
    generator: Option<&dyn ImageGenerator>,
) -> anyhow::Result<RowOutcome> {
    let request = parse_row(row, base_dir, !options.dry_run)?;

    let out_dir = match cell(row, "output_dir") {
        Some(dir) => PathBuf::from(dir),
        None => run_dir.to_path_buf(),
    };

    let base_name = match cell(row, "output_filename") {
        Some(name) => file_stem(Path::new(name)),
        None => match request.ref_images.first() {
            Some(first) => file_stem(first),
            None => basename_from_prompt(&request.prompt, PROMPT_NAME_LEN),
        },
    };

    let plain = out_dir.join(format!("{}.png", sanitize_basename(&base_name)));
    if options.skip_existing && outputs_exist(&plain) {
        tracing::info!("Skip existing output: {}", plain.display());
        return Ok(RowOutcome {
            status: RowStatus::Skipped,
            output_files: vec![plain],
            request: None,
        });
    }
    let output_path = unique_path(&out_dir, &base_name, row_index, used_names);

    tracing::info!(
        "Job start (row={} refs={})",
        row_index,
        request.ref_images.len()
    );

    if options.dry_run {
        tracing::info!("Dry-run: no API call (row={})", row_index);
        return Ok(RowOutcome {
            status: RowStatus::DryRun,
            output_files: vec![output_path],
            request: Some(request),
        });
    }

    let Some(generator) = generator else {
        bail!("no image generator configured");
    };
    let images = generator.generate(&request).await?;
    let written = save_images(&images, &output_path)?;
    tracing::info!("Job done (row={} outputs={})", row_index, written.len());

    Ok(RowOutcome {
        status: RowStatus::Ok,
        output_files: written,
        request: Some(request),
    })
}

fn row_map(headers: &csv::StringRecord, record: &csv::StringRecord) -> Map<String, Value> {
    headers
        .iter()
        .zip(record.iter())
        .map(|(h, v)| (h.trim().to_string(), Value::String(v.to_string())))
        .collect()
}

/// Trimmed, non-empty cell value
fn cell<'a>(row: &'a Map<String, Value>, column: &str) -> Option<&'a str> {
    row.get(column)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn parse_number<T: std::str::FromStr>(
    row: &Map<String, Value>,
    column: &str,
) -> anyhow::Result<Option<T>> {
    match cell(row, column) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("invalid {}: {:?}", column, raw)),
        None => Ok(None),
    }
}

/// Build the request for one row; with `validate_paths` every reference image
/// must exist.
fn parse_row(
    row: &Map<String, Value>,
    base_dir: &Path,
    validate_paths: bool,
) -> anyhow::Result<ImageRequest> {
    let Some(prompt) = cell(row, "prompt") else {
        bail!("Missing prompt");
    };

    let ref_images = cell(row, "ref_images")
        .map(|raw| parse_ref_images(raw, base_dir))
        .unwrap_or_default();

    let request = ImageRequest {
        prompt: prompt.to_string(),
        ref_images,
        number_of_images: parse_number(row, "number_of_images")?.unwrap_or(1),
        aspect_ratio: cell(row, "aspect_ratio")
            .unwrap_or(DEFAULT_ASPECT_RATIO)
            .to_string(),
        resolution: cell(row, "resolution")
            .unwrap_or(DEFAULT_RESOLUTION)
            .to_string(),
        seed: parse_number(row, "seed")?,
    };
    request.validate()?;

    if validate_paths {
        if let Some(missing) = request.ref_images.iter().find(|p| !p.exists()) {
            bail!("ref_images not found: {}", missing.display());
        }
    }
    Ok(request)
}

fn parse_ref_images(raw: &str, base_dir: &Path) -> Vec<PathBuf> {
    raw.split(';')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| {
            let path = Path::new(p);
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                base_dir.join(path)
            }
        })
        .collect()
}

fn is_invalid_filename_char(ch: char) -> bool {
    INVALID_FILENAME_CHARS.contains(&ch) || (ch as u32) < 32
}

/// Replace characters that cannot appear in a file name; never empty.
pub fn sanitize_basename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|ch| if is_invalid_filename_char(ch) { '_' } else { ch })
        .collect();
    let trimmed = replaced.trim().trim_matches('.');
    if trimmed.is_empty() {
        "image".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Leading characters of the prompt, up to the first character that cannot
/// appear in a file name or `max_len`; whitespace becomes `_`.
pub fn basename_from_prompt(prompt: &str, max_len: usize) -> String {
    let name: String = prompt
        .trim()
        .chars()
        .take_while(|&ch| !is_invalid_filename_char(ch))
        .take(max_len)
        .map(|ch| if ch.is_whitespace() { '_' } else { ch })
        .collect();
    sanitize_basename(&name)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `{dir}/{base}.png`, or `{dir}/{base}_{row_index:05}.png` when the name was
/// already used in this run or exists on disk.
fn unique_path(
    dir: &Path,
    base: &str,
    row_index: usize,
    used: &mut HashSet<String>,
) -> PathBuf {
    let base = sanitize_basename(base);
    let candidate = if used.contains(&base) || dir.join(format!("{}.png", base)).exists() {
        format!("{}_{:05}", base, row_index)
    } else {
        base
    };
    let path = dir.join(format!("{}.png", candidate));
    used.insert(candidate);
    path
}

/// Whether a previous run wrote `path`, or its first numbered sibling
fn outputs_exist(path: &Path) -> bool {
    path.exists() || numbered(path, 1).exists()
}

fn numbered(path: &Path, index: usize) -> PathBuf {
    let stem = file_stem(path);
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "png".to_string());
    path.with_file_name(format!("{}_{:02}.{}", stem, index, extension))
}

/// One image is written to `output_path`; several as `stem_01.png`, `stem_02.png`, ...
fn save_images(images: &[Vec<u8>], output_path: &Path) -> anyhow::Result<Vec<PathBuf>> {
    if images.is_empty() {
        bail!("the generator returned no images");
    }
    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    if let [image] = images {
        fs::write(output_path, image)
            .with_context(|| format!("Failed to write {}", output_path.display()))?;
        return Ok(vec![output_path.to_path_buf()]);
    }

    let mut written = Vec::with_capacity(images.len());
    for (i, image) in images.iter().enumerate() {
        let path = numbered(output_path, i + 1);
        fs::write(&path, image).with_context(|| format!("Failed to write {}", path.display()))?;
        written.push(path);
    }
    Ok(written)
}

fn write_log(log: &mut File, record: &LogRecord<'_>) -> anyhow::Result<()> {
    let mut line = serde_json::to_string(record)?;
    line.push('\n');
    log.write_all(line.as_bytes())
        .context("Failed to write batch log")?;
    log.flush()?;
    Ok(())
}

fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// `<Downloads>/generated_image`, or under the home directory when there is
/// no Downloads directory
pub fn default_output_root() -> PathBuf {
    dirs::download_dir()
        .filter(|p| p.exists())
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("generated_image")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Returns `number_of_images` fake PNGs and records every prompt
    #[derive(Default)]
    struct MockGenerator {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ImageGenerator for MockGenerator {
        async fn generate(&self, request: &ImageRequest) -> parley_ai::Result<Vec<Vec<u8>>> {
            self.prompts.lock().unwrap().push(request.prompt.clone());
            Ok((0..request.number_of_images)
                .map(|i| format!("png{}", i).into_bytes())
                .collect())
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new(csv: &str) -> Self {
            let dir = tempfile::tempdir().unwrap();
            fs::write(dir.path().join("jobs.csv"), csv).unwrap();
            Self { dir }
        }

        fn options(&self) -> BatchOptions {
            BatchOptions {
                csv_path: self.dir.path().join("jobs.csv"),
                output_root: Some(self.dir.path().join("out")),
                ..BatchOptions::default()
            }
        }
    }

    fn read_log(summary: &BatchSummary) -> Vec<Value> {
        fs::read_to_string(&summary.log_path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    fn png_count(dir: &Path) -> usize {
        fs::read_dir(dir)
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .path()
                    .extension()
                    .is_some_and(|x| x == "png")
            })
            .count()
    }

    #[test]
    fn test_basename_from_prompt() {
        assert_eq!(basename_from_prompt("a cat", 20), "a_cat");
        assert_eq!(basename_from_prompt("  a cat / dog", 20), "a_cat_");
        assert_eq!(
            basename_from_prompt("abcdefghijklmnopqrstuvwxyz", 20),
            "abcdefghijklmnopqrst"
        );
        assert_eq!(basename_from_prompt("*stars", 20), "image");
    }

    #[test]
    fn test_sanitize_basename() {
        assert_eq!(sanitize_basename("..con:fig.."), "con_fig");
        assert_eq!(sanitize_basename("a\tb"), "a_b");
        assert_eq!(sanitize_basename("   "), "image");
    }

    #[test]
    fn test_unique_path_suffixes_row_index() {
        let dir = tempfile::tempdir().unwrap();
        let mut used = HashSet::new();
        let first = unique_path(dir.path(), "cat", 1, &mut used);
        let second = unique_path(dir.path(), "cat", 2, &mut used);
        assert_eq!(first, dir.path().join("cat.png"));
        assert_eq!(second, dir.path().join("cat_00002.png"));

        fs::write(dir.path().join("dog.png"), b"x").unwrap();
        let existing = unique_path(dir.path(), "dog", 7, &mut used);
        assert_eq!(existing, dir.path().join("dog_00007.png"));
    }

    #[tokio::test]
    async fn test_dry_run_logs_without_writing_images() {
        let fixture = Fixture::new("prompt,ref_images,aspect_ratio\na cat,,1:1\n");
        let options = BatchOptions {
            dry_run: true,
            ..fixture.options()
        };

        let summary = run_batch(&options, None).await.unwrap();

        assert_eq!(summary.exit_code(), 0);
        let log = read_log(&summary);
        assert_eq!(log.len(), 1);
        assert_eq!(log[0]["status"], "dry_run");
        assert_eq!(log[0]["row_index"], 1);
        assert_eq!(log[0]["request"]["prompt"], "a cat");
        assert_eq!(log[0]["parsed_request"]["aspect_ratio"], "1:1");
        assert_eq!(png_count(&summary.run_dir), 0);
    }

    #[tokio::test]
    async fn test_identical_prompts_get_distinct_names() {
        let fixture = Fixture::new("\u{feff}prompt\na cat\na cat\n");
        let generator = MockGenerator::default();

        let summary = run_batch(&fixture.options(), Some(&generator))
            .await
            .unwrap();

        let log = read_log(&summary);
        let first = log[0]["output_files"][0].as_str().unwrap().to_string();
        let second = log[1]["output_files"][0].as_str().unwrap().to_string();
        assert!(first.ends_with("a_cat.png"));
        assert!(second.ends_with("a_cat_00002.png"));
        assert_eq!(png_count(&summary.run_dir), 2);
        assert_eq!(generator.prompts.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_multiple_images_are_numbered() {
        let fixture = Fixture::new("prompt,output_filename,number_of_images\nsunset,beach.jpg,2\n");
        let generator = MockGenerator::default();

        let summary = run_batch(&fixture.options(), Some(&generator))
            .await
            .unwrap();

        assert!(summary.run_dir.join("beach_01.png").exists());
        assert!(summary.run_dir.join("beach_02.png").exists());
        assert_eq!(read_log(&summary)[0]["status"], "ok");
    }

    #[tokio::test]
    async fn test_failed_row_does_not_stop_the_batch() {
        let fixture = Fixture::new("prompt,ref_images\nwith ref,missing.png\nplain,\n");
        let generator = MockGenerator::default();

        let summary = run_batch(&fixture.options(), Some(&generator))
            .await
            .unwrap();

        assert_eq!(summary.ok, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.exit_code(), 2);
        let log = read_log(&summary);
        assert_eq!(log[0]["status"], "error");
        assert!(log[0]["error"].as_str().unwrap().contains("missing.png"));
        assert_eq!(log[1]["status"], "ok");
        assert_eq!(*generator.prompts.lock().unwrap(), vec!["plain"]);
    }

    #[tokio::test]
    async fn test_ref_images_resolve_against_csv_dir() {
        let fixture = Fixture::new("prompt,ref_images\nrestyle {0},refs/photo.jpg; /abs/b.png\n");
        let options = BatchOptions {
            dry_run: true,
            ..fixture.options()
        };

        let summary = run_batch(&options, None).await.unwrap();

        let log = read_log(&summary);
        let refs = log[0]["parsed_request"]["ref_images"].as_array().unwrap();
        assert_eq!(
            refs[0].as_str().unwrap(),
            fixture.dir.path().join("refs/photo.jpg").to_str().unwrap()
        );
        assert!(log[0]["output_files"][0]
            .as_str()
            .unwrap()
            .ends_with("photo.png"));
    }

    #[tokio::test]
    async fn test_limit_and_skip_existing() {
        let fixture = Fixture::new("prompt,output_dir\nfirst,{dir}\nsecond,{dir}\nthird,{dir}\n");
        let out = fixture.dir.path().join("fixed");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("first.png"), b"old").unwrap();
        let csv = fs::read_to_string(fixture.dir.path().join("jobs.csv"))
            .unwrap()
            .replace("{dir}", out.to_str().unwrap());
        fs::write(fixture.dir.path().join("jobs.csv"), csv).unwrap();

        let generator = MockGenerator::default();
        let options = BatchOptions {
            limit: Some(2),
            skip_existing: true,
            ..fixture.options()
        };
        let summary = run_batch(&options, Some(&generator)).await.unwrap();

        let log = read_log(&summary);
        assert_eq!(log.len(), 2);
        assert_eq!(log[0]["status"], "skipped");
        assert_eq!(log[1]["status"], "ok");
        assert_eq!(fs::read(out.join("first.png")).unwrap(), b"old");
        assert!(out.join("second.png").exists());
    }

    #[tokio::test]
    async fn test_missing_header_is_fatal() {
        let fixture = Fixture::new("");
        let result = run_batch(&fixture.options(), Some(&MockGenerator::default())).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_generator_required_outside_dry_run() {
        let fixture = Fixture::new("prompt\na cat\n");
        assert!(run_batch(&fixture.options(), None).await.is_err());
    }
}
