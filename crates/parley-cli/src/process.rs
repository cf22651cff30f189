//! Turn text files into structured fields with a chat model

use anyhow::{Context, bail};
use futures::StreamExt;
use parley_ai::{
    ChatMessage, ChatModel, MessageEventStream, providers::ChatProvider, stream::MessageEvent,
};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Value used for fields the model could not fill
pub const UNKNOWN: &str = "unknown";

/// Name of the table written when a directory is processed
pub const OUTPUT_CSV: &str = "output.csv";

/// One requested output field, given on the command line as `key=description`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub key: String,
    pub description: String,
}

impl FromStr for FieldSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, description) = s.split_once('=').unwrap_or((s, ""));
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("field needs a key: {s:?}"));
        }
        Ok(Self {
            key: key.to_string(),
            description: description.trim().to_string(),
        })
    }
}

pub struct FileProcessor<'a> {
    provider: &'a dyn ChatProvider,
    model: ChatModel,
    instructions: String,
    fields: Vec<FieldSpec>,
}

impl<'a> FileProcessor<'a> {
    pub fn new(
        provider: &'a dyn ChatProvider,
        model: ChatModel,
        instructions: impl Into<String>,
        fields: Vec<FieldSpec>,
    ) -> Self {
        Self {
            provider,
            model,
            instructions: instructions.into(),
            fields,
        }
    }

    /// The system prompt: the instructions plus, when fields were requested,
    /// the JSON object the model must answer with.
    pub fn system_prompt(&self) -> String {
        if self.fields.is_empty() {
            return self.instructions.clone();
        }
        let mut format = Map::new();
        for field in &self.fields {
            format.insert(field.key.clone(), Value::String(field.description.clone()));
        }
        format!(
            "{}\n\n# Output format\nAnswer with a JSON object with exactly these keys. \
             Use \"{}\" for any value you cannot determine.\n{}",
            self.instructions.trim(),
            UNKNOWN,
            Value::Object(format)
        )
    }

    /// Raw model output for one text
    pub async fn process_text(&self, text: &str) -> anyhow::Result<String> {
        let messages = [
            ChatMessage::system(self.system_prompt()),
            ChatMessage::user(text),
        ];
        let events = self
            .provider
            .stream(&self.model, &messages, !self.fields.is_empty())
            .await?;
        collect_text(events).await
    }

    /// Requested fields for one text; missing or null values become `unknown`
    pub async fn extract(&self, text: &str) -> anyhow::Result<Map<String, Value>> {
        let output = self.process_text(text).await?;
        let parsed: Value =
            serde_json::from_str(&output).context("Model output is not valid JSON")?;
        let Value::Object(object) = parsed else {
            bail!("Model output is not a JSON object: {}", output);
        };

        let mut fields = Map::new();
        for field in &self.fields {
            let value = match object.get(&field.key) {
                Some(Value::Null) | None => Value::String(UNKNOWN.to_string()),
                Some(value) => value.clone(),
            };
            fields.insert(field.key.clone(), value);
        }
        Ok(fields)
    }

    pub async fn process_file(&self, path: &Path) -> anyhow::Result<String> {
        let text = read_text(path)?;
        tracing::info!("Processing {}", path.display());
        if self.fields.is_empty() {
            return self.process_text(&text).await;
        }
        let fields = self.extract(&text).await?;
        Ok(serde_json::to_string_pretty(&Value::Object(fields))?)
    }

    /// Process every matching file in `dir` into `dir/output.csv`.
    ///
    /// Files that fail are logged and skipped. Returns the table's path and
    /// the number of failures.
    pub async fn process_directory(
        &self,
        dir: &Path,
        extension: &str,
    ) -> anyhow::Result<(PathBuf, usize)> {
        let files = matching_files(dir, extension)?;
        let output = dir.join(OUTPUT_CSV);
        let mut writer = csv::Writer::from_path(&output)
            .with_context(|| format!("Failed to create {}", output.display()))?;

        let mut header = vec!["file_name".to_string()];
        if self.fields.is_empty() {
            header.push("output".to_string());
        } else {
            header.extend(self.fields.iter().map(|f| f.key.clone()));
        }
        writer.write_record(&header)?;

        let mut failed = 0;
        for path in files {
            match self.table_row(&path).await {
                Ok(row) => writer.write_record(&row)?,
                Err(e) => {
                    failed += 1;
                    tracing::error!("Failed to process {}: {:#}", path.display(), e);
                }
            }
        }
        writer.flush()?;
        Ok((output, failed))
    }

    async fn table_row(&self, path: &Path) -> anyhow::Result<Vec<String>> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let text = read_text(path)?;
        tracing::info!("Processing {}", path.display());

        let mut row = vec![name];
        if self.fields.is_empty() {
            row.push(self.process_text(&text).await?);
        } else {
            let fields = self.extract(&text).await?;
            row.extend(fields.values().map(cell_text));
        }
        Ok(row)
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn read_text(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Files directly inside `dir` whose names end with `extension`, sorted
fn matching_files(dir: &Path, extension: &str) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in
        std::fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))?
    {
        let path = entry?.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(extension) && n != OUTPUT_CSV);
        if path.is_file() && matches {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

async fn collect_text(mut events: MessageEventStream) -> anyhow::Result<String> {
    let mut text = String::new();
    while let Some(event) = events.next().await {
        match event {
            MessageEvent::TextDelta { delta } => text.push_str(&delta),
            MessageEvent::Done { text: full, .. } => return Ok(full),
            MessageEvent::Error { message } => bail!("Chat stream failed: {}", message),
        }
    }
    Ok(text)
}
