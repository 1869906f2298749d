use std::{
    collections::HashSet,
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::Context;
use colored::*;

pub mod config;
pub mod entities;
pub mod error;
pub mod manager;
pub mod processor;

pub use config::JobManagerConfig;
pub use entities::{
    DocumentType, ExtractionMode, ExtractionResult, JobId, JobPage, JobSnapshot, JobState,
    JobStats, ProcessOptions, SUPPORTED_EXTENSIONS,
};
pub use error::{FailureReason, JobError, ProcessorError};
pub use manager::JobManager;
pub use processor::{DocumentProcessor, ProcessRequest};

pub(crate) fn sanitize_doc_name(doc_name: &str) -> String {
    doc_name
        .chars()
        .filter_map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                Some(c)
            } else if c.is_whitespace() {
                None
            } else {
                Some('-')
            }
        })
        .collect::<String>()
}

fn doc_stem(doc_name: &str) -> String {
    let stem = Path::new(doc_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(doc_name);
    sanitize_doc_name(stem)
}

/// Creates a fresh `<dir_name>` below `output_dir`, wiping a previous run's output.
pub fn recreate_result_dir<P: AsRef<Path>>(
    output_dir: Option<P>,
    dir_name: &str,
) -> anyhow::Result<PathBuf> {
    let res_dir_path = match output_dir {
        Some(p) => p.as_ref().join(dir_name),
        None => PathBuf::from(".").join(dir_name),
    };
    if res_dir_path.exists() {
        std::fs::remove_dir_all(&res_dir_path)
            .with_context(|| format!("can't clear {}", res_dir_path.display()))?;
    }
    std::fs::create_dir_all(&res_dir_path)
        .with_context(|| format!("can't create {}", res_dir_path.display()))?;
    Ok(res_dir_path)
}

/// Saves the completed jobs of one run, each in its own `<name>-results` directory.
///
/// A directory is cleared at most once per run. When two documents share a
/// name, the later one goes to `<name>-<short job id>-results`.
#[derive(Debug, Default)]
pub struct ResultSaver {
    output_dir: Option<PathBuf>,
    save_markdown: bool,
    claimed: HashSet<String>,
}

impl ResultSaver {
    pub fn new(output_dir: Option<PathBuf>, save_markdown: bool) -> Self {
        Self {
            output_dir,
            save_markdown,
            claimed: HashSet::new(),
        }
    }

    fn claim_dir_name(&mut self, snapshot: &JobSnapshot) -> String {
        let stem = doc_stem(&snapshot.filename);
        let dir_name = format!("{stem}-results");
        if self.claimed.insert(dir_name.clone()) {
            return dir_name;
        }
        let job_id = snapshot.id.as_uuid().simple().to_string();
        let dir_name = format!("{stem}-{}-results", &job_id[..8]);
        self.claimed.insert(dir_name.clone());
        dir_name
    }

    /// Writes the snapshot as JSON and, when asked, the markdown content next to it.
    pub fn save(&mut self, snapshot: &JobSnapshot) -> anyhow::Result<PathBuf> {
        let dir_name = self.claim_dir_name(snapshot);
        let res_dir_path = recreate_result_dir(self.output_dir.as_ref(), &dir_name)?;
        let sanitized_doc_name = doc_stem(&snapshot.filename);

        let file_out = res_dir_path.join(format!("{}.json", &sanitized_doc_name));
        let file = File::create(&file_out)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, snapshot)?;
        writer.flush()?;

        if self.save_markdown {
            let markdown = snapshot
                .result
                .as_ref()
                .and_then(|r| r.markdown_content.as_deref());
            match markdown {
                Some(md_content) => {
                    let md_file_out = res_dir_path.join(format!("{}.md", sanitized_doc_name));
                    std::fs::write(&md_file_out, md_content)?;
                }
                None => println!(
                    "{} No markdown content for {}",
                    "ℹ".yellow().bold(),
                    snapshot.filename.yellow()
                ),
            }
        }
        println!(
            "{} Results saved in: {}",
            "✓".green().bold(),
            res_dir_path.display().to_string().cyan().underline()
        );

        Ok(res_dir_path)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn completed(filename: &str, text: &str) -> JobSnapshot {
        JobSnapshot {
            id: JobId::new(),
            filename: filename.to_owned(),
            file_size: text.len() as u64,
            document_type: DocumentType::from_filename(filename).unwrap(),
            extraction_mode: ExtractionMode::Markdown,
            state: JobState::Completed,
            submitted_at: Utc::now(),
            started_at: Some(Utc::now()),
            completed_at: Some(Utc::now()),
            processing_time_ms: Some(5),
            result: Some(ExtractionResult {
                text_content: text.to_owned(),
                markdown_content: Some(format!("# {text}")),
                ..Default::default()
            }),
            failure: None,
        }
    }

    #[test]
    fn sanitizes_names() {
        assert_eq!(sanitize_doc_name("Annual report 2024"), "Annualreport2024");
        assert_eq!(sanitize_doc_name("a/b.c"), "a-b-c");
        assert_eq!(sanitize_doc_name("报告_v2"), "报告_v2");
    }

    #[test]
    fn result_dir_is_recreated() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = recreate_result_dir(Some(tmp.path()), "myreport-results").unwrap();
        assert_eq!(dir, tmp.path().join("myreport-results"));
        std::fs::write(dir.join("stale.json"), "{}").unwrap();

        let dir = recreate_result_dir(Some(tmp.path()), "myreport-results").unwrap();
        assert!(dir.is_dir());
        assert!(!dir.join("stale.json").exists());
    }

    #[test]
    fn saves_json_and_markdown() {
        let tmp = tempfile::tempdir().unwrap();
        let mut saver = ResultSaver::new(Some(tmp.path().to_path_buf()), true);

        let dir = saver.save(&completed("my report.pdf", "hello")).unwrap();

        assert_eq!(dir, tmp.path().join("myreport-results"));
        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.join("myreport.json")).unwrap()).unwrap();
        assert_eq!(json["state"], "completed");
        assert_eq!(
            std::fs::read_to_string(dir.join("myreport.md")).unwrap(),
            "# hello"
        );
    }

    #[test]
    fn same_stem_in_one_run_keeps_both_results() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("report-results")).unwrap();
        std::fs::write(tmp.path().join("report-results/stale.json"), "{}").unwrap();
        let mut saver = ResultSaver::new(Some(tmp.path().to_path_buf()), false);

        let first = completed("report.pdf", "first");
        let second = completed("report.docx", "second");
        let first_dir = saver.save(&first).unwrap();
        let second_dir = saver.save(&second).unwrap();

        assert_eq!(first_dir, tmp.path().join("report-results"));
        assert!(!first_dir.join("stale.json").exists());
        assert_ne!(first_dir, second_dir);
        let short_id = &second.id.as_uuid().simple().to_string()[..8];
        assert_eq!(
            second_dir,
            tmp.path().join(format!("report-{short_id}-results"))
        );

        let first_json = std::fs::read_to_string(first_dir.join("report.json")).unwrap();
        let second_json = std::fs::read_to_string(second_dir.join("report.json")).unwrap();
        assert!(first_json.contains("\"first\""));
        assert!(second_json.contains("\"second\""));
    }
}
