use std::{
    path::{Path, PathBuf},
    process::Stdio,
};

use async_trait::async_trait;
use tokio::process::Command;

use crate::{
    entities::{DocumentType, ExtractedImage, ExtractionResult, ResultMetadata},
    error::ProcessorError,
    sanitize_doc_name,
};

use super::{DocumentProcessor, ProcessRequest};

/// Environment forcing the parser to use locally cached models only.
const OFFLINE_ENV: &[(&str, &str)] = &[
    ("MODELSCOPE_OFFLINE", "1"),
    ("HF_OFFLINE", "1"),
    ("TRANSFORMERS_OFFLINE", "1"),
    ("HF_HUB_OFFLINE", "1"),
    ("NO_PROXY", "*"),
    ("OFFLINE_MODE", "1"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandConfig {
    /// Document parser executable, invoked as `<bin> -p <input> -o <outdir>`.
    pub parser_bin: String,
    /// Office converter used to turn Word documents into PDF first.
    pub converter_bin: String,
    /// Inference device. `cpu` is the parser's own default and is not passed.
    pub device: String,
    /// Local Hugging Face cache, exported as `HF_HOME` when it exists.
    pub model_cache: Option<PathBuf>,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            parser_bin: "mineru".to_owned(),
            converter_bin: "libreoffice".to_owned(),
            device: "cpu".to_owned(),
            model_cache: None,
        }
    }
}

/// Runs an external document parser on PDFs, images and Word documents.
///
/// Every call works in its own temporary directory, removed when the call ends.
/// Children are killed if the call is dropped, so an abandoned job does not
/// leave a parser running.
#[derive(Debug, Clone, Default)]
pub struct CommandProcessor {
    config: CommandConfig,
}

impl CommandProcessor {
    pub fn new(config: CommandConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CommandConfig {
        &self.config
    }

    fn parser_command(&self, input: &Path, output_dir: &Path) -> Command {
        let mut cmd = Command::new(&self.config.parser_bin);
        cmd.arg("-p").arg(input).arg("-o").arg(output_dir);
        if self.config.device != "cpu" {
            cmd.arg("--device").arg(&self.config.device);
        }
        if let Some(cache) = self.config.model_cache.as_ref().filter(|p| p.exists()) {
            cmd.env("HF_HOME", cache)
                .env("HUGGINGFACE_HUB_CACHE", cache.join("hub"));
        }
        cmd.envs(OFFLINE_ENV.iter().copied());
        cmd
    }

    async fn convert_to_pdf(
        &self,
        input: &Path,
        output_dir: &Path,
    ) -> Result<PathBuf, ProcessorError> {
        let mut cmd = Command::new(&self.config.converter_bin);
        cmd.args(["--headless", "--convert-to", "pdf", "--outdir"])
            .arg(output_dir)
            .arg(input);
        run_command(cmd, &self.config.converter_bin).await?;

        let stem = input
            .file_stem()
            .ok_or_else(|| ProcessorError::MissingOutput(self.config.converter_bin.clone()))?;
        let pdf_path = output_dir.join(stem).with_extension("pdf");
        if !tokio::fs::try_exists(&pdf_path).await? {
            return Err(ProcessorError::MissingOutput(
                self.config.converter_bin.clone(),
            ));
        }
        Ok(pdf_path)
    }
}

#[async_trait]
impl DocumentProcessor for CommandProcessor {
    fn name(&self) -> &str {
        "command"
    }

    fn supports(&self, document_type: DocumentType) -> bool {
        matches!(
            document_type,
            DocumentType::Pdf | DocumentType::Image | DocumentType::Word
        )
    }

    #[tracing::instrument(skip_all, fields(filename = %req.filename, parser = %self.config.parser_bin))]
    async fn process(&self, req: ProcessRequest) -> Result<ExtractionResult, ProcessorError> {
        if !self.supports(req.document_type) {
            return Err(ProcessorError::Unsupported(req.document_type));
        }

        let workdir = tempfile::tempdir()?;
        let input_dir = workdir.path().join("input");
        let output_dir = workdir.path().join("output");
        tokio::fs::create_dir_all(&input_dir).await?;
        tokio::fs::create_dir_all(&output_dir).await?;

        let input = input_dir.join(input_file_name(&req.filename, req.document_type));
        tokio::fs::write(&input, &req.payload).await?;

        let (input, converted_to) = if req.document_type == DocumentType::Word {
            tracing::info!("converting word document to pdf");
            let converted_dir = workdir.path().join("converted");
            tokio::fs::create_dir_all(&converted_dir).await?;
            let pdf = self.convert_to_pdf(&input, &converted_dir).await?;
            (pdf, Some("pdf".to_owned()))
        } else {
            (input, None)
        };

        run_command(
            self.parser_command(&input, &output_dir),
            &self.config.parser_bin,
        )
        .await?;

        let outputs = collect_outputs(&output_dir).await?;
        let markdown_file = outputs
            .iter()
            .find(|p| has_extension(p, "md"))
            .ok_or_else(|| ProcessorError::MissingOutput(self.config.parser_bin.clone()))?;
        let markdown = tokio::fs::read_to_string(markdown_file).await?;

        let images = if req.options.extract_images {
            outputs
                .iter()
                .filter(|p| has_extension(p, "png"))
                .map(|p| ExtractedImage {
                    path: p
                        .strip_prefix(&output_dir)
                        .unwrap_or(p)
                        .display()
                        .to_string(),
                    kind: "extracted".to_owned(),
                })
                .collect()
        } else {
            Vec::new()
        };
        tracing::debug!(images = images.len(), "parser output collected");

        Ok(ExtractionResult {
            text_content: markdown.clone(),
            markdown_content: Some(markdown),
            images,
            tables: Vec::new(),
            metadata: ResultMetadata {
                pages: None,
                original_format: req.document_type.to_string(),
                processor: program_name(&self.config.parser_bin),
                converted_to,
                extra: Default::default(),
            },
        })
    }
}

async fn run_command(mut cmd: Command, program: &str) -> Result<(), ProcessorError> {
    tracing::debug!("running {cmd:?}");
    let output = cmd
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| ProcessorError::Spawn {
            program: program.to_owned(),
            source,
        })?;
    if !output.status.success() {
        return Err(ProcessorError::CommandFailed {
            program: program.to_owned(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        });
    }
    Ok(())
}

/// Every file below `root`, sorted so the first markdown output is stable.
async fn collect_outputs(root: &Path) -> Result<Vec<PathBuf>, ProcessorError> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                pending.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

fn input_file_name(filename: &str, document_type: DocumentType) -> String {
    let path = Path::new(filename);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .map(sanitize_doc_name)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "document".to_owned());
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| document_type.as_str().to_owned());
    format!("{stem}.{ext}")
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

fn program_name(program: &str) -> String {
    Path::new(program)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(program)
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_names_are_sanitized() {
        assert_eq!(
            input_file_name("../../etc/Annual Report.PDF", DocumentType::Pdf),
            "AnnualReport.pdf"
        );
        assert_eq!(input_file_name("???.png", DocumentType::Image), "---.png");
        assert_eq!(input_file_name("   .docx", DocumentType::Word), "document.docx");
        assert_eq!(input_file_name("scan", DocumentType::Image), "scan.image");
    }

    #[test]
    fn parser_command_line() {
        let processor = CommandProcessor::new(CommandConfig {
            device: "cuda".to_owned(),
            ..Default::default()
        });
        let cmd = processor.parser_command(Path::new("/in/a.pdf"), Path::new("/out"));
        let std_cmd = cmd.as_std();
        assert_eq!(std_cmd.get_program(), "mineru");
        let args: Vec<_> = std_cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args, ["-p", "/in/a.pdf", "-o", "/out", "--device", "cuda"]);
        assert!(std_cmd
            .get_envs()
            .any(|(k, v)| k == "HF_HUB_OFFLINE" && v.is_some_and(|v| v == "1")));
    }

    #[test]
    fn cpu_device_is_not_passed() {
        let processor = CommandProcessor::default();
        let cmd = processor.parser_command(Path::new("a.pdf"), Path::new("out"));
        assert!(!cmd.as_std().get_args().any(|a| a == "--device"));
    }

    #[test]
    fn program_names() {
        assert_eq!(program_name("/opt/bin/mineru"), "mineru");
        assert_eq!(program_name("mineru"), "mineru");
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let processor = CommandProcessor::new(CommandConfig {
            parser_bin: "docket-no-such-parser".to_owned(),
            ..Default::default()
        });
        let req = ProcessRequest {
            job_id: crate::entities::JobId::new(),
            filename: "a.pdf".to_owned(),
            payload: std::sync::Arc::from(&b"%PDF-1.4"[..]),
            document_type: DocumentType::Pdf,
            options: Default::default(),
        };
        let err = processor.process(req).await.unwrap_err();
        assert!(matches!(err, ProcessorError::Spawn { .. }), "{err}");
    }
}
