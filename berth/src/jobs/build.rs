use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use berth_shared::errors::{BerthError, BerthResult};
use tokio::io::{AsyncBufReadExt, BufReader, Lines};

use super::{Job, JobKind, JobOutcome, ProgressSink};
use crate::hijack::BoxedReader;
use crate::images::{ImageRecord, ImageStore};
use crate::runtime::types::ImageId;

const FROM: &str = "FROM";

/// One build instruction: a keyword and its raw arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub keyword: String,
    pub args: String,
}

impl Instruction {
    /// Parse one line. Blank lines and `#` comments yield `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        let (keyword, args) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        Some(Self {
            keyword: keyword.to_ascii_uppercase(),
            args: args.trim().to_string(),
        })
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.args.is_empty() {
            f.write_str(&self.keyword)
        } else {
            write!(f, "{} {}", self.keyword, self.args)
        }
    }
}

/// Executes build steps. What an instruction means is up to the backend.
#[async_trait]
pub trait BuildBackend: Send + Sync {
    /// Apply `instruction` on top of `parent`, returning the resulting image.
    async fn apply(
        &self,
        step: usize,
        instruction: &Instruction,
        parent: &ImageId,
        progress: &ProgressSink,
    ) -> BerthResult<ImageId>;
}

enum Source {
    Given(std::vec::IntoIter<String>),
    Client(Option<Lines<BufReader<BoxedReader>>>),
}

impl Source {
    async fn next_line(&mut self) -> Option<String> {
        match self {
            Source::Given(lines) => lines.next(),
            Source::Client(None) => None,
            Source::Client(Some(lines)) => match lines.next_line().await {
                Ok(line) => line,
                Err(e) => {
                    tracing::debug!(error = %e, "Build input ended with an error");
                    None
                }
            },
        }
    }
}

/// Build an image from instructions, one `FROM` first.
///
/// Instructions are either given up front or read line by line from the
/// client's side of the hijacked stream.
pub struct BuildJob {
    source: Source,
    backend: Arc<dyn BuildBackend>,
    images: Arc<dyn ImageStore>,
    tag: Option<String>,
}

impl BuildJob {
    /// Build from instructions the client streams in.
    pub fn from_client(backend: Arc<dyn BuildBackend>, images: Arc<dyn ImageStore>) -> Self {
        Self {
            source: Source::Client(None),
            backend,
            images,
            tag: None,
        }
    }

    pub fn from_instructions<I, S>(
        instructions: I,
        backend: Arc<dyn BuildBackend>,
        images: Arc<dyn ImageStore>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let lines: Vec<String> = instructions.into_iter().map(Into::into).collect();
        Self {
            source: Source::Given(lines.into_iter()),
            backend,
            images,
            tag: None,
        }
    }

    /// Register the result as `reference` (`name` or `name:tag`).
    pub fn tag(mut self, reference: impl Into<String>) -> Self {
        self.tag = Some(reference.into());
        self
    }
}

#[async_trait]
impl Job for BuildJob {
    fn kind(&self) -> JobKind {
        JobKind::Build
    }

    fn accept_input(&mut self, input: BoxedReader) {
        if let Source::Client(slot) = &mut self.source {
            *slot = Some(BufReader::new(input).lines());
        }
    }

    async fn run(self: Box<Self>, progress: ProgressSink) -> BerthResult<JobOutcome> {
        let mut this = self;
        let mut step = 0usize;
        let mut current: Option<ImageId> = None;

        while let Some(line) = this.source.next_line().await {
            let Some(instruction) = Instruction::parse(&line) else {
                continue;
            };
            step += 1;
            progress.line(format!("Step {step} : {instruction}"));

            let image = if instruction.keyword == FROM {
                this.images
                    .resolve(&instruction.args)
                    .ok_or_else(|| BerthError::ImageNotFound(instruction.args.clone()))?
                    .id
            } else {
                let parent = current.as_ref().ok_or_else(|| {
                    BerthError::Config(format!(
                        "Please provide a source image with `from` prior to {}",
                        instruction.keyword.to_ascii_lowercase()
                    ))
                })?;
                this.backend
                    .apply(step, &instruction, parent, &progress)
                    .await?
            };

            progress.line(format!(" ---> {}", image.short()));
            current = Some(image);
        }

        let image = current.ok_or_else(|| BerthError::Config("An image has not been built".into()))?;

        // A FROM-only build yields the base image itself; tagging it adds a
        // reference, the base keeps its own.
        let record = match &this.tag {
            Some(reference) => ImageRecord::new(image.clone(), reference),
            None => ImageRecord::untagged(image.clone()),
        };
        this.images.insert(record);

        progress.line(format!("Successfully built {}", image.short()));
        Ok(JobOutcome::image(image))
    }
}
