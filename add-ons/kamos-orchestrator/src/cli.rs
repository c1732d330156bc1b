//! Argument parsing for the orchestrator.

use kamos_core::matrix::{clamp_matrix_size, DEFAULT_MATRIX_SIZE};
use kamos_core::AnalysisFlags;
use std::fmt;
use std::path::PathBuf;

pub const USAGE: &str = "\
Usage: kamos-orchestrator [-m <number> | -m<number> | -m=<number> | --matrix] \"Some complex question...\"
       kamos-orchestrator ask [options] \"Some question...\"
Options for ask:
  -g, --google        Enable Google Search
  -r, --rag           Include past articles
  -s, --saved         Include saved analyses
      --specs         Include Kamos framework specifications
  -i, --image <path>  Attach an image (png, jpeg, gif, webp, heic)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Split, run relay sessions, synthesize.
    Matrix(CliArgs),
    /// One direct call to the analysis service.
    Ask(AskArgs),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    pub prompt: String,
    /// Clamped matrix size when a matrix flag was given.
    pub matrix: Option<usize>,
    max: usize,
}

impl CliArgs {
    pub fn is_matrix(&self) -> bool {
        self.matrix.is_some()
    }

    /// Number of tasks to split into. Non-matrix runs still use the default size.
    pub fn task_count(&self) -> usize {
        self.matrix.unwrap_or_else(|| DEFAULT_MATRIX_SIZE.min(self.max))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AskArgs {
    pub prompt: String,
    pub flags: AnalysisFlags,
    pub image: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsageError {
    MissingPrompt,
    MissingValue(&'static str),
}

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UsageError::MissingPrompt => write!(f, "Please provide a prompt."),
            UsageError::MissingValue(flag) => write!(f, "{} requires a value.", flag),
        }
    }
}

impl std::error::Error for UsageError {}

/// Parse everything after the program name. A leading `ask` selects direct analysis.
pub fn parse_command<I>(args: I, matrix_max: usize) -> Result<Command, UsageError>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter().peekable();
    if args.peek().is_some_and(|first| first == "ask") {
        args.next();
        return parse_ask(args).map(Command::Ask);
    }
    parse_args(args, matrix_max).map(Command::Matrix)
}

/// Matrix-mode arguments. Words that are not flags form the prompt.
pub fn parse_args<I>(args: I, matrix_max: usize) -> Result<CliArgs, UsageError>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter().peekable();
    let mut requested: Option<Option<i64>> = None;
    let mut words = Vec::new();

    while let Some(arg) = args.next() {
        if arg == "--matrix" {
            requested = Some(Some(DEFAULT_MATRIX_SIZE as i64));
        } else if let Some(rest) = arg.strip_prefix("-m") {
            let value = rest.strip_prefix('=').unwrap_or(rest);
            requested = Some(if !value.is_empty() {
                value.parse::<i64>().ok()
            } else if args.peek().is_some_and(|next| is_digits(next)) {
                args.next().and_then(|n| n.parse::<i64>().ok())
            } else {
                Some(DEFAULT_MATRIX_SIZE as i64)
            });
        } else {
            words.push(arg);
        }
    }

    let prompt = words.join(" ");
    if prompt.is_empty() {
        return Err(UsageError::MissingPrompt);
    }

    Ok(CliArgs {
        prompt,
        matrix: requested.map(|n| clamp_matrix_size(n, matrix_max)),
        max: matrix_max,
    })
}

fn parse_ask<I>(args: I) -> Result<AskArgs, UsageError>
where
    I: Iterator<Item = String>,
{
    let mut args = args;
    let mut flags = AnalysisFlags::default();
    let mut image = None;
    let mut words = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-g" | "--google" => flags.use_search = true,
            "-r" | "--rag" => flags.include_past_articles = true,
            "-s" | "--saved" => flags.include_saved_analyses = true,
            "--specs" => flags.include_specs = true,
            "-i" | "--image" => {
                let path = args.next().ok_or(UsageError::MissingValue("--image"))?;
                image = Some(PathBuf::from(path));
            }
            _ => words.push(arg),
        }
    }

    let prompt = words.join(" ");
    if prompt.is_empty() {
        return Err(UsageError::MissingPrompt);
    }
    Ok(AskArgs { prompt, flags, image })
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}
