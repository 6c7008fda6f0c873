//! Render sinks for the ranked output.
//!
//! Presenters are stateless: every call replaces whatever the previous call
//! produced. Three are provided:
//! - `console`: one line per entry with a text bar,
//! - `json`: the render-sink array on a single line,
//! - `html`: a markup fragment written atomically to a file.

use anyhow::{anyhow, Context, Result};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::config::PresenterSettings;
use crate::prediction::RankedResult;

const BAR_CELLS: usize = 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresenterKind {
    Console,
    Json,
    Html,
}

impl PresenterKind {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "console" | "text" => Ok(Self::Console),
            "json" => Ok(Self::Json),
            "html" => Ok(Self::Html),
            other => Err(anyhow!(
                "unsupported presenter '{}'; expected console, json or html",
                other
            )),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Console => "console",
            Self::Json => "json",
            Self::Html => "html",
        }
    }
}

pub trait Presenter: Send + Sync {
    fn render(&self, ranked: &RankedResult) -> Result<()>;
}

/// Build the presenter selected in config.
pub fn presenter_for(settings: &PresenterSettings) -> Box<dyn Presenter> {
    match settings.kind {
        PresenterKind::Console => Box::new(ConsolePresenter::stdout()),
        PresenterKind::Json => Box::new(JsonPresenter::stdout()),
        PresenterKind::Html => Box::new(HtmlPresenter::new(settings.html_path.clone())),
    }
}

pub struct ConsolePresenter {
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsolePresenter {
    pub fn stdout() -> Self {
        Self::with_writer(Box::new(io::stdout()))
    }

    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }
}

impl Presenter for ConsolePresenter {
    fn render(&self, ranked: &RankedResult) -> Result<()> {
        let mut out = self
            .out
            .lock()
            .map_err(|_| anyhow!("console presenter lock poisoned"))?;
        out.write_all(console_text(ranked).as_bytes())?;
        out.flush()?;
        Ok(())
    }
}

/// Text block for the console: a header, then `label  NN.NN% [bar]` rows.
pub fn console_text(ranked: &RankedResult) -> String {
    let mut text = String::from("-- top predictions --\n");
    if ranked.is_empty() {
        text.push_str("  (no predictions yet)\n");
        return text;
    }
    let width = ranked
        .entries()
        .iter()
        .map(|entry| entry.label.len())
        .max()
        .unwrap_or(0);
    for entry in ranked.entries() {
        text.push_str(&format!(
            "  {:<width$}  {:>7}%  [{}]\n",
            entry.label,
            entry.confidence_text(),
            bar(entry.score),
            width = width
        ));
    }
    text
}

fn bar(score: f64) -> String {
    let filled = if score.is_finite() {
        ((score.clamp(0.0, 100.0) / 100.0) * BAR_CELLS as f64).round() as usize
    } else {
        0
    };
    let mut cells = "#".repeat(filled);
    cells.push_str(&".".repeat(BAR_CELLS - filled));
    cells
}

pub struct JsonPresenter {
    out: Mutex<Box<dyn Write + Send>>,
}

impl JsonPresenter {
    pub fn stdout() -> Self {
        Self::with_writer(Box::new(io::stdout()))
    }

    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }
}

impl Presenter for JsonPresenter {
    fn render(&self, ranked: &RankedResult) -> Result<()> {
        let line = serde_json::to_string(&ranked.to_rendered())?;
        let mut out = self
            .out
            .lock()
            .map_err(|_| anyhow!("json presenter lock poisoned"))?;
        writeln!(out, "{}", line)?;
        out.flush()?;
        Ok(())
    }
}

/// Writes the prediction list fragment to `path`.
pub struct HtmlPresenter {
    path: PathBuf,
}

impl HtmlPresenter {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Presenter for HtmlPresenter {
    fn render(&self, ranked: &RankedResult) -> Result<()> {
        write_atomic(&self.path, html_fragment(ranked).as_bytes())
            .with_context(|| format!("write predictions to {}", self.path.display()))
    }
}

pub fn html_fragment(ranked: &RankedResult) -> String {
    let mut html = String::new();
    for entry in ranked.entries() {
        let percent = entry.confidence_text();
        html.push_str("<div class=\"prediction\">\n");
        html.push_str(&format!(
            "  <div class=\"label\">{}</div>\n",
            escape_html(&entry.label)
        ));
        html.push_str(&format!("  <div class=\"confidence\">{}%</div>\n", percent));
        html.push_str(&format!(
            "  <div class=\"bar\"><div class=\"fill\" style=\"width:{}%\"></div></div>\n",
            percent
        ));
        html.push_str("</div>\n");
    }
    html
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(tmp_path, path)?;
    Ok(())
}
