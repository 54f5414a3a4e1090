//! Progress reporting for ingestion and clustering.
//!
//! The CLI uses `IndicatifReporter`; library callers use `NoopReporter` or
//! their own implementation.

use std::sync::Mutex;

use indicatif::{ProgressBar, ProgressStyle};

/// Named phases of a long-running operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Walk,
    Extract,
    Resolve,
    History,
    Commit,
    Cluster,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Self::Walk => "scanning files",
            Self::Extract => "extracting entities",
            Self::Resolve => "resolving references",
            Self::History => "mining git history",
            Self::Commit => "writing generation",
            Self::Cluster => "clustering",
        }
    }
}

pub trait ProgressReporter: Send + Sync {
    /// Begin a stage with an optional total count.
    fn start(&self, stage: Stage, total: Option<u64>);

    fn advance(&self, amount: u64);

    fn finish(&self);

    fn message(&self, msg: &str);
}

#[derive(Debug, Default)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn start(&self, _stage: Stage, _total: Option<u64>) {}
    fn advance(&self, _amount: u64) {}
    fn finish(&self) {}
    fn message(&self, _msg: &str) {}
}

/// Reporter backed by `indicatif` progress bars, drawn to stderr.
#[derive(Debug)]
pub struct IndicatifReporter {
    bar: Mutex<Option<ProgressBar>>,
    hidden: bool,
}

impl Default for IndicatifReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl IndicatifReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
            hidden: false,
        }
    }

    /// A reporter that tracks state but draws nothing.
    pub fn hidden() -> Self {
        Self {
            bar: Mutex::new(None),
            hidden: true,
        }
    }

    fn style(total: Option<u64>) -> ProgressStyle {
        let template = if total.is_some() {
            "{spinner:.green} {msg} [{bar:30.cyan/blue}] {pos}/{len} ({eta})"
        } else {
            "{spinner:.green} {msg} {pos}"
        };
        ProgressStyle::with_template(template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ")
    }
}

impl ProgressReporter for IndicatifReporter {
    fn start(&self, stage: Stage, total: Option<u64>) {
        let bar = if self.hidden {
            ProgressBar::hidden()
        } else {
            match total {
                Some(n) => ProgressBar::new(n),
                None => ProgressBar::new_spinner(),
            }
        };
        bar.set_style(Self::style(total));
        bar.set_message(stage.label());
        let mut slot = self.bar.lock().expect("progress mutex poisoned");
        if let Some(previous) = slot.replace(bar) {
            previous.finish_and_clear();
        }
    }

    fn advance(&self, amount: u64) {
        if let Some(bar) = self.bar.lock().expect("progress mutex poisoned").as_ref() {
            bar.inc(amount);
        }
    }

    fn finish(&self) {
        if let Some(bar) = self.bar.lock().expect("progress mutex poisoned").take() {
            bar.finish_and_clear();
        }
    }

    fn message(&self, msg: &str) {
        match self.bar.lock().expect("progress mutex poisoned").as_ref() {
            Some(bar) => bar.println(msg),
            None if !self.hidden => eprintln!("{msg}"),
            None => {}
        }
    }
}
