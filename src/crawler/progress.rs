use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

use super::CrawledResource;
use crate::error::CrawlError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSummary {
    pub errors: usize,
    pub warnings: usize,
    pub objects: usize,
}

/// Receives crawl events. Shared between crawler tasks.
pub trait Progresser: Send + Sync {
    fn on_new_object(&self, resource: &CrawledResource);
    fn on_warning(&self, message: &str);
    fn on_error(&self, error: &CrawlError);
    fn get_summary(&self) -> ProgressSummary;
}

#[derive(Debug, Default)]
pub struct CrawlProgress {
    objects: AtomicUsize,
    warnings: AtomicUsize,
    errors: AtomicUsize,
    last_error: Mutex<Option<String>>,
}

impl CrawlProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl Progresser for CrawlProgress {
    fn on_new_object(&self, resource: &CrawledResource) {
        log::debug!("Crawled {}", resource.key);
        self.objects.fetch_add(1, Ordering::Relaxed);
    }

    fn on_warning(&self, message: &str) {
        log::warn!("{}", message);
        self.warnings.fetch_add(1, Ordering::Relaxed);
    }

    fn on_error(&self, error: &CrawlError) {
        log::error!("{}", error);
        self.errors.fetch_add(1, Ordering::Relaxed);
        *self
            .last_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(error.to_string());
    }

    fn get_summary(&self) -> ProgressSummary {
        ProgressSummary {
            errors: self.errors.load(Ordering::Relaxed),
            warnings: self.warnings.load(Ordering::Relaxed),
            objects: self.objects.load(Ordering::Relaxed),
        }
    }
}
