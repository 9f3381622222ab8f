//! Host integration hooks.

use crate::pipeline::PageResult;

/// A page handed to the pipeline.
#[derive(Debug, Clone, Copy)]
pub struct Document<'a> {
    /// Logical path of the page (e.g. `guide/intro.md`).
    pub id: &'a str,
    /// Page source text.
    pub text: &'a str,
}

/// Callbacks the host uses to steer and observe page processing.
///
/// Both methods have no-op defaults; implement only what you need.
pub trait PageHooks: Send + Sync {
    /// Whether `document` should be processed at all.
    ///
    /// Returning `false` passes the page through untouched.
    fn should_process(&self, _document: &Document<'_>) -> bool {
        true
    }

    /// Called after `document` was processed successfully.
    fn on_page_rendered(&self, _document: &Document<'_>, _result: &PageResult) {}
}

/// Hooks that process every page and observe nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHooks;

impl PageHooks for DefaultHooks {}
