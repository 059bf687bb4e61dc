//! Driver contract for the TODO page, plus a headless implementation that
//! drives the same surface over HTTP.

use std::time::Duration;

use tracing::debug;

use crate::api::{HttpTodoApi, TodoApi};
use crate::error::SutError;

/// What a scenario can do with the rendered page: a text input, an add
/// control, a list of entries each with its text and a delete control, and
/// the document title.
pub trait Page: Send {
    /// Load `path` relative to the application root.
    ///
    /// # Errors
    ///
    /// Returns a [`SutError`] when the page cannot be loaded.
    fn goto(&mut self, path: &str) -> Result<(), SutError>;

    /// # Errors
    ///
    /// Returns a [`SutError`] before navigation or when the title cannot be read.
    fn title(&mut self) -> Result<String, SutError>;

    /// Replace the text input's value.
    ///
    /// # Errors
    ///
    /// Returns a [`SutError`] when the input is not available.
    fn fill_input(&mut self, text: &str) -> Result<(), SutError>;

    /// Submit the input's current value.
    ///
    /// # Errors
    ///
    /// Returns a [`SutError`] when the add control cannot be triggered.
    fn click_add(&mut self) -> Result<(), SutError>;

    /// Texts of every entry currently rendered in the list.
    ///
    /// # Errors
    ///
    /// Returns a [`SutError`] when the list cannot be read.
    fn item_texts(&mut self) -> Result<Vec<String>, SutError>;

    /// Click the delete control of the first entry whose text contains
    /// `needle`. Returns whether such an entry was rendered.
    ///
    /// # Errors
    ///
    /// Returns a [`SutError`] when the click cannot be dispatched.
    fn click_delete(&mut self, needle: &str) -> Result<bool, SutError>;
}

/// Pull the text of the first `<title>` element out of an HTML document.
#[must_use]
pub fn extract_title(html: &str) -> Option<String> {
    let lower = html.to_ascii_lowercase();
    let open = lower.find("<title")?;
    let content_start = open + lower[open..].find('>')? + 1;
    let content_end = content_start + lower[content_start..].find("</title")?;
    Some(html[content_start..content_end].trim().to_string())
}

/// [`Page`] over the service's HTTP surface, for running the suite without
/// a browser.
#[derive(Debug, Clone)]
pub struct HttpPage {
    api: HttpTodoApi,
    input: String,
    title: Option<String>,
}

impl HttpPage {
    #[must_use]
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            api: HttpTodoApi::new(base_url, timeout),
            input: String::new(),
            title: None,
        }
    }

    fn ensure_loaded(&self) -> Result<(), SutError> {
        if self.title.is_none() {
            return Err(SutError::Driver("page has not been navigated".into()));
        }
        Ok(())
    }
}

impl Page for HttpPage {
    fn goto(&mut self, path: &str) -> Result<(), SutError> {
        let html = self.api.get_text(path)?;
        let title = extract_title(&html).unwrap_or_default();
        debug!(path, %title, "navigated");
        self.title = Some(title);
        self.input.clear();
        Ok(())
    }

    fn title(&mut self) -> Result<String, SutError> {
        self.title
            .clone()
            .ok_or_else(|| SutError::Driver("page has not been navigated".into()))
    }

    fn fill_input(&mut self, text: &str) -> Result<(), SutError> {
        self.ensure_loaded()?;
        text.clone_into(&mut self.input);
        Ok(())
    }

    fn click_add(&mut self) -> Result<(), SutError> {
        self.ensure_loaded()?;
        self.api.create(&self.input)
    }

    fn item_texts(&mut self) -> Result<Vec<String>, SutError> {
        self.ensure_loaded()?;
        Ok(self.api.list()?.into_iter().map(|item| item.text).collect())
    }

    fn click_delete(&mut self, needle: &str) -> Result<bool, SutError> {
        self.ensure_loaded()?;
        let Some(item) = self
            .api
            .list()?
            .into_iter()
            .find(|item| item.text.contains(needle))
        else {
            return Ok(false);
        };
        self.api.delete(&item.id)?;
        Ok(true)
    }
}
