use todo_e2e_core::{Page, SutError, TodoApi};

use crate::backend::BackendHandle;

/// A browser page rendered from the simulated backend's visible list.
#[derive(Debug, Clone)]
pub struct SimulatedPage {
    api: BackendHandle,
    input: String,
    loaded: bool,
}

impl SimulatedPage {
    #[must_use]
    pub const fn new(api: BackendHandle) -> Self {
        Self {
            api,
            input: String::new(),
            loaded: false,
        }
    }

    fn ensure_loaded(&self) -> Result<(), SutError> {
        if self.loaded {
            Ok(())
        } else {
            Err(SutError::Driver("page used before navigation".into()))
        }
    }
}

impl Page for SimulatedPage {
    fn goto(&mut self, _path: &str) -> Result<(), SutError> {
        self.loaded = true;
        self.input.clear();
        Ok(())
    }

    fn title(&mut self) -> Result<String, SutError> {
        self.ensure_loaded()?;
        Ok(self.api.backend().title().to_string())
    }

    fn fill_input(&mut self, text: &str) -> Result<(), SutError> {
        self.ensure_loaded()?;
        text.clone_into(&mut self.input);
        Ok(())
    }

    fn click_add(&mut self) -> Result<(), SutError> {
        self.ensure_loaded()?;
        let text = std::mem::take(&mut self.input);
        self.api.create(&text)
    }

    fn item_texts(&mut self) -> Result<Vec<String>, SutError> {
        self.ensure_loaded()?;
        Ok(self.api.list()?.into_iter().map(|item| item.text).collect())
    }

    fn click_delete(&mut self, needle: &str) -> Result<bool, SutError> {
        self.ensure_loaded()?;
        match self
            .api
            .list()?
            .into_iter()
            .find(|item| item.text.contains(needle))
        {
            Some(item) => self.api.delete(&item.id).map(|()| true),
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FaultConfig, SimulatedBackend};
    use crate::clock::VirtualClock;
    use std::sync::Arc;

    fn page() -> SimulatedPage {
        let fault = FaultConfig {
            max_visibility_lag_ms: 0,
            reorder_rate_percent: 0,
            ..FaultConfig::default()
        };
        let backend = Arc::new(SimulatedBackend::new(1, fault, VirtualClock::new()));
        SimulatedPage::new(backend.handle("chromium"))
    }

    #[test]
    fn requires_navigation() {
        let mut page = page();
        assert!(matches!(page.item_texts(), Err(SutError::Driver(_))));
        page.goto("/").expect("goto");
        assert_eq!(page.title().expect("title"), "TODO 📃");
    }

    #[test]
    fn add_then_delete_through_the_page() {
        let mut page = page();
        page.goto("/").expect("goto");
        page.fill_input("TODO for chromium a").expect("fill");
        page.click_add().expect("add");
        page.fill_input("TODO for chromium b").expect("fill");
        page.click_add().expect("add");

        assert!(page.click_delete("chromium a").expect("delete"));
        assert!(!page.click_delete("chromium z").expect("no match"));
        assert_eq!(page.item_texts().expect("texts"), vec!["TODO for chromium b"]);
    }
}
