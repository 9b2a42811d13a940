//! Common test utilities
//!
//! Shared fixtures for the integration tests: a mock page preloaded with
//! typical form elements, and small helpers around it.

#![allow(dead_code)]

pub mod mock_chrome;

use chaser_locator::locator::FillKind;
use chaser_locator::session::{MockElement, MockPage, PageContext};
use std::sync::Arc;
use std::time::Duration;

/// Mock page plus the same page as a trait object
pub struct Fixture {
    pub mock: Arc<MockPage>,
    pub page: Arc<dyn PageContext>,
}

impl Fixture {
    pub fn new() -> Self {
        let mock = Arc::new(MockPage::new());
        let page: Arc<dyn PageContext> = mock.clone();
        Self { mock, page }
    }

    /// Register `element` under `selector` and hand it back
    pub fn element(&self, selector: &str, element: MockElement) -> MockElement {
        self.mock.add_element(selector, element.clone());
        element
    }

    pub fn text_input(&self, selector: &str, value: &str) -> MockElement {
        self.element(selector, MockElement::new(FillKind::TypeableInput).with_value(value))
    }

    pub fn button(&self, selector: &str) -> MockElement {
        self.element(selector, MockElement::new(FillKind::Unknown))
    }

    /// Let detached disposal tasks run
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}
