use serde::{Deserialize, Serialize};

/// Test-mode configuration.
///
/// When present, workers call [`Handler::start_test`](super::Handler::start_test)
/// and [`Handler::run_test`](super::Handler::run_test) instead of the regular
/// entry points. Handlers read `suffix` to pick a scenario (mocked clients,
/// fixture data, ...).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TestMode {
    pub suffix: String,
}

impl TestMode {
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
        }
    }
}
