//! Background-service seam.
//!
//! On mobile the host keeps a foreground service and notifications alive
//! while a sync runs. The engine only talks to it through
//! [`ServiceController`]; hosts without such a concept use
//! [`NoopServiceController`].

use async_trait::async_trait;

/// Host-side service and notification control.
#[async_trait]
pub trait ServiceController: Send + Sync {
    /// A sync with `device_name` is starting.
    async fn start_service(&self, device_name: &str);

    /// Progress changed.
    async fn update_progress(
        &self,
        percentage: u8,
        current_item: Option<&str>,
        index: u32,
        total: u32,
    );

    /// The sync ended, whatever the outcome.
    async fn stop_service(&self);

    /// The user cancelled the sync.
    async fn cancel_sync(&self);

    /// The sync completed.
    async fn show_completion_notification(
        &self,
        device_name: &str,
        synced_items: u32,
        duration_ms: u64,
    );

    /// The sync failed.
    async fn show_error_notification(
        &self,
        device_name: Option<&str>,
        message: &str,
        suggestion: Option<&str>,
    );
}

/// Does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopServiceController;

#[async_trait]
impl ServiceController for NoopServiceController {
    async fn start_service(&self, _device_name: &str) {}

    async fn update_progress(
        &self,
        _percentage: u8,
        _current_item: Option<&str>,
        _index: u32,
        _total: u32,
    ) {
    }

    async fn stop_service(&self) {}

    async fn cancel_sync(&self) {}

    async fn show_completion_notification(
        &self,
        _device_name: &str,
        _synced_items: u32,
        _duration_ms: u64,
    ) {
    }

    async fn show_error_notification(
        &self,
        _device_name: Option<&str>,
        _message: &str,
        _suggestion: Option<&str>,
    ) {
    }
}

#[cfg(test)]
pub(crate) mod recording {
    //! A controller that remembers every call, for engine tests.

    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum ServiceCall {
        Start(String),
        Progress { percentage: u8, index: u32, total: u32 },
        Stop,
        Cancel,
        Completed { synced_items: u32 },
        Error { message: String, suggestion: Option<String> },
    }

    #[derive(Debug, Clone, Default)]
    pub struct RecordingController {
        calls: Arc<Mutex<Vec<ServiceCall>>>,
    }

    impl RecordingController {
        pub fn calls(&self) -> Vec<ServiceCall> {
            self.calls.lock().unwrap().clone()
        }

        fn push(&self, call: ServiceCall) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl ServiceController for RecordingController {
        async fn start_service(&self, device_name: &str) {
            self.push(ServiceCall::Start(device_name.to_string()));
        }

        async fn update_progress(
            &self,
            percentage: u8,
            _current_item: Option<&str>,
            index: u32,
            total: u32,
        ) {
            self.push(ServiceCall::Progress {
                percentage,
                index,
                total,
            });
        }

        async fn stop_service(&self) {
            self.push(ServiceCall::Stop);
        }

        async fn cancel_sync(&self) {
            self.push(ServiceCall::Cancel);
        }

        async fn show_completion_notification(
            &self,
            _device_name: &str,
            synced_items: u32,
            _duration_ms: u64,
        ) {
            self.push(ServiceCall::Completed { synced_items });
        }

        async fn show_error_notification(
            &self,
            _device_name: Option<&str>,
            message: &str,
            suggestion: Option<&str>,
        ) {
            self.push(ServiceCall::Error {
                message: message.to_string(),
                suggestion: suggestion.map(str::to_string),
            });
        }
    }
}
