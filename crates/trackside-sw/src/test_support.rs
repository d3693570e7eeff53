//! In-memory host fakes shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use trackside_net::{Fetcher, NetError, Request, Response};
use url::Url;

use crate::notification::{NotificationDescriptor, Notifier};
use crate::ServiceWorkerError;

pub const ORIGIN: &str = "http://localhost:3000/";

/// Absolute URL on the test origin.
pub fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

/// Canned network. Unknown URLs fail like an unreachable host.
#[derive(Default)]
pub struct MockFetcher {
    routes: Mutex<HashMap<String, Response>>,
    offline: AtomicBool,
    calls: Mutex<Vec<Request>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, path: &str, response: Response) -> Self {
        self.set(path, response);
        self
    }

    pub fn set(&self, path: &str, response: Response) {
        self.routes
            .lock()
            .unwrap()
            .insert(url(path).to_string(), response);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<Request> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, request: Request) -> Result<Response, NetError> {
        self.calls.lock().unwrap().push(request.clone());
        if self.offline.load(Ordering::SeqCst) {
            Err(NetError::Offline("simulated offline".into()))
        } else {
            self.routes
                .lock()
                .unwrap()
                .get(request.url.as_str())
                .cloned()
                .ok_or_else(|| NetError::Offline(format!("no route for {}", request.url)))
        }
    }
}

/// Notifier that rejects the first `failures` descriptors.
#[derive(Default)]
pub struct FlakyNotifier {
    failures: AtomicUsize,
    pub shown: Mutex<Vec<NotificationDescriptor>>,
}

impl FlakyNotifier {
    pub fn failing(failures: usize) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            shown: Mutex::default(),
        }
    }

    pub fn shown(&self) -> Vec<NotificationDescriptor> {
        self.shown.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for FlakyNotifier {
    async fn show(&self, descriptor: NotificationDescriptor) -> Result<(), ServiceWorkerError> {
        let fail = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(ServiceWorkerError::Notification("rejected by platform".into()));
        }
        self.shown.lock().unwrap().push(descriptor);
        Ok(())
    }

    async fn close(&self, _tag: String) -> Result<(), ServiceWorkerError> {
        Ok(())
    }
}
